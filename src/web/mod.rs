//! Web server module for remote session control
//!
//! Provides a REST API and a WebSocket endpoint over the session registry.

mod api;
mod server;
mod ws;

pub use api::ApiState;
pub use server::WebServer;
