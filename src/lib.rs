//! Remote supervisor for interactive coding agent sessions.
//!
//! The session machinery lives in `claude-remote-core`; this crate adds the
//! configuration layer, the HTTP/WebSocket front end and the background
//! health sweeper.

pub mod config;
pub mod sweeper;
pub mod web;
