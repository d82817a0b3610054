//! Web server implementation using axum

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use claude_remote_core::SessionRegistry;

use crate::config::ServerSettings;

use super::api::{self, ApiState};
use super::ws;

/// All API routes over the given state, without middleware
pub(super) fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route(
            "/sessions",
            post(api::create_session).get(api::list_sessions),
        )
        .route("/sessions/{id}", delete(api::terminate_session))
        .route("/sessions/{id}/status", get(api::get_session_status))
        .route("/sessions/{id}/message", post(api::send_message))
        .route("/sessions/{id}/logs", get(api::get_logs))
        .route("/sessions/{id}/respond", post(api::respond_to_prompt))
        .route("/prompts", get(api::check_prompts))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// HTTP and WebSocket front end of the supervisor
pub struct WebServer {
    settings: ServerSettings,
    registry: Arc<SessionRegistry>,
}

impl WebServer {
    /// Create a new web server
    pub fn new(settings: ServerSettings, registry: Arc<SessionRegistry>) -> Self {
        Self { settings, registry }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(ApiState::new(self.registry));

        // Phone clients on the LAN connect from arbitrary origins
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = router(state).layer(cors);

        let host = self.settings.host.as_str();
        let port = self.settings.port;
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", host, port))?;

        tracing::info!("Web server starting on http://{}:{}", host, port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Web server stopped");
        Ok(())
    }
}
