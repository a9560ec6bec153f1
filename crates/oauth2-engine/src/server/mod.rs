//! Reference HTTP transport for the engine.
//!
//! Routes:
//! - `GET /authorize`: validate a request and echo it for a consent screen
//! - `POST /authorize`: resource owner login plus allow/deny decision
//! - `POST /token`: token endpoint, client authentication via HTTP Basic
//! - `GET|POST /resource`: bearer-protected echo of the verified identity
//! - `GET /health`: liveness

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::engine::OAuthServer;
use crate::resource::ResourceGuard;

/// Shared state for HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub server: OAuthServer,
    pub guard: ResourceGuard,
    /// Scope the `/resource` endpoint requires. Empty accepts any token.
    pub resource_scope: String,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/authorize",
            get(handlers::handle_authorize_get).post(handlers::handle_authorize_post),
        )
        .route("/token", post(handlers::handle_token))
        .route("/resource", get(handlers::handle_resource).post(handlers::handle_resource))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` on `port` until CTRL+C.
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails.
pub async fn run_http(state: AppState, port: u16) -> anyhow::Result<()> {
    let router = create_router(Arc::new(state));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("HTTP server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("HTTP server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
