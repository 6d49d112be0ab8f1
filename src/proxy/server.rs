//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use super::relay::Relay;
use crate::config::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build state from configuration, including the upstream connection pool.
    pub fn from_config(config: Config) -> crate::error::Result<Self> {
        let relay = Relay::from_config(&config)?;
        Ok(Self {
            relay: Arc::new(relay),
            config: Arc::new(config),
        })
    }
}

/// Per-request correlation ID, inserted as a request extension.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(RequestId(Uuid::new_v4()));
    next.run(request).await
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        // State and middleware
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let state = AppState::from_config(config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chat relay server");

    axum::serve(listener, app).await?;

    Ok(())
}
