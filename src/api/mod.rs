//! Read-only status API.
//!
//! Lets an operator or orchestrator see what the bot is doing without
//! touching the recording: current state, participants, segments, and the
//! session ledger.

pub mod error;
pub mod routes;

use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use routes::status::StatusState;

pub struct ApiServer {
    bind: SocketAddr,
    state: StatusState,
}

impl ApiServer {
    pub fn new(bind: SocketAddr, state: StatusState) -> Self {
        Self { bind, state }
    }

    pub fn router(state: StatusState) -> Router {
        Router::new()
            .route("/", get(service_info))
            .merge(routes::status::router(state))
    }

    /// Serve until `shutdown` fires.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let app = Self::router(self.state);

        let listener = tokio::net::TcpListener::bind(self.bind)
            .await
            .with_context(|| format!("Failed to bind status API on {}", self.bind))?;

        info!("Status API listening on http://{}", self.bind);
        info!("  GET  /status        - Current session state");
        info!("  GET  /sessions      - Recent sessions");
        info!("  GET  /sessions/:id  - Session with segments");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "meetrec",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
