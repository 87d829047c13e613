//! REST API for run status, results and run control.
//!
//! Endpoints:
//! - `GET /runs/{run_id}` runs the staleness check and returns the run with its summary
//! - `GET /runs/{run_id}/results` returns the committed results
//! - `POST /runs/{run_id}/pause` and `POST /runs/{run_id}/stop` request run control
//!
//! Control requests for a run with a live lease are stored; the holder takes
//! them at its next element boundary, whichever process it runs in.

mod handlers;
mod types;

pub use types::{ControlResponse, ErrorResponse, RunStatusResponse};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::batch::checkpoint::CheckpointManager;
use crate::batch::clock::Clock;
use crate::config::AnalysisConfig;
use crate::store::PersistenceGateway;

/// Application state shared across all request handlers.
pub struct AppState {
    pub gateway: Arc<dyn PersistenceGateway>,
    pub clock: Arc<dyn Clock>,
    pub config: AnalysisConfig,
}

impl AppState {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, clock: Arc<dyn Clock>, config: AnalysisConfig) -> Self {
        Self {
            gateway,
            clock,
            config,
        }
    }

    fn checkpoints(&self) -> CheckpointManager {
        CheckpointManager::new(self.gateway.clone(), self.clock.clone(), &self.config.run)
    }
}

/// Builds the axum router with all API routes.
///
/// # Arguments
///
/// * `state` - Shared application state
///
/// # Returns
///
/// Configured `Router` ready to serve.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/runs/{run_id}", get(handlers::get_run))
        .route("/runs/{run_id}/results", get(handlers::get_results))
        .route("/runs/{run_id}/pause", post(handlers::pause_run))
        .route("/runs/{run_id}/stop", post(handlers::stop_run))
        .with_state(state)
}

/// Binds to the given address and serves the API.
///
/// # Arguments
///
/// * `state` - Shared application state
/// * `addr` - Socket address to bind to
///
/// # Errors
///
/// Returns an `io::Error` if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app).await
}
