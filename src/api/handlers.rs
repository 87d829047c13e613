//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::info;

use super::AppState;
use super::types::{ControlResponse, ErrorResponse, RunStatusResponse};
use crate::batch::checkpoint::RequestOutcome;
use crate::batch::summary::RunSummary;
use crate::batch::types::{RadiationResult, RunCommand};
use crate::error::{RunError, StoreError};

type ApiError = (StatusCode, Json<ErrorResponse>);
type ControlResult = Result<(StatusCode, Json<ControlResponse>), ApiError>;

fn run_error(e: RunError) -> ApiError {
    let status = match &e {
        RunError::UnknownRun(_) => StatusCode::NOT_FOUND,
        RunError::Terminal { .. }
        | RunError::InvalidTransition { .. }
        | RunError::RunLocked { .. }
        | RunError::LeaseLost { .. } => StatusCode::CONFLICT,
        RunError::Input(_) => StatusCode::BAD_REQUEST,
        RunError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}

fn store_error(e: StoreError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: e.to_string() }),
    )
}

/// Runs the staleness check and returns the run with its summary.
///
/// `GET /runs/{run_id}` → 200 + `RunStatusResponse` JSON, 404 if unknown
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let report = state.checkpoints().check_status(&run_id).map_err(run_error)?;
    let summary = RunSummary::load(state.gateway.as_ref(), &report.run).map_err(store_error)?;
    Ok(Json(RunStatusResponse {
        run: report.run,
        stale: report.stale.map(|s| s.to_string()),
        summary,
    }))
}

/// Returns committed results ordered by element id.
///
/// `GET /runs/{run_id}/results` → 200 + `Vec<RadiationResult>` JSON, 404 if unknown
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<RadiationResult>>, ApiError> {
    state.checkpoints().load(&run_id).map_err(run_error)?;
    let results = state.gateway.load_results(&run_id).map_err(store_error)?;
    Ok(Json(results))
}

/// `POST /runs/{run_id}/pause` → 202 + `ControlResponse`
pub async fn pause_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> ControlResult {
    control(&state, run_id, RunCommand::Pause)
}

/// `POST /runs/{run_id}/stop` → 202 + `ControlResponse`
pub async fn stop_run(State(state): State<Arc<AppState>>, Path(run_id): Path<String>) -> ControlResult {
    control(&state, run_id, RunCommand::Stop)
}

/// Applies the request, or stores it for the live lease holder.
///
/// Finished runs and transitions the state machine forbids give 409.
fn control(
    state: &AppState,
    run_id: String,
    command: RunCommand,
) -> ControlResult {
    let outcome = state.checkpoints().request(&run_id, command).map_err(run_error)?;
    let (disposition, status) = match outcome {
        RequestOutcome::Applied(status) => ("applied", Some(status)),
        RequestOutcome::Deferred => ("deferred", None),
    };
    info!(run_id = %run_id, %command, disposition, "control request received");
    Ok((
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            run_id,
            command,
            disposition,
            status,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::batch::checkpoint::CheckpointManager;
    use crate::batch::clock::ManualClock;
    use crate::config::AnalysisConfig;
    use crate::store::{MemoryStore, PersistenceGateway};

    fn make_test_state() -> Arc<AppState> {
        let store: Arc<dyn PersistenceGateway> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let mut config = AnalysisConfig::standard();
        config.run.persist_retry_base_ms = 0;
        let mgr = CheckpointManager::new(store.clone(), clock.clone(), &config.run);
        mgr.create("idle", 3).unwrap();
        mgr.create("live", 3).unwrap();
        mgr.acquire("live", "worker-1", false).unwrap();
        Arc::new(AppState::new(store, clock, config))
    }

    async fn send(state: Arc<AppState>, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn run_status_returns_200() {
        let (status, json) = send(make_test_state(), "GET", "/runs/idle").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["run"]["status"], "idle");
        assert_eq!(json["summary"]["elements_total"], 3);
        assert!(json["stale"].is_null());
    }

    #[tokio::test]
    async fn unknown_run_returns_404() {
        let (status, json) = send(make_test_state(), "GET", "/runs/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json.get("error").is_some());
        let (status, _) = send(make_test_state(), "GET", "/runs/missing/results").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn results_empty_before_processing() {
        let (status, json) = send(make_test_state(), "GET", "/runs/live/results").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn pause_on_live_run_is_deferred() {
        let state = make_test_state();
        let (status, json) = send(state.clone(), "POST", "/runs/live/pause").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["disposition"], "deferred");
        assert!(json.get("forwarded").is_none());
        let run = state.gateway.load_run("live").unwrap().unwrap();
        assert_eq!(run.pending_command, Some(RunCommand::Pause));
    }

    #[test]
    fn lost_lease_maps_to_conflict() {
        let (status, _) = run_error(RunError::LeaseLost {
            run_id: "r".into(),
            holder: "w".into(),
        });
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn pause_on_idle_run_conflicts() {
        let (status, _) = send(make_test_state(), "POST", "/runs/idle/pause").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn stop_on_idle_run_conflicts() {
        let (status, _) = send(make_test_state(), "POST", "/runs/idle/stop").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
