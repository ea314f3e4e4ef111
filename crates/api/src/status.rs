//! Read-only HTTP view of a running bridge.

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use index::{ProgressSummary, ProgressTracker, RunPhase, RunResult};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct StatusState {
    pub progress: Arc<ProgressTracker>,
    pub result: Arc<RwLock<Option<RunResult>>>,
}

impl StatusState {
    pub fn new(progress: Arc<ProgressTracker>) -> Self {
        Self {
            progress,
            result: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn publish(&self, result: RunResult) {
        *self.result.write().await = Some(result);
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    phase: RunPhase,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/progress", get(get_progress))
        .route("/result", get(get_result))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: String, state: StatusState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Status server listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_check(State(state): State<StatusState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        phase: state.progress.phase(),
    })
}

async fn get_progress(State(state): State<StatusState>) -> Json<ProgressSummary> {
    Json(state.progress.get_progress_summary())
}

async fn get_result(State(state): State<StatusState>) -> Result<Json<RunResult>, StatusCode> {
    state
        .result
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Utc;
    use index::RunStatus;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn get_json(state: StatusState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_progress_reports_live_counters() {
        let progress = ProgressTracker::new();
        progress.begin_run();
        progress.set_totals(10, 0, 2);
        progress.set_phase(RunPhase::Writing);
        progress.record_committed(index::BatchKind::Entities, 5, false);

        let (status, body) = get_json(StatusState::new(progress), "/progress").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "writing");
        assert_eq!(body["entities_processed"], 5);
        assert_eq!(body["batches_total"], 2);
    }

    #[tokio::test]
    async fn test_result_is_404_until_published() {
        let state = StatusState::new(ProgressTracker::new());
        let (status, _) = get_json(state.clone(), "/result").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let summary = state.progress.snapshot();
        state
            .publish(RunResult {
                run_id: Uuid::new_v4(),
                status: RunStatus::Completed,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                summary,
                batches: Vec::new(),
                orphaned: Vec::new(),
                verification: None,
            })
            .await;

        let (status, body) = get_json(state, "/result").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(StatusState::new(ProgressTracker::new()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["phase"], "pending");
    }
}
