//! `POST /encounters`, `DELETE /encounters/:job_id`, `GET /jobs/:job_id`,
//! and `GET /jobs/:job_id/events` — the `ProcessEncounter`/`CancelJob`/
//! `JobStatus` surface plus the Result Publisher's concrete SSE transport
//! (§6, §4.9-§4.11), grounded in the donor's `api::runs` run-inspection +
//! SSE endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use ce_orchestrator::ProcessEncounterRequest;
use futures_util::stream::Stream;

use crate::api::error_response;
use crate::state::AppState;

/// `POST /encounters` (§6 `ProcessEncounter`). Ingest and template
/// resolution run synchronously and fail fast; everything past that point
/// runs in the background, so the caller gets `job_id` back immediately.
pub async fn process_encounter(
    State(state): State<AppState>,
    Json(request): Json<ProcessEncounterRequest>,
) -> Response {
    match state.orchestrator.process_encounter(request).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "job_id": job.job_id, "status": job.status })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// `DELETE /encounters/:job_id` (§6 `CancelJob`). Idempotent — cancelling a
/// terminal or unknown job is a no-op.
pub async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    let existed = state.orchestrator.cancel_job(&job_id);
    if existed {
        Json(serde_json::json!({ "job_id": job_id, "cancelled": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "job not found" })),
        )
            .into_response()
    }
}

/// `GET /jobs/:job_id` (§6 `JobStatus`).
pub async fn job_status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.orchestrator.job_status(&job_id) {
        Some(job) => Json(serde_json::json!(job)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "job not found" })),
        )
            .into_response(),
    }
}

/// `GET /jobs/:job_id/events` — streams each accepted/failed section as a
/// server-sent event, one per completed section, in the order the
/// Publisher hands them off (§4.10, §4.14).
pub async fn job_events_sse(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let rx = state.orchestrator.publisher.subscribe(&job_id);
    let orchestrator = state.orchestrator.clone();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(result) => {
                    let event_type = format!("{:?}", result.validation_status).to_lowercase();
                    let data = serde_json::to_string(&result).unwrap_or_default();
                    yield Ok::<_, std::convert::Infallible>(
                        Event::default().event(event_type).data(data),
                    );

                    if let Some(job) = orchestrator.job_status(&job_id) {
                        if job.status.is_terminal() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    let msg = format!("{{\"warning\":\"missed {n} events\"}}");
                    yield Ok(Event::default().event("warning").data(msg));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, std::convert::Infallible>> + Send>> =
        Box::pin(stream);

    Sse::new(stream).keep_alive(KeepAlive::default())
}
