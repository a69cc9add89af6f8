//! The minimal `axum` router implementing §6's inbound/outbound contract
//! (§4.14). Thin by design (§1 treats the HTTP transport as an external
//! collaborator): handlers parse/validate, call into the orchestrator, and
//! translate `Error` variants to status codes — no persistence or auth
//! middleware lives here, the way the donor's `api::router` composes
//! route groups but pushes auth into its own middleware layer.

pub mod encounters;
pub mod health;
pub mod preferences;
pub mod templates;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/encounters", post(encounters::process_encounter))
        .route("/encounters/:job_id", delete(encounters::cancel_job))
        .route("/jobs/:job_id", get(encounters::job_status))
        .route("/jobs/:job_id/events", get(encounters::job_events_sse))
        .route("/templates/validate", post(templates::validate))
        .route(
            "/doctors/:doctor_id/preferences",
            get(preferences::get_preferences).put(preferences::put_preferences),
        )
}

/// Standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Translate a domain `Error` to a status code per §4.14's table.
pub(crate) fn error_response(error: &ce_domain::Error) -> Response {
    use ce_domain::Error;

    let status = match error {
        Error::InvalidRequest(_) | Error::InvalidTranscript(_) => StatusCode::BAD_REQUEST,
        Error::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    api_error(status, error.to_string())
}
