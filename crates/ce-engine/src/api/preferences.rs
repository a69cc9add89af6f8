//! `GET`/`PUT /doctors/:doctor_id/preferences` (§6 `GetDoctorPreferences` /
//! `PutDoctorPreferences`).

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};

use crate::api::error_response;
use crate::state::AppState;

pub async fn get_preferences(
    State(state): State<AppState>,
    Path(doctor_id): Path<String>,
) -> impl IntoResponse {
    let prefs = state.orchestrator.get_doctor_preferences(&doctor_id);
    Json(serde_json::json!({ "doctor_id": doctor_id, "preferences": prefs }))
}

pub async fn put_preferences(
    State(state): State<AppState>,
    Path(doctor_id): Path<String>,
    Json(updates): Json<HashMap<String, String>>,
) -> Response {
    match state.orchestrator.put_doctor_preferences(&doctor_id, updates) {
        Ok(()) => Json(serde_json::json!({ "doctor_id": doctor_id, "saved": true })).into_response(),
        Err(e) => error_response(&e),
    }
}
