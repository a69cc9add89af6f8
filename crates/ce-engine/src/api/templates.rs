//! `POST /templates/validate` — structural validation only, no job created
//! (§6 `ValidateTemplates`).

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use ce_orchestrator::TemplateInput;
use serde::Deserialize;

use crate::api::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidateTemplatesRequest {
    pub templates: Vec<TemplateInput>,
}

pub async fn validate(
    State(state): State<AppState>,
    Json(body): Json<ValidateTemplatesRequest>,
) -> Response {
    match state.orchestrator.validate_templates(&body.templates) {
        Ok(specs) => Json(serde_json::json!({
            "valid": true,
            "section_count": specs.len(),
            "sections": specs,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}
