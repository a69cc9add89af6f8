//! Inbound DTOs for `ProcessEncounter` / `ValidateTemplates` (§6). These are
//! orchestrator-level request shapes, not domain types — the HTTP surface in
//! `ce-engine` deserializes directly into them.

use std::collections::HashMap;

use ce_domain::model::SectionType;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SectionInput {
    pub section_id: String,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub prompt: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateInput {
    pub template_id: String,
    pub sections: Vec<SectionInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessEncounterRequest {
    pub conversation_id: String,
    pub templates: Vec<TemplateInput>,
    pub transcription_text: String,
    pub doctor_id: String,
    #[serde(default)]
    pub doctor_preferences: Option<HashMap<String, String>>,
    #[serde(default)]
    pub language: Option<String>,
}

impl ProcessEncounterRequest {
    /// The job registry keys running jobs by `(conversation_id,
    /// template_group_id)` (§4.9, §4.11); the group id is the ordered
    /// concatenation of requested template ids, so two requests naming the
    /// same templates in the same order collide as intended.
    pub fn template_group_id(&self) -> String {
        self.templates
            .iter()
            .map(|t| t.template_id.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }
}
