//! Preference Store — `(doctor_id, original_term) -> preferred_term,
//! confidence` (§3, §4.6). Snapshotted at job start; updates during a job
//! never retroactively affect it (§5 shared-resource policy).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ce_domain::model::{DoctorPreferences, PreferenceEntry};
use ce_domain::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;

/// Confidence assigned to preferences supplied directly through
/// `PutDoctorPreferences` (an explicit operator action, not a learned one).
const EXPLICIT_PUT_CONFIDENCE: f32 = 1.0;

/// Confidence assigned to the request-level overlay map in
/// `ProcessEncounter.doctor_preferences` (§9 open question: request takes
/// precedence over the stored snapshot, applied as a full-confidence
/// override so it always clears `theta_apply`).
const REQUEST_OVERLAY_CONFIDENCE: f32 = 1.0;

/// Keyed, file-backed store of doctor terminology preferences.
pub struct PreferenceStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, DoctorPreferences>>,
}

impl PreferenceStore {
    /// Load (or create) the store at `path`, a JSON file mapping
    /// `doctor_id -> DoctorPreferences`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        tracing::info!(doctors = entries.len(), path = %path.display(), "preference store loaded");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, DoctorPreferences>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Read-only snapshot of a doctor's stored preferences, as of now. The
    /// caller should take this once at job start (§5).
    pub fn snapshot(&self, doctor_id: &str) -> DoctorPreferences {
        self.entries
            .read()
            .get(doctor_id)
            .cloned()
            .unwrap_or_else(|| DoctorPreferences {
                doctor_id: doctor_id.to_string(),
                entries: HashMap::new(),
            })
    }

    /// Merge a request-supplied overlay (`original -> preferred`) into a
    /// snapshot, request entries taking precedence over stored ones (§9
    /// open question resolution). The result is a deterministic function
    /// of `(snapshot, overlay)` — no mutation of the underlying store.
    pub fn overlay(
        snapshot: &DoctorPreferences,
        request_overlay: Option<&HashMap<String, String>>,
    ) -> DoctorPreferences {
        let mut merged = snapshot.clone();
        if let Some(overlay) = request_overlay {
            let now = Utc::now();
            for (original, preferred) in overlay {
                merged.entries.insert(
                    original.clone(),
                    PreferenceEntry {
                        preferred: preferred.clone(),
                        confidence: REQUEST_OVERLAY_CONFIDENCE,
                        last_updated: now,
                    },
                );
            }
        }
        merged
    }

    /// Persist an explicit preference update (`PutDoctorPreferences`).
    /// Updates during a running job do not retroactively affect jobs that
    /// already took their snapshot.
    pub fn put(&self, doctor_id: &str, updates: HashMap<String, String>) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let doc = entries
            .entry(doctor_id.to_string())
            .or_insert_with(|| DoctorPreferences {
                doctor_id: doctor_id.to_string(),
                entries: HashMap::new(),
            });
        for (original, preferred) in updates {
            doc.entries.insert(
                original,
                PreferenceEntry {
                    preferred,
                    confidence: EXPLICIT_PUT_CONFIDENCE,
                    last_updated: now,
                },
            );
        }
        self.flush(&entries)
            .map_err(|e| Error::Internal(format!("failed to persist preferences: {e}")))
    }

    /// Return the stored preferences for a doctor as a plain map, for the
    /// `GetDoctorPreferences` read path.
    pub fn get(&self, doctor_id: &str) -> HashMap<String, String> {
        self.entries
            .read()
            .get(doctor_id)
            .map(|d| {
                d.entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.preferred.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
