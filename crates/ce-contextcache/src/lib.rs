//! Section Context Cache — per-`(conversation_id, template_id)` map of
//! already-generated sections, used to keep later sections coherent (§4.6).
//!
//! Write-once per `section_id` within a job: a dependent section's prompt
//! assembly only ever reads entries for `section_id in depends_on`, and
//! those entries are only readable once the writer transitioned to
//! `Accepted` (§5 shared-resource policy) — enforced here by only
//! inserting `Accepted` results.

use std::collections::HashMap;

use ce_domain::model::SectionResult;
use parking_lot::RwLock;

#[derive(Default)]
struct JobCache {
    sections: HashMap<String, SectionResult>,
}

/// One cache instance is scoped to a single job (caller constructs one per
/// `(conversation_id, template_group_id)` and drops it when the job ends).
pub struct SectionContextCache {
    jobs: RwLock<HashMap<String, JobCache>>,
}

impl SectionContextCache {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Write a completed, accepted section. Returns `false` (no-op) if the
    /// section was already written — write-once per `section_id` (§4.6).
    pub fn insert(&self, job_id: &str, result: SectionResult) -> bool {
        let mut jobs = self.jobs.write();
        let cache = jobs.entry(job_id.to_string()).or_default();
        if cache.sections.contains_key(&result.section_id) {
            return false;
        }
        cache.sections.insert(result.section_id.clone(), result);
        true
    }

    /// Read the results for a set of dependency `section_id`s. Returns
    /// `None` if any requested id is not yet present (not all dependencies
    /// have reached `Accepted`).
    pub fn get_dependencies(&self, job_id: &str, depends_on: &[String]) -> Option<Vec<SectionResult>> {
        let jobs = self.jobs.read();
        let cache = jobs.get(job_id)?;
        let mut out = Vec::with_capacity(depends_on.len());
        for id in depends_on {
            out.push(cache.sections.get(id)?.clone());
        }
        Some(out)
    }

    /// Whether every id in `depends_on` has a cached (accepted) result.
    pub fn all_ready(&self, job_id: &str, depends_on: &[String]) -> bool {
        let jobs = self.jobs.read();
        let Some(cache) = jobs.get(job_id) else {
            return depends_on.is_empty();
        };
        depends_on.iter().all(|id| cache.sections.contains_key(id))
    }

    /// Drop all cached sections for a finished job.
    pub fn evict_job(&self, job_id: &str) {
        self.jobs.write().remove(job_id);
    }
}

impl Default for SectionContextCache {
    fn default() -> Self {
        Self::new()
    }
}
