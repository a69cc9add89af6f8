//! Job Registry — indexed by `job_id` and by `(conversation_id,
//! template_group_id)` (§4.11).

use std::collections::HashMap;

use ce_domain::model::{Job, JobStatus, SectionState};
use ce_domain::trace::TraceEvent;
use parking_lot::RwLock;

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
    /// `(conversation_id, template_group_id) -> job_id` of the job
    /// currently occupying that slot (Running or just-started; cleared
    /// once the job reaches a terminal state).
    group_owner: RwLock<HashMap<(String, String), String>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            group_owner: RwLock::new(HashMap::new()),
        }
    }

    /// The job, if any, currently occupying `(conversation_id,
    /// template_group_id)`'s slot — used by `start()` (§4.11) to decide
    /// whether a prior job needs cancelling first.
    pub fn running_job_for(&self, conversation_id: &str, template_group_id: &str) -> Option<Job> {
        let key = (conversation_id.to_string(), template_group_id.to_string());
        let owner = self.group_owner.read().get(&key).cloned()?;
        self.jobs.read().get(&owner).cloned()
    }

    pub fn insert(&self, job: Job) {
        let key = (job.conversation_id.clone(), job.template_group_id.clone());
        self.group_owner.write().insert(key, job.job_id.clone());
        self.jobs.write().insert(job.job_id.clone(), job);
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).cloned()
    }

    pub fn set_status(&self, job_id: &str, status: JobStatus) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = status;
            TraceEvent::JobStatusChanged {
                job_id: job_id.to_string(),
                status: format!("{status:?}"),
            }
            .emit();
            if status.is_terminal() {
                let key = (job.conversation_id.clone(), job.template_group_id.clone());
                drop(jobs);
                let mut owners = self.group_owner.write();
                if owners.get(&key).map(|id| id.as_str()) == Some(job_id) {
                    owners.remove(&key);
                }
            }
        }
    }

    pub fn set_section_state(&self, job_id: &str, section_id: &str, state: SectionState) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.section_states.insert(section_id.to_string(), state);
            TraceEvent::SectionStateChanged {
                job_id: job_id.to_string(),
                section_id: section_id.to_string(),
                state: format!("{state:?}"),
            }
            .emit();
        }
    }

    /// Recompute and store the job's terminal status once every section has
    /// reached a terminal state (§4.9 step 7): `Completed` if all sections
    /// accepted, `Failed` if none did, `PartiallyFailed` otherwise.
    pub fn finalize_if_all_sections_terminal(&self, job_id: &str) {
        let snapshot = match self.get(job_id) {
            Some(j) => j,
            None => return,
        };
        if snapshot.status.is_terminal() {
            return;
        }
        if snapshot.section_states.is_empty()
            || !snapshot.section_states.values().all(|s| s.is_terminal())
        {
            return;
        }

        let accepted = snapshot
            .section_states
            .values()
            .filter(|s| matches!(s, SectionState::Accepted))
            .count();
        let total = snapshot.section_states.len();

        let status = if accepted == total {
            JobStatus::Completed
        } else if accepted == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyFailed
        };
        self.set_status(job_id, status);
    }

    /// Remove terminal jobs whose `started_at` predates `cutoff` (§4.13
    /// periodic pruning sweep, the analogue of the donor's
    /// `TaskStore::evict_terminal`). Returns the removed `job_id`s so the
    /// caller can evict the same jobs from the context cache and publisher
    /// (§1: the in-flight cache is not a persistent store).
    pub fn prune_terminal_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Vec<String> {
        let mut jobs = self.jobs.write();
        let removed: Vec<String> = jobs
            .iter()
            .filter(|(_, job)| job.status.is_terminal() && job.started_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            jobs.remove(id);
        }
        removed
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, conv: &str, group: &str) -> Job {
        Job::new(id.to_string(), conv.to_string(), group.to_string())
    }

    #[test]
    fn insert_and_get() {
        let reg = JobRegistry::new();
        reg.insert(job("j1", "c1", "g1"));
        assert_eq!(reg.get("j1").unwrap().job_id, "j1");
    }

    #[test]
    fn running_job_for_tracks_group_owner() {
        let reg = JobRegistry::new();
        reg.insert(job("j1", "c1", "g1"));
        let owner = reg.running_job_for("c1", "g1").unwrap();
        assert_eq!(owner.job_id, "j1");
    }

    #[test]
    fn terminal_status_clears_group_ownership() {
        let reg = JobRegistry::new();
        reg.insert(job("j1", "c1", "g1"));
        reg.set_status("j1", JobStatus::Completed);
        assert!(reg.running_job_for("c1", "g1").is_none());
    }

    #[test]
    fn second_job_replaces_group_owner() {
        let reg = JobRegistry::new();
        reg.insert(job("j1", "c1", "g1"));
        reg.insert(job("j2", "c1", "g1"));
        let owner = reg.running_job_for("c1", "g1").unwrap();
        assert_eq!(owner.job_id, "j2");
    }

    #[test]
    fn finalize_marks_completed_when_all_sections_accepted() {
        let reg = JobRegistry::new();
        reg.insert(job("j1", "c1", "g1"));
        reg.set_section_state("j1", "s1", SectionState::Accepted);
        reg.finalize_if_all_sections_terminal("j1");
        assert_eq!(reg.get("j1").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn finalize_marks_partially_failed_on_mixed_outcomes() {
        let reg = JobRegistry::new();
        reg.insert(job("j1", "c1", "g1"));
        reg.set_section_state("j1", "s1", SectionState::Accepted);
        reg.set_section_state("j1", "s2", SectionState::Error);
        reg.finalize_if_all_sections_terminal("j1");
        assert_eq!(reg.get("j1").unwrap().status, JobStatus::PartiallyFailed);
    }

    #[test]
    fn finalize_is_a_noop_while_sections_pending() {
        let reg = JobRegistry::new();
        reg.insert(job("j1", "c1", "g1"));
        reg.set_section_state("j1", "s1", SectionState::Generating);
        reg.finalize_if_all_sections_terminal("j1");
        assert_eq!(reg.get("j1").unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn prune_removes_old_terminal_jobs_only() {
        let reg = JobRegistry::new();
        reg.insert(job("old", "c1", "g1"));
        reg.set_status("old", JobStatus::Completed);
        reg.insert(job("new", "c2", "g2"));
        reg.set_status("new", JobStatus::Completed);

        reg.prune_terminal_before(chrono::Utc::now());
        // Both were just created "now"; use a cutoff in the far future to
        // simulate "old enough to prune" deterministically.
        let removed = reg.prune_terminal_before(chrono::Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed.len(), 2);
        assert!(reg.get("old").is_none());
        assert!(reg.get("new").is_none());
    }
}
