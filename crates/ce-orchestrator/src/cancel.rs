//! Per-job cancellation tokens with cascading section groups (§5).
//!
//! Each running job gets a `CancelToken`. Every section task spawned under
//! that job registers its own token in the job's group, so a single
//! `cancel(job_id)` cascades to every in-flight section — the same
//! parent/child group the donor's gateway runtime uses for nested turns.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active cancellation tokens per key (`job_id` or `job_id:section_id`),
/// with group support for cascading job -> section cancellation.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, key: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(key.to_owned(), token.clone());
        token
    }

    /// Cancel a key and cascade to every key registered in its group.
    /// Idempotent: calling this N times has the same observable effect as
    /// once (§8 invariant 6) — a token that is already cancelled just
    /// stays cancelled.
    pub fn cancel(&self, key: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(key) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(key) {
            let tokens = self.tokens.lock();
            for child in children {
                if let Some(child_token) = tokens.get(child) {
                    child_token.cancel();
                }
            }
        }

        found
    }

    pub fn remove(&self, key: &str) {
        self.tokens.lock().remove(key);
        self.groups.lock().remove(key);
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.tokens.lock().contains_key(key)
    }

    pub fn add_to_group(&self, parent_key: &str, child_key: &str) {
        self.groups
            .lock()
            .entry(parent_key.to_owned())
            .or_default()
            .insert(child_key.to_owned());
    }

    pub fn remove_from_group(&self, parent_key: &str, child_key: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent_key) {
            children.remove(child_key);
            if children.is_empty() {
                groups.remove(parent_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_cascades_to_sections_in_group() {
        let map = CancelMap::new();
        let job = map.register("job1");
        let s1 = map.register("job1:s1");
        let s2 = map.register("job1:s2");
        map.add_to_group("job1", "job1:s1");
        map.add_to_group("job1", "job1:s2");

        map.cancel("job1");
        assert!(job.is_cancelled());
        assert!(s1.is_cancelled());
        assert!(s2.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let map = CancelMap::new();
        let token = map.register("job1");
        assert!(map.cancel("job1"));
        assert!(map.cancel("job1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unknown_job_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("missing"));
    }

    #[test]
    fn remove_clears_token_and_group() {
        let map = CancelMap::new();
        map.register("job1");
        map.add_to_group("job1", "job1:s1");
        map.remove("job1");
        assert!(!map.is_running("job1"));
        assert!(!map.cancel("job1"));
    }
}
