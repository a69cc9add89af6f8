//! Result Publisher — delivers each accepted or definitively-failed section
//! to its sink exactly once, with at-least-once delivery retries (§4.10).
//!
//! The broadcast-per-job fan-out mirrors the donor's `TaskStore` SSE
//! channel (`subscribe`/`emit`/`cleanup_channel`), generalized from one
//! channel per task to one channel per job (a job publishes many
//! sections).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use ce_domain::model::SectionResult;
use ce_domain::trace::TraceEvent;
use ce_domain::{Error, Result};
use parking_lot::RwLock;
use tokio::sync::broadcast;

/// A sink a [`Publisher`] hands accepted/failed sections to. `ce-engine`'s
/// SSE endpoint is the concrete outbound transport (§6); this trait is the
/// seam so the orchestrator never depends on `axum` directly.
#[async_trait]
pub trait PublicationSink: Send + Sync {
    async fn deliver(&self, job_id: &str, result: &SectionResult) -> Result<()>;
}

/// In-process sink that only fans out over the broadcast channel — used
/// when no external sink is configured and delivery is "done" as soon as
/// subscribers (e.g. the SSE handler) can see it.
pub struct BroadcastOnlySink;

#[async_trait]
impl PublicationSink for BroadcastOnlySink {
    async fn deliver(&self, _job_id: &str, _result: &SectionResult) -> Result<()> {
        Ok(())
    }
}

const DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct JobChannel {
    published: HashSet<String>,
    sender: Option<broadcast::Sender<SectionResult>>,
}

pub struct Publisher {
    sink: Box<dyn PublicationSink>,
    jobs: RwLock<HashMap<String, JobChannel>>,
}

impl Publisher {
    pub fn new(sink: Box<dyn PublicationSink>) -> Self {
        Self {
            sink,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a job's publication stream (the SSE handler's entry
    /// point). Creates the channel if this is the first subscriber.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<SectionResult> {
        let mut jobs = self.jobs.write();
        let entry = jobs.entry(job_id.to_string()).or_default();
        entry
            .sender
            .get_or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    /// Publish a terminal section result exactly once per `section_id`
    /// (§8 invariant 5). Retries delivery to the sink up to
    /// `DELIVERY_ATTEMPTS` times; on exhaustion returns `DeliveryFailure`
    /// and the caller (orchestrator) marks the job `PartiallyFailed`.
    pub async fn publish(&self, job_id: &str, result: SectionResult) -> Result<()> {
        {
            let mut jobs = self.jobs.write();
            let entry = jobs.entry(job_id.to_string()).or_default();
            if !entry.published.insert(result.section_id.clone()) {
                return Ok(()); // already published — at-most-once guard
            }
        }

        let mut last_err = None;
        for attempt in 0..DELIVERY_ATTEMPTS {
            match self.sink.deliver(job_id, &result).await {
                Ok(()) => {
                    TraceEvent::SectionPublished {
                        job_id: job_id.to_string(),
                        section_id: result.section_id.clone(),
                        validation_status: format!("{:?}", result.validation_status),
                    }
                    .emit();

                    let jobs = self.jobs.read();
                    if let Some(entry) = jobs.get(job_id) {
                        if let Some(sender) = &entry.sender {
                            let _ = sender.send(result.clone());
                        }
                    }
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(job_id, section_id = %result.section_id, attempt, error = %e, "publication delivery failed, retrying");
                    last_err = Some(e);
                }
            }
        }

        Err(Error::DeliveryFailure(format!(
            "section '{}' could not be delivered after {DELIVERY_ATTEMPTS} attempts: {}",
            result.section_id,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub fn evict_job(&self, job_id: &str) {
        self.jobs.write().remove(job_id);
    }
}
