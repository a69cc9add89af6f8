//! Extraction Orchestrator — job scheduling, cancellation, and publication
//! (§4.9-§4.11). The donor's gateway runtime (`runtime::cancel`,
//! `runtime::tasks`) is this crate's closest analogue: per-key cancellation
//! tokens with cascading groups, and semaphore-bounded concurrent task
//! execution with broadcast-channel event fan-out.

pub mod cancel;
pub mod execution;
pub mod orchestrator;
pub mod publisher;
pub mod registry;
pub mod request;
pub mod templates;

pub use cancel::{CancelMap, CancelToken};
pub use orchestrator::ExtractionOrchestrator;
pub use publisher::{BroadcastOnlySink, PublicationSink, Publisher};
pub use registry::JobRegistry;
pub use request::{ProcessEncounterRequest, SectionInput, TemplateInput};
