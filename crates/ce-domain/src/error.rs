/// Flat error type shared by every crate in the engine.
///
/// Variants line up with the error taxonomy: retryable dependency/LLM/citation
/// failures carry enough context for a repair prompt; everything else
/// surfaces synchronously.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid transcript: {0}")]
    InvalidTranscript(String),

    #[error("{component} unavailable: {message}")]
    DependencyUnavailable { component: String, message: String },

    #[error("llm returned invalid output: {0}")]
    LlmInvalidOutput(String),

    #[error("citation failure: {0}")]
    CitationFailure(String),

    #[error("delivery failure: {0}")]
    DeliveryFailure(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error class is one of the three the orchestrator
    /// automatically retries (§7 recovery policy). A per-call LLM timeout is
    /// encoded as `DependencyUnavailable{component: "llm", ..}` (§4.7: "LLM
    /// service reachable-but-failing"), not a distinct retriable variant.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::DependencyUnavailable { .. } | Error::LlmInvalidOutput(_) | Error::CitationFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
