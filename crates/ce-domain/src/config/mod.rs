use std::fmt;

use serde::{Deserialize, Serialize};

mod llm;
pub use llm::{LlmConfig, LlmProviderConfig, ProviderKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            ConfigSeverity::Warning => "warning",
            ConfigSeverity::Error => "error",
        };
        write!(f, "[{level}] {}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.to_string(),
        message: message.into(),
    }
}

fn warn(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.to_string(),
        message: message.into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sub-configs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Acceptance/retrieval thresholds (§3, §4.5, §4.8, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Minimum preference confidence to apply (θ_apply).
    pub theta_apply: f32,
    /// Minimum section confidence to accept (θ_accept).
    pub theta_accept: f32,
    /// Max ontology concepts returned per term (N_max).
    pub n_max: usize,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            theta_apply: 0.7,
            theta_accept: 0.6,
            n_max: 5,
        }
    }
}

/// Concurrency caps (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Per-job concurrent section cap (C_job).
    pub c_job: usize,
    /// Global in-flight section cap across all jobs (C_global).
    pub c_global: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            c_job: 4,
            c_global: 64,
        }
    }
}

/// Wall-clock timeouts (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub section_timeout_sec: u64,
    pub job_timeout_sec: u64,
    pub llm_timeout_sec: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            section_timeout_sec: 30,
            job_timeout_sec: 20 * 60,
            llm_timeout_sec: 20,
        }
    }
}

/// Retry policy (§4.7, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub r_max: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            r_max: 3,
            backoff_base_ms: 200,
            backoff_cap_ms: 30_000,
        }
    }
}

/// Chunking policy (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    pub respect_speaker_boundaries: bool,
    pub min_lines: usize,
    pub max_lines: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 1_500,
            overlap_tokens: 150,
            respect_speaker_boundaries: true,
            min_lines: 1,
            max_lines: 200,
        }
    }
}

/// Normalizer limits (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub max_bytes: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_bytes: 2_000_000,
        }
    }
}

/// Outer HTTP surface (§4.14), ambient scaffolding only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors: CorsConfig::default(),
        }
    }
}

/// Allowed CORS origins. An origin ending in `:*` matches any port on that
/// host; a single `"*"` entry allows all origins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// On-disk state the engine owns directly (currently just the doctor
/// preference store; §1 scopes persistence of generated sections out as an
/// external collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: "./data".to_string(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: ThresholdsConfig,
    pub concurrency: ConcurrencyConfig,
    pub timeouts: TimeoutsConfig,
    pub retry: RetryConfig,
    pub chunker: ChunkerConfig,
    pub normalizer: NormalizerConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults if it's missing or
    /// unparsable (logged, not fatal — validation is the gate, not load).
    pub fn load_or_default(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(error = %e, path, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path, "no config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Validate the configuration, returning accumulated errors/warnings.
    /// Callers (bootstrap) abort startup if any `ConfigSeverity::Error` is
    /// present.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(err("server.port", "port must not be 0"));
        }
        if self.server.host.is_empty() {
            issues.push(err("server.host", "host must not be empty"));
        }

        if !(0.0..=1.0).contains(&self.thresholds.theta_apply) {
            issues.push(err("thresholds.theta_apply", "must be in [0,1]"));
        }
        if !(0.0..=1.0).contains(&self.thresholds.theta_accept) {
            issues.push(err("thresholds.theta_accept", "must be in [0,1]"));
        }
        if self.thresholds.n_max == 0 {
            issues.push(warn("thresholds.n_max", "0 means ontology resolution never returns a concept"));
        }

        if self.concurrency.c_job == 0 {
            issues.push(err("concurrency.c_job", "must be >= 1"));
        }
        if self.concurrency.c_global == 0 {
            issues.push(err("concurrency.c_global", "must be >= 1"));
        }
        if self.concurrency.c_job > self.concurrency.c_global {
            issues.push(err(
                "concurrency.c_job",
                "must not exceed concurrency.c_global",
            ));
        }

        if self.timeouts.section_timeout_sec == 0 {
            issues.push(err("timeouts.section_timeout_sec", "must be >= 1"));
        }
        if self.timeouts.job_timeout_sec == 0 {
            issues.push(err("timeouts.job_timeout_sec", "must be >= 1"));
        }
        if self.timeouts.llm_timeout_sec == 0 {
            issues.push(err("timeouts.llm_timeout_sec", "must be >= 1"));
        }
        if self.timeouts.llm_timeout_sec > self.timeouts.section_timeout_sec {
            issues.push(warn(
                "timeouts.llm_timeout_sec",
                "exceeds section_timeout_sec; a single slow call can exhaust the section budget",
            ));
        }

        if self.chunker.target_tokens == 0 {
            issues.push(err("chunker.target_tokens", "must be >= 1"));
        }
        if self.chunker.overlap_tokens >= self.chunker.target_tokens {
            issues.push(err(
                "chunker.overlap_tokens",
                "must be smaller than target_tokens or chunking never advances",
            ));
        }
        if self.chunker.min_lines > self.chunker.max_lines {
            issues.push(err("chunker.min_lines", "must not exceed max_lines"));
        }

        if self.normalizer.max_bytes == 0 {
            issues.push(err("normalizer.max_bytes", "must be >= 1"));
        }

        if self.storage.state_dir.is_empty() {
            issues.push(err("storage.state_dir", "must not be empty"));
        }

        if self.server.cors.allowed_origins.is_empty() {
            issues.push(err(
                "server.cors.allowed_origins",
                "must list at least one origin (use \"*\" to allow all)",
            ));
        }

        let mut seen_ids = std::collections::HashSet::new();
        for p in &self.llm.providers {
            if p.id.is_empty() {
                issues.push(err("llm.providers[].id", "provider id must not be empty"));
            }
            if !seen_ids.insert(p.id.clone()) {
                issues.push(err(
                    "llm.providers[].id",
                    format!("duplicate provider id '{}'", p.id),
                ));
            }
            if p.base_url.is_empty() {
                issues.push(err(
                    "llm.providers[].base_url",
                    format!("provider '{}' has an empty base_url", p.id),
                ));
            } else if !(p.base_url.starts_with("http://") || p.base_url.starts_with("https://")) {
                issues.push(err(
                    "llm.providers[].base_url",
                    format!("provider '{}' base_url must start with http:// or https://", p.id),
                ));
            }
        }
        if self.llm.providers.is_empty() {
            issues.push(warn(
                "llm.providers",
                "no LLM providers configured; section generation will fail until one is added",
            ));
        }

        issues
    }
}
