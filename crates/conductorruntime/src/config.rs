use crate::weights::NodeWeights;
use conductorcore::{ConductorError, DEFAULT_DOMAIN, DEFAULT_EXECUTION_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How nodes within one level are run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One after another, in level order
    #[default]
    Sequential,
    /// All nodes of a level at once, joined before the next level
    Parallel,
}

/// What the scheduler does after a node exhausts its retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the current level finish, then schedule nothing further
    #[default]
    FailFast,
    /// Keep going; anything downstream of a failure is skipped
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Drive synthetic progress for executables that report none
    pub enabled: bool,
    pub step_delay_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_delay_ms: 500,
        }
    }
}

impl ProgressConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// Per-run scheduling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Additional attempts after the first failure
    pub retries: u32,
    /// Budget for a single attempt
    pub timeout_ms: u64,
    pub failure_policy: FailurePolicy,
    pub progress: ProgressConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            retries: 0,
            timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            failure_policy: FailurePolicy::FailFast,
            progress: ProgressConfig::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn parallel() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.progress = progress;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration for a runtime and its bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Prefix for event channel names
    pub domain: String,
    pub event_buffer_size: usize,
    /// Default budget for a cross-process call
    pub bridge_timeout_ms: u64,
    pub execution: ExecutionConfig,
    pub weights: NodeWeights,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            event_buffer_size: 1000,
            bridge_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            execution: ExecutionConfig::default(),
            weights: NodeWeights::default(),
        }
    }
}

impl ConductorConfig {
    /// Load from a JSON file; absent fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConductorError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply `CONDUCTOR_DOMAIN` and `CONDUCTOR_BRIDGE_TIMEOUT_MS` overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(domain) = std::env::var("CONDUCTOR_DOMAIN") {
            if !domain.trim().is_empty() {
                self.domain = domain.trim().to_string();
            }
        }
        if let Ok(raw) = std::env::var("CONDUCTOR_BRIDGE_TIMEOUT_MS") {
            match raw.parse() {
                Ok(ms) => self.bridge_timeout_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid CONDUCTOR_BRIDGE_TIMEOUT_MS: {}", raw),
            }
        }
        self
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }
}
