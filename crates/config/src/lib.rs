//! Configuration loading, validation, and management for Ferrule.
//!
//! Loads configuration from `~/.ferrule/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.ferrule/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Tool transports
    #[serde(default)]
    pub transports: Vec<TransportConfig>,

    /// Retrieval memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Retry policy for transient transport failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Remote decision service
    #[serde(default)]
    pub decision: DecisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum Decide→Act transitions per session
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Per-call tool timeout
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Chunks retrieved from memory before each decision (0 disables recall)
    #[serde(default = "default_recall_top_k")]
    pub recall_top_k: usize,

    /// Ingest successful tool payloads into memory
    #[serde(default = "default_true")]
    pub remember_results: bool,
}

fn default_max_steps() -> u32 {
    12
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_recall_top_k() -> usize {
    4
}
fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            call_timeout_secs: default_call_timeout_secs(),
            recall_top_k: default_recall_top_k(),
            remember_results: true,
        }
    }
}

impl AgentSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// One tool transport.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// A tool host launched as a child process, spoken to over stdin/stdout
    Stdio {
        name: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workdir: Option<PathBuf>,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    /// A remote tool host reached over an HTTP event stream
    Sse {
        name: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

impl TransportConfig {
    pub fn name(&self) -> &str {
        match self {
            TransportConfig::Stdio { name, .. } | TransportConfig::Sse { name, .. } => name,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            TransportConfig::Stdio { enabled, .. } | TransportConfig::Sse { enabled, .. } => {
                *enabled
            }
        }
    }
}

/// Redact secret-bearing maps (env vars, auth headers) for Debug output.
fn redact_keys(map: &HashMap<String, String>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().map(|k| format!("{k}=[REDACTED]")).collect();
    keys.sort();
    keys
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportConfig::Stdio {
                name,
                command,
                args,
                env,
                workdir,
                enabled,
            } => f
                .debug_struct("Stdio")
                .field("name", name)
                .field("command", command)
                .field("args", args)
                .field("env", &redact_keys(env))
                .field("workdir", workdir)
                .field("enabled", enabled)
                .finish(),
            TransportConfig::Sse {
                name,
                url,
                headers,
                enabled,
            } => f
                .debug_struct("Sse")
                .field("name", name)
                .field("url", url)
                .field("headers", &redact_keys(headers))
                .field("enabled", enabled)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding the index and metadata files
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Maximum characters per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks, as a fraction of `chunk_size`
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f32,

    /// "cosine" or "l2"; fixed once the index exists
    #[serde(default = "default_metric")]
    pub metric: String,

    /// Dimension of the built-in hashing embedder
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

fn default_index_dir() -> PathBuf {
    AppConfig::config_dir().join("memory")
}
fn default_chunk_size() -> usize {
    800
}
fn default_overlap_ratio() -> f32 {
    0.15
}
fn default_metric() -> String {
    "cosine".into()
}
fn default_embedding_dim() -> usize {
    256
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            chunk_size: default_chunk_size(),
            overlap_ratio: default_overlap_ratio(),
            metric: default_metric(),
            embedding_dim: default_embedding_dim(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts for a transient failure (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Endpoint of the remote decision service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_decision_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_decision_timeout_secs() -> u64 {
    120
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_decision_timeout_secs(),
        }
    }
}

/// The bundle a session entrypoint needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_steps: u32,
    pub call_timeout: Duration,
    pub recall_top_k: usize,
    pub remember_results: bool,
    pub transports: Vec<TransportConfig>,
    pub memory: MemoryConfig,
    pub retry: RetryConfig,
}

impl AppConfig {
    /// Load configuration from the default path (~/.ferrule/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `FERRULE_MAX_STEPS`
    /// - `FERRULE_INDEX_DIR`
    /// - `FERRULE_DECISION_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load `path`, then apply the environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("FERRULE_MAX_STEPS") {
            self.agent.max_steps = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("FERRULE_MAX_STEPS is not a number: {raw}"))
            })?;
        }
        if let Some(dir) = lookup("FERRULE_INDEX_DIR") {
            self.memory.index_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("FERRULE_DECISION_URL") {
            self.decision.url = Some(url);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ferrule")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.call_timeout_secs must be at least 1".into(),
            ));
        }

        if self.memory.chunk_size < 16 {
            return Err(ConfigError::ValidationError(
                "memory.chunk_size must be at least 16 characters".into(),
            ));
        }

        if !(0.0..0.5).contains(&self.memory.overlap_ratio) {
            return Err(ConfigError::ValidationError(
                "memory.overlap_ratio must be in [0.0, 0.5)".into(),
            ));
        }

        if !matches!(self.memory.metric.as_str(), "cosine" | "l2") {
            return Err(ConfigError::ValidationError(format!(
                "memory.metric must be \"cosine\" or \"l2\", got \"{}\"",
                self.memory.metric
            )));
        }

        if self.memory.embedding_dim == 0 {
            return Err(ConfigError::ValidationError(
                "memory.embedding_dim must be positive".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for transport in &self.transports {
            if !seen.insert(transport.name()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate transport name \"{}\"",
                    transport.name()
                )));
            }
            if let TransportConfig::Sse { url, .. } = transport {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::ValidationError(format!(
                        "transport \"{}\" url must be http(s): {url}",
                        transport.name()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Project the bundle a session needs, keeping only enabled transports.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_steps: self.agent.max_steps,
            call_timeout: self.agent.call_timeout(),
            recall_top_k: self.agent.recall_top_k,
            remember_results: self.agent.remember_results,
            transports: self
                .transports
                .iter()
                .filter(|t| t.enabled())
                .cloned()
                .collect(),
            memory: self.memory.clone(),
            retry: self.retry.clone(),
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for ferrule_core::Error {
    fn from(err: ConfigError) -> Self {
        ferrule_core::Error::Config {
            message: err.to_string(),
        }
    }
}
