//! Error types for the Ferrule domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Tool-level failures (timeouts, tool-reported errors) are *not* errors at
//! the loop level: they are turned into [`crate::tool::ToolResult`] values and
//! handed to the planner. Only the fatal categories unwind a session.

use thiserror::Error;

/// The top-level error type for all Ferrule operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Registry errors ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Planning errors ---
    #[error("Invalid plan: {0}")]
    Plan(#[from] PlanError),

    // --- Decision service errors ---
    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The tool host is unreachable (spawn failure, refused connection,
    /// broken pipe). The only category the retry policy acts on.
    #[error("Transport '{transport}' connection failed: {reason}")]
    Connection { transport: String, reason: String },

    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// The tool ran and reported failure.
    #[error("Tool '{tool}' reported an error: {message}")]
    Application { tool: String, message: String },

    #[error("Transport '{transport}' protocol error: {message}")]
    Protocol { transport: String, message: String },

    #[error("Transport '{transport}' is closed")]
    Closed { transport: String },
}

impl TransportError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connection { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Tool '{tool}' is declared by both '{first}' and '{second}'")]
    Collision {
        tool: String,
        first: String,
        second: String,
    },

    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Transport not registered: {0}")]
    UnknownTransport(String),
}

#[derive(Debug, Clone, Error)]
pub enum PlanError {
    #[error("planner chose unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("arguments for '{tool}' do not match its schema: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("planner failed {attempts} consecutive times, last: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Debug, Clone, Error)]
pub enum DecisionError {
    #[error("Decision service unavailable: {0}")]
    Unavailable(String),

    #[error("Decision service returned a malformed action: {0}")]
    Malformed(String),

    #[error("Decision service timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Persisted index is corrupt: {0}")]
    Corruption(String),

    #[error("Unsupported {file} format version {found} (this build reads version {supported})")]
    UnsupportedVersion {
        file: &'static str,
        found: u32,
        supported: u32,
    },
}
