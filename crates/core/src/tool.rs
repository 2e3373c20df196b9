//! Tool types and the transport trait: the abstraction over tool hosts.
//!
//! A tool host is a separate process (reached over a local pipe) or a remote
//! endpoint (reached over an event stream). Both are driven through
//! [`ToolTransport`], so the registry and the agent loop never know which one
//! they are talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;

/// A tool as advertised by a transport's catalog.
///
/// Immutable once loaded; the registry rebuilds its table from fresh
/// descriptors whenever a transport (re)connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique across the registry
    pub name: String,

    /// Free-text description from the tool host
    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments object
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,

    /// Name of the transport that owns this tool
    pub transport: String,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        transport: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            transport: transport.into(),
        }
    }

    /// First non-empty line of the description.
    pub fn summary_line(&self) -> &str {
        self.description
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }
}

/// A request to execute a tool, produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Monotonically increasing index within the session (starts at 1)
    pub index: u64,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value (validated before dispatch)
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// The wire-level call id used by transports.
    pub fn call_id(&self) -> String {
        format!("call-{}", self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// Why a tool call did not produce a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The per-call deadline expired
    Timeout,
    /// The tool ran and reported failure
    Application,
    /// The host stayed unreachable after retries
    Connection,
    /// The arguments were rejected before dispatch
    InvalidArguments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// The outcome of one tool call. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call index this result answers
    pub call_index: u64,

    /// Tool name, for readability in rendered context
    pub tool: String,

    pub status: ToolStatus,

    /// Structured payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Failure detail on error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,

    /// Wall-clock time spent in the transport, retries included
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, payload: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            call_index: call.index,
            tool: call.name.clone(),
            status: ToolStatus::Ok,
            payload: Some(payload),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(
        call: &ToolCall,
        kind: FailureKind,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            call_index: call.index,
            tool: call.name.clone(),
            status: ToolStatus::Error,
            payload: None,
            error: Some(ToolFailure {
                kind,
                message: message.into(),
            }),
            duration_ms,
        }
    }

    /// Fold a transport outcome into a result the planner can reason about.
    pub fn from_outcome(
        call: &ToolCall,
        outcome: std::result::Result<serde_json::Value, TransportError>,
        duration_ms: u64,
    ) -> Self {
        match outcome {
            Ok(payload) => Self::ok(call, payload, duration_ms),
            Err(err) => {
                let kind = match &err {
                    TransportError::Timeout { .. } => FailureKind::Timeout,
                    TransportError::Application { .. } => FailureKind::Application,
                    TransportError::Connection { .. }
                    | TransportError::Protocol { .. }
                    | TransportError::Closed { .. } => FailureKind::Connection,
                };
                Self::failed(call, kind, err.to_string(), duration_ms)
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Plain-text rendering of the payload, used for memory ingestion.
    pub fn payload_text(&self) -> Option<String> {
        let payload = self.payload.as_ref()?;
        let text = match payload {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(text)
    }
}

/// A partial-progress notification for an in-flight call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub call_index: u64,
    pub tool: String,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Optional side channel for progress events.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// The core ToolTransport trait.
///
/// Implementations: local pipe (subprocess over stdin/stdout) and remote
/// stream (HTTP event stream). Both must enforce the per-call `timeout`,
/// returning [`TransportError::Timeout`] on expiry.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Unique name of this transport (from configuration).
    fn name(&self) -> &str;

    /// Connect if needed and fetch the tool catalog.
    async fn discover(&self) -> std::result::Result<Vec<ToolDescriptor>, TransportError>;

    /// Invoke one tool and wait for its terminal response.
    async fn invoke(
        &self,
        call: &ToolCall,
        timeout: Duration,
        progress: Option<ProgressSink>,
    ) -> std::result::Result<serde_json::Value, TransportError>;

    /// Free-text usage notes the host sent on connect, if any.
    async fn instructions(&self) -> Option<String> {
        None
    }

    /// Whether the host announced a catalog change since the last discovery.
    fn catalog_stale(&self) -> bool {
        false
    }

    /// Release the connection or child process. Idempotent.
    async fn close(&self);
}
