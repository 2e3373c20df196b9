//! JSON-RPC 2.0 plumbing shared by both transport variants.
//!
//! [`RpcClient`] owns the client half of the protocol: request ids, the
//! table of in-flight calls, progress routing, and interpretation of the
//! tool host's replies. The variants only differ in how bytes move.

use ferrule_core::error::TransportError;
use ferrule_core::tool::{ProgressEvent, ProgressSink, ToolCall, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};

pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Build a request envelope.
pub fn request(id: &str, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a notification envelope (no id, no reply expected).
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

pub fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

/// Params for the `initialize` handshake.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {}
    })
}

/// Params for `tools/call`; the request id doubles as the progress token.
pub fn call_params(call: &ToolCall, request_id: &str) -> Value {
    let arguments = match &call.arguments {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    json!({
        "name": call.name,
        "arguments": arguments,
        "_meta": { "progressToken": request_id },
    })
}

/// Encode one message as a newline-terminated frame.
pub fn encode_line(message: &Value) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse a `tools/list` result into descriptors owned by `transport`.
pub fn parse_tool_list(result: &Value, transport: &str) -> Vec<ToolDescriptor> {
    let Some(array) = result.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name").and_then(Value::as_str)?;
            let description = tool
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let schema = tool
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({ "type": "object" }));
            Some(ToolDescriptor::new(name, description, schema, transport))
        })
        .collect()
}

/// Interpret a `tools/call` result: structured payload, or the tool's own
/// error report.
pub fn interpret_call_result(tool: &str, result: Value) -> Result<Value, TransportError> {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if is_error {
        let message = if texts.is_empty() {
            "tool reported an error".to_string()
        } else {
            texts.join("\n")
        };
        return Err(TransportError::Application {
            tool: tool.to_string(),
            message,
        });
    }

    if let Some(structured) = result.get("structuredContent") {
        return Ok(structured.clone());
    }

    match texts.as_slice() {
        [] => Ok(result),
        [single] => Ok(serde_json::from_str::<Value>(single)
            .unwrap_or_else(|_| Value::String((*single).to_string()))),
        many => Ok(Value::String(many.join("\n"))),
    }
}

fn key_of(id: &Value) -> Option<String> {
    match id {
        Value::String(value) => Some(value.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

/// Lifecycle of one in-flight request: `Sent → Progress* → terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Sent,
    Progress,
    Completed,
    Failed,
    TimedOut,
}

impl CallPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallPhase::Completed | CallPhase::Failed | CallPhase::TimedOut
        )
    }

    /// Move to `next`, refusing to leave a terminal phase.
    pub fn advance(self, next: CallPhase) -> CallPhase {
        if self.is_terminal() { self } else { next }
    }
}

struct Pending {
    responder: oneshot::Sender<Result<Value, TransportError>>,
    progress: Option<(ProgressSink, u64, String)>,
    phase: CallPhase,
    progress_events: u32,
}

/// Client-side protocol state for one connection.
pub struct RpcClient {
    transport: String,
    pending: AsyncMutex<HashMap<String, Pending>>,
    id_counter: AtomicU64,
    instructions: AsyncMutex<Option<String>>,
    catalog_stale: AtomicBool,
}

/// What the caller should do after an inbound message was handled.
pub enum Inbound {
    /// Nothing to send back
    Handled,
    /// Send this reply to the host (answer to a host-initiated request)
    Reply(Value),
}

impl RpcClient {
    pub fn new(transport: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
            instructions: AsyncMutex::new(None),
            catalog_stale: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("req-{id}")
    }

    /// Register an in-flight request and get the receiver for its reply.
    pub async fn register(
        &self,
        id: &str,
        progress: Option<(ProgressSink, &ToolCall)>,
    ) -> oneshot::Receiver<Result<Value, TransportError>> {
        let (tx, rx) = oneshot::channel();
        let progress = progress.map(|(sink, call)| (sink, call.index, call.name.clone()));
        self.pending.lock().await.insert(
            id.to_string(),
            Pending {
                responder: tx,
                progress,
                phase: CallPhase::Sent,
                progress_events: 0,
            },
        );
        rx
    }

    pub async fn forget(&self, id: &str) {
        self.pending.lock().await.remove(id);
    }

    /// Wait for the reply to `id`, bounded by `timeout`.
    ///
    /// On expiry the request is forgotten; a late reply is dropped.
    pub async fn wait(
        &self,
        id: &str,
        rx: oneshot::Receiver<Result<Value, TransportError>>,
        timeout: Duration,
        tool: &str,
    ) -> Result<Value, TransportError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::Connection {
                transport: self.transport.clone(),
                reason: "connection dropped before reply".into(),
            }),
            Err(_) => {
                if let Some(entry) = self.pending.lock().await.remove(id) {
                    debug!(
                        transport = %self.transport,
                        request_id = id,
                        phase = ?entry.phase.advance(CallPhase::TimedOut),
                        progress_events = entry.progress_events,
                        "Request timed out"
                    );
                }
                Err(TransportError::Timeout {
                    tool: tool.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Route one decoded message from the host.
    pub async fn handle_inbound(&self, value: Value) -> Inbound {
        match (value.get("id").cloned(), value.get("method").and_then(Value::as_str)) {
            (Some(id), Some(method)) => self.handle_host_request(id, method),
            (Some(id), None) => {
                self.handle_response(id, value).await;
                Inbound::Handled
            }
            (None, Some(method)) => {
                let method = method.to_string();
                self.handle_notification(&method, &value).await;
                Inbound::Handled
            }
            (None, None) => Inbound::Handled,
        }
    }

    fn handle_host_request(&self, id: Value, method: &str) -> Inbound {
        match method {
            "ping" => Inbound::Reply(success(id, json!({}))),
            other => {
                warn!(
                    transport = %self.transport,
                    method = other,
                    "tool host sent unsupported request"
                );
                Inbound::Reply(failure(
                    id,
                    METHOD_NOT_FOUND,
                    format!("client does not implement method '{other}'"),
                ))
            }
        }
    }

    async fn handle_response(&self, id: Value, value: Value) {
        let Some(key) = key_of(&id) else {
            return;
        };

        let Some(entry) = self.pending.lock().await.remove(&key) else {
            debug!(
                transport = %self.transport,
                response_id = %key,
                "received response for unknown or expired request"
            );
            return;
        };

        let outcome = match value.get("error") {
            Some(error) => {
                let parsed: Option<RpcError> = serde_json::from_value(error.clone()).ok();
                let message = parsed
                    .map(|e| format!("{} (code {})", e.message, e.code))
                    .unwrap_or_else(|| "malformed error payload".into());
                let tool = entry
                    .progress
                    .as_ref()
                    .map(|(_, _, name)| name.clone())
                    .unwrap_or_else(|| self.transport.clone());
                Err(TransportError::Application { tool, message })
            }
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        let terminal = if outcome.is_ok() {
            CallPhase::Completed
        } else {
            CallPhase::Failed
        };
        debug!(
            transport = %self.transport,
            request_id = %key,
            phase = ?entry.phase.advance(terminal),
            progress_events = entry.progress_events,
            "Request finished"
        );
        let _ = entry.responder.send(outcome);
    }

    async fn handle_notification(&self, method: &str, value: &Value) {
        match method {
            "notifications/progress" => {
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                let Some(token) = params.get("progressToken").and_then(key_of) else {
                    return;
                };
                let mut pending = self.pending.lock().await;
                let Some(entry) = pending.get_mut(&token) else {
                    debug!(transport = %self.transport, token = %token, "Progress for unknown request");
                    return;
                };
                entry.phase = entry.phase.advance(CallPhase::Progress);
                entry.progress_events += 1;
                if let Some((sink, call_index, tool)) = &entry.progress {
                    sink(ProgressEvent {
                        call_index: *call_index,
                        tool: tool.clone(),
                        progress: params.get("progress").and_then(Value::as_f64).unwrap_or(0.0),
                        total: params.get("total").and_then(Value::as_f64),
                        message: params
                            .get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    });
                }
            }
            "notifications/tools/list_changed" => {
                debug!(transport = %self.transport, "tool host catalog changed");
                self.catalog_stale.store(true, Ordering::SeqCst);
            }
            other => {
                debug!(transport = %self.transport, method = other, "ignoring notification");
            }
        }
    }

    /// Record the `initialize` result.
    pub async fn set_initialized(&self, result: &Value) {
        let text = result
            .get("instructions")
            .and_then(Value::as_str)
            .map(str::to_string);
        *self.instructions.lock().await = text;
    }

    pub async fn instructions(&self) -> Option<String> {
        self.instructions.lock().await.clone()
    }

    pub fn catalog_stale(&self) -> bool {
        self.catalog_stale.load(Ordering::SeqCst)
    }

    pub fn mark_catalog_fresh(&self) {
        self.catalog_stale.store(false, Ordering::SeqCst);
    }

    /// Fail every in-flight request, e.g. when the connection drops.
    pub async fn fail_all(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.responder.send(Err(TransportError::Connection {
                transport: self.transport.clone(),
                reason: reason.to_string(),
            }));
        }
    }

    /// Forget connection-scoped state after a disconnect.
    pub async fn reset(&self, reason: &str) {
        self.fail_all(reason).await;
        self.instructions.lock().await.take();
    }
}
