//! Shared test doubles: a scripted decision service and an in-process
//! transport whose tools answer from a script.

use async_trait::async_trait;
use ferrule_core::decision::{Decision, DecisionRequest, DecisionService};
use ferrule_core::error::{DecisionError, TransportError};
use ferrule_core::tool::{ProgressEvent, ProgressSink, ToolCall, ToolDescriptor, ToolTransport};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Returns scripted decisions in order and records every request.
///
/// Once the script runs out every call fails with `Unavailable`.
pub struct ScriptedDecisions {
    script: Mutex<Vec<Result<Decision, DecisionError>>>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedDecisions {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self::from_results(decisions.into_iter().map(Ok).collect())
    }

    pub fn from_results(mut script: Vec<Result<Decision, DecisionError>>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: DecisionError) -> Self {
        Self::from_results(vec![Err(err)])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionService for ScriptedDecisions {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, DecisionError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(DecisionError::Unavailable("script exhausted".into())))
    }
}

/// How a scripted tool answers.
#[derive(Clone)]
pub enum Behavior {
    Reply(Value),
    /// Emit progress ticks, then reply
    Progress(u32, Value),
    Fail(String),
    Timeout,
    Unreachable,
    /// Never answers; for cancellation tests
    Hang,
}

/// In-process transport with a scripted catalog.
pub struct MockTransport {
    name: String,
    tools: Vec<ToolDescriptor>,
    behaviors: HashMap<String, Behavior>,
    invocations: Mutex<Vec<String>>,
    closed: AtomicBool,
    /// Reports a stale catalog, and every discovery after the first hangs
    hanging_refresh: bool,
    discoveries: AtomicU32,
}

impl MockTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            behaviors: HashMap::new(),
            invocations: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            hanging_refresh: false,
            discoveries: AtomicU32::new(0),
        }
    }

    pub fn with_hanging_refresh(mut self) -> Self {
        self.hanging_refresh = true;
        self
    }

    pub fn with_tool(self, tool: &str, schema: Value) -> Self {
        let reply = Behavior::Reply(json!({ "tool": tool }));
        self.with_behavior(tool, schema, reply)
    }

    pub fn with_behavior(mut self, tool: &str, schema: Value, behavior: Behavior) -> Self {
        self.tools.push(ToolDescriptor::new(
            tool,
            format!("{tool} tool"),
            schema,
            self.name.clone(),
        ));
        self.behaviors.insert(tool.to_string(), behavior);
        self
    }

    /// Tool names in invocation order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        if self.discoveries.fetch_add(1, Ordering::SeqCst) > 0 && self.hanging_refresh {
            std::future::pending::<()>().await;
        }
        Ok(self.tools.clone())
    }

    fn catalog_stale(&self) -> bool {
        self.hanging_refresh
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        timeout: Duration,
        progress: Option<ProgressSink>,
    ) -> Result<Value, TransportError> {
        self.invocations.lock().unwrap().push(call.name.clone());
        let behavior = self
            .behaviors
            .get(&call.name)
            .cloned()
            .unwrap_or(Behavior::Reply(Value::Null));
        match behavior {
            Behavior::Reply(value) => Ok(value),
            Behavior::Progress(ticks, value) => {
                if let Some(sink) = progress {
                    for i in 1..=ticks {
                        sink(ProgressEvent {
                            call_index: call.index,
                            tool: call.name.clone(),
                            progress: i as f64,
                            total: Some(ticks as f64),
                            message: None,
                        });
                    }
                }
                Ok(value)
            }
            Behavior::Fail(message) => Err(TransportError::Application {
                tool: call.name.clone(),
                message,
            }),
            Behavior::Timeout => Err(TransportError::Timeout {
                tool: call.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Behavior::Unreachable => Err(TransportError::Connection {
                transport: self.name.clone(),
                reason: "connection refused".into(),
            }),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Object schema with the given required string fields.
pub fn string_schema(fields: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({ "type": "string" })))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": fields,
    })
}
