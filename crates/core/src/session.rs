//! Session and working-context types.
//!
//! A [`Session`] is one end-to-end run of the agent loop for a single query.
//! Its [`AgentContext`] is the loop's working memory: an append-only log of
//! perceptions, decisions, and tool results, discarded when the session ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::memory::MemoryQueryResult;
use crate::tool::{ToolCall, ToolResult};

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a session ended up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Still running
    #[default]
    None,
    Success,
    Failure,
    StepLimitExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub query: String,
    /// Number of Deciding→Acting transitions so far
    pub steps: u32,
    pub max_steps: u32,
    pub state: TerminalState,
}

impl Session {
    pub fn new(query: impl Into<String>, max_steps: u32) -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            query: query.into(),
            steps: 0,
            max_steps,
            state: TerminalState::None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state != TerminalState::None
    }

    pub fn steps_exhausted(&self) -> bool {
        self.steps >= self.max_steps
    }
}

/// One entry of the working context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextEntry {
    /// Framing of the user's query
    Perception { text: String },
    /// A tool call the planner chose
    Decision {
        call: ToolCall,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    /// The result of the most recent decision
    ActionResult { result: ToolResult },
    /// Chunks retrieved from the memory engine for a step
    Recall { query: String, hits: MemoryQueryResult },
    /// Validation feedback after an invalid plan
    Feedback { message: String },
}

/// Ordered working memory for one session. Grows monotonically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContext {
    entries: Vec<ContextEntry>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_perception(&mut self, text: impl Into<String>) {
        self.entries.push(ContextEntry::Perception { text: text.into() });
    }

    pub fn push_decision(&mut self, call: ToolCall, rationale: Option<String>) {
        self.entries.push(ContextEntry::Decision { call, rationale });
    }

    pub fn push_feedback(&mut self, message: impl Into<String>) {
        self.entries.push(ContextEntry::Feedback {
            message: message.into(),
        });
    }

    pub fn push_recall(&mut self, query: impl Into<String>, hits: MemoryQueryResult) {
        self.entries.push(ContextEntry::Recall {
            query: query.into(),
            hits,
        });
    }

    /// Append a result. It must answer the latest decision, and that decision
    /// must not have been answered yet.
    pub fn push_result(&mut self, result: ToolResult) -> crate::Result<()> {
        let pending = self.pending_call().map(|c| c.index);
        if pending != Some(result.call_index) {
            warn!(call_index = result.call_index, pending = ?pending, "Rejected tool result out of order");
            return Err(crate::Error::Internal(format!(
                "result for call {} does not answer the pending call {:?}",
                result.call_index, pending
            )));
        }
        self.entries.push(ContextEntry::ActionResult { result });
        Ok(())
    }

    /// The latest decision, if no result has been recorded for it yet.
    pub fn pending_call(&self) -> Option<&ToolCall> {
        for entry in self.entries.iter().rev() {
            match entry {
                ContextEntry::ActionResult { .. } => return None,
                ContextEntry::Decision { call, .. } => return Some(call),
                _ => {}
            }
        }
        None
    }

    pub fn calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.entries.iter().filter_map(|e| match e {
            ContextEntry::Decision { call, .. } => Some(call),
            _ => None,
        })
    }

    pub fn results(&self) -> impl Iterator<Item = &ToolResult> {
        self.entries.iter().filter_map(|e| match e {
            ContextEntry::ActionResult { result } => Some(result),
            _ => None,
        })
    }

    pub fn last_result(&self) -> Option<&ToolResult> {
        self.results().last()
    }

    /// Every result references a call that strictly precedes it, in call order.
    pub fn is_well_ordered(&self) -> bool {
        let mut seen_calls: Vec<u64> = Vec::new();
        let mut answered = 0usize;
        for entry in &self.entries {
            match entry {
                ContextEntry::Decision { call, .. } => {
                    if seen_calls.last().is_some_and(|last| *last >= call.index) {
                        return false;
                    }
                    seen_calls.push(call.index);
                }
                ContextEntry::ActionResult { result } => {
                    match seen_calls.get(answered) {
                        Some(idx) if *idx == result.call_index => answered += 1,
                        _ => return false,
                    }
                }
                _ => {}
            }
        }
        true
    }

    /// Plain-text transcript for a decision service.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            match entry {
                ContextEntry::Perception { text } => {
                    out.push_str(&format!("[perception] {text}\n"));
                }
                ContextEntry::Decision { call, rationale } => {
                    if let Some(r) = rationale {
                        out.push_str(&format!("[thought] {r}\n"));
                    }
                    out.push_str(&format!(
                        "[call #{}] {} {}\n",
                        call.index, call.name, call.arguments
                    ));
                }
                ContextEntry::ActionResult { result } => match (&result.payload, &result.error) {
                    (Some(payload), _) => out.push_str(&format!(
                        "[result #{}] ok {}\n",
                        result.call_index, payload
                    )),
                    (None, Some(err)) => out.push_str(&format!(
                        "[result #{}] {:?}: {}\n",
                        result.call_index, err.kind, err.message
                    )),
                    (None, None) => {
                        out.push_str(&format!("[result #{}] (empty)\n", result.call_index))
                    }
                },
                ContextEntry::Recall { hits, .. } => {
                    if !hits.is_empty() {
                        out.push_str("[memory]\n");
                        out.push_str(&hits.render());
                    }
                }
                ContextEntry::Feedback { message } => {
                    out.push_str(&format!("[feedback] {message}\n"));
                }
            }
        }
        out
    }
}

/// What a session entrypoint hands back: status plus answer or reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: Session,
    pub status: TerminalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub context: AgentContext,
}

impl SessionRecord {
    /// A one-line user-visible summary. Never empty.
    pub fn summary(&self) -> String {
        match self.status {
            TerminalState::Success => self.answer.clone().unwrap_or_default(),
            TerminalState::StepLimitExceeded => format!(
                "Stopped after reaching the step limit ({} steps) without a final answer.",
                self.session.max_steps
            ),
            TerminalState::Failure => format!(
                "Session failed: {}",
                self.failure_reason.as_deref().unwrap_or("unknown error")
            ),
            TerminalState::None => "Session did not terminate.".into(),
        }
    }
}
