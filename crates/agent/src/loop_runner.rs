//! The agent loop: Perceiving → Deciding → Acting → Remembering → … → Terminated.

use crate::planner::{Plan, Planner};
use chrono::Utc;
use ferrule_core::decision::DecisionService;
use ferrule_core::event::{DomainEvent, EventBus};
use ferrule_core::memory::MemoryQueryResult;
use ferrule_core::session::{AgentContext, Session, SessionRecord, TerminalState};
use ferrule_core::tool::{ProgressEvent, ProgressSink, ToolCall, ToolResult};
use ferrule_memory::MemoryEngine;
use ferrule_transport::ToolRegistry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the loop is. Acting and Remembering carry the step's data.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Perceiving,
    Deciding,
    Acting(ToolCall),
    Remembering(ToolResult),
    Terminated(TerminalState),
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Perceiving => write!(f, "perceiving"),
            LoopState::Deciding => write!(f, "deciding"),
            LoopState::Acting(call) => write!(f, "acting({})", call.name),
            LoopState::Remembering(result) => write!(f, "remembering(#{})", result.call_index),
            LoopState::Terminated(state) => write!(f, "terminated({state:?})"),
        }
    }
}

/// Runs sessions against one registry and decision service.
pub struct AgentLoop {
    planner: Planner,
    registry: Arc<ToolRegistry>,
    memory: Option<Arc<MemoryEngine>>,
    event_bus: Arc<EventBus>,
    max_steps: u32,
    call_timeout: Duration,
    recall_top_k: usize,
    remember_results: bool,
}

/// Mutable per-session bookkeeping threaded through the states.
struct Run {
    session: Session,
    context: AgentContext,
    recall: Option<MemoryQueryResult>,
    next_call_index: u64,
    answer: Option<String>,
    failure: Option<String>,
}

impl Run {
    fn fail(&mut self, reason: impl Into<String>) -> LoopState {
        self.failure = Some(reason.into());
        LoopState::Terminated(TerminalState::Failure)
    }
}

impl AgentLoop {
    pub fn new(
        decision: Arc<dyn DecisionService>,
        registry: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            planner: Planner::new(decision, Arc::clone(&registry)),
            registry,
            memory: None,
            event_bus,
            max_steps: 12,
            call_timeout: Duration::from_secs(30),
            recall_top_k: 4,
            remember_results: true,
        }
    }

    /// Set the maximum number of Deciding→Acting transitions per session.
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Attach the memory engine for recall and result ingestion.
    pub fn with_memory(mut self, memory: Arc<MemoryEngine>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_recall_top_k(mut self, top_k: usize) -> Self {
        self.recall_top_k = top_k;
        self
    }

    /// Enable or disable ingesting successful tool payloads into memory.
    pub fn with_remember_results(mut self, enabled: bool) -> Self {
        self.remember_results = enabled;
        self
    }

    /// Run one session to completion.
    ///
    /// Always returns a terminated record. Cancelling `cancel` ends the
    /// session with `Failure("cancelled")` at the next suspension point.
    pub async fn run(&self, query: &str, cancel: &CancellationToken) -> SessionRecord {
        let mut run = Run {
            session: Session::new(query, self.max_steps),
            context: AgentContext::new(),
            recall: None,
            next_call_index: 1,
            answer: None,
            failure: None,
        };

        info!(
            session_id = %run.session.id,
            max_steps = self.max_steps,
            planner = self.planner.service_name(),
            "Session started"
        );
        self.event_bus.publish(DomainEvent::SessionStarted {
            session_id: run.session.id.to_string(),
            query: query.to_string(),
            timestamp: Utc::now(),
        });

        let mut state = LoopState::Perceiving;
        let terminal = loop {
            if cancel.is_cancelled() && !matches!(state, LoopState::Terminated(_)) {
                state = run.fail("cancelled");
            }

            debug!(session_id = %run.session.id, step = run.session.steps, state = %state, "Loop state");
            state = match state {
                LoopState::Perceiving => self.perceive(&mut run).await,
                LoopState::Deciding => self.decide(&mut run, cancel).await,
                LoopState::Acting(call) => self.act(&mut run, call, cancel).await,
                LoopState::Remembering(result) => self.remember(&mut run, result).await,
                LoopState::Terminated(terminal) => break terminal,
            };
        };

        run.session.state = terminal;
        info!(
            session_id = %run.session.id,
            state = ?terminal,
            steps = run.session.steps,
            reason = run.failure.as_deref().unwrap_or(""),
            "Session terminated"
        );
        self.event_bus.publish(DomainEvent::SessionTerminated {
            session_id: run.session.id.to_string(),
            state: terminal,
            steps: run.session.steps,
            timestamp: Utc::now(),
        });

        SessionRecord {
            session: run.session,
            status: terminal,
            answer: run.answer,
            failure_reason: run.failure,
            context: run.context,
        }
    }

    async fn perceive(&self, run: &mut Run) -> LoopState {
        let framing = format!(
            "User query: {}\nAnswer it using the tools in the catalog. Reply with one tool call at a time, or a final answer when done.",
            run.session.query
        );
        run.context.push_perception(framing);

        run.recall = self.recall(&run.session.query).await;
        if let Some(hits) = &run.recall {
            run.context.push_recall(run.session.query.clone(), hits.clone());
        }
        LoopState::Deciding
    }

    async fn decide(&self, run: &mut Run, cancel: &CancellationToken) -> LoopState {
        // Hosts that announced a catalog change are re-discovered between steps.
        let refresh = tokio::select! {
            _ = cancel.cancelled() => None,
            refresh = self.registry.refresh_stale() => Some(refresh),
        };
        match refresh {
            None => return run.fail("cancelled"),
            Some(Ok(refreshed)) if !refreshed.is_empty() => {
                info!(session_id = %run.session.id, transports = ?refreshed, "Refreshed tool catalogs");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return run.fail(e.to_string()),
        }

        let plan = tokio::select! {
            _ = cancel.cancelled() => None,
            plan = self.planner.plan(&run.session, &mut run.context, run.recall.as_ref()) => Some(plan),
        };
        let Some(plan) = plan else {
            return run.fail("cancelled");
        };

        match plan {
            Ok(Plan::Answer(answer)) => {
                run.answer = Some(answer);
                LoopState::Terminated(TerminalState::Success)
            }
            Ok(Plan::Call { name, .. }) if run.session.steps_exhausted() => {
                warn!(
                    session_id = %run.session.id,
                    tool = %name,
                    max_steps = run.session.max_steps,
                    "Step limit reached; call not dispatched"
                );
                LoopState::Terminated(TerminalState::StepLimitExceeded)
            }
            Ok(Plan::Call {
                name,
                arguments,
                rationale,
            }) => {
                let call = ToolCall {
                    index: run.next_call_index,
                    name,
                    arguments,
                };
                run.next_call_index += 1;
                run.session.steps += 1;
                run.context.push_decision(call.clone(), rationale);

                self.event_bus.publish(DomainEvent::StepDecided {
                    session_id: run.session.id.to_string(),
                    step: run.session.steps,
                    tool_name: call.name.clone(),
                    timestamp: Utc::now(),
                });
                LoopState::Acting(call)
            }
            Err(e) => run.fail(e.to_string()),
        }
    }

    async fn act(&self, run: &mut Run, call: ToolCall, cancel: &CancellationToken) -> LoopState {
        let progress = self.progress_sink(&run.session);
        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.registry.dispatch(&call, self.call_timeout, Some(progress)) => Some(result),
        };
        let Some(result) = result else {
            return run.fail("cancelled");
        };

        self.event_bus.publish(DomainEvent::ToolInvoked {
            session_id: run.session.id.to_string(),
            tool_name: call.name.clone(),
            success: result.is_ok(),
            duration_ms: result.duration_ms,
            timestamp: Utc::now(),
        });
        if let Some(failure) = &result.error {
            warn!(
                session_id = %run.session.id,
                tool = %call.name,
                kind = ?failure.kind,
                error = %failure.message,
                "Tool call failed; handing the failure to the planner"
            );
        }

        match run.context.push_result(result.clone()) {
            Ok(()) => LoopState::Remembering(result),
            Err(e) => run.fail(e.to_string()),
        }
    }

    async fn remember(&self, run: &mut Run, result: ToolResult) -> LoopState {
        let Some(memory) = &self.memory else {
            return LoopState::Deciding;
        };

        if self.remember_results {
            if let Some(text) = result.payload_text() {
                let source = format!(
                    "session:{}/call:{}:{}",
                    run.session.id, result.call_index, result.tool
                );
                match memory.ingest(&source, &text).await {
                    Ok(chunks) => debug!(session_id = %run.session.id, source = %source, chunks, "Remembered tool result"),
                    Err(e) => warn!(session_id = %run.session.id, error = %e, "Failed to remember tool result"),
                }
            }
        }

        run.recall = self.recall(&run.session.query).await;
        LoopState::Deciding
    }

    async fn recall(&self, text: &str) -> Option<MemoryQueryResult> {
        let memory = self.memory.as_ref()?;
        if self.recall_top_k == 0 {
            return None;
        }
        match memory.query(text, self.recall_top_k).await {
            Ok(hits) if hits.is_empty() => None,
            Ok(hits) => {
                debug!(count = hits.len(), "Recalled memory for planning");
                Some(hits)
            }
            Err(e) => {
                warn!(error = %e, "Memory recall failed");
                None
            }
        }
    }

    fn progress_sink(&self, session: &Session) -> ProgressSink {
        let bus = Arc::clone(&self.event_bus);
        let session_id = session.id.to_string();
        Arc::new(move |event: ProgressEvent| {
            bus.publish(DomainEvent::ToolProgress {
                session_id: session_id.clone(),
                event,
            });
        })
    }
}
