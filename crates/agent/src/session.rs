//! Session entrypoint: one query plus a configuration bundle in, one
//! terminal record out.
//!
//! The runner builds transports for each session. They are discovered at
//! the start and closed on every exit path, so child processes and event
//! streams never outlive the session. Memory is different: a runner opens
//! the index once and every session it runs writes through that one engine.

use crate::loop_runner::AgentLoop;
use chrono::Utc;
use ferrule_config::{MemoryConfig, SessionConfig};
use ferrule_core::decision::DecisionService;
use ferrule_core::error::MemoryError;
use ferrule_core::event::{DomainEvent, EventBus};
use ferrule_core::memory::Embedder;
use ferrule_core::session::{AgentContext, Session, SessionRecord, TerminalState};
use ferrule_core::tool::ToolTransport;
use ferrule_memory::{HashingEmbedder, MemoryEngine, MemoryOptions};
use ferrule_transport::{RetryPolicy, ToolRegistry};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Open the persistent memory described by `config` with the built-in
/// hashing embedder.
pub fn open_memory(config: &MemoryConfig) -> Result<MemoryEngine, MemoryError> {
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embedding_dim));
    let options = MemoryOptions::from_config(config)?;
    let engine = MemoryEngine::open(&config.index_dir, embedder, options)?;
    if let Some(warning) = engine.load_warning() {
        warn!(dir = %config.index_dir.display(), "{warning}");
    }
    Ok(engine)
}

pub struct SessionRunner {
    config: SessionConfig,
    decision: Arc<dyn DecisionService>,
    event_bus: Arc<EventBus>,
    /// Opened on first use; `None` inside when the index could not be opened
    memory: OnceCell<Option<Arc<MemoryEngine>>>,
    transports: Option<Vec<Arc<dyn ToolTransport>>>,
}

impl SessionRunner {
    pub fn new(config: SessionConfig, decision: Arc<dyn DecisionService>) -> Self {
        Self {
            config,
            decision,
            event_bus: Arc::new(EventBus::default()),
            memory: OnceCell::new(),
            transports: None,
        }
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    /// Share an already-open memory engine instead of opening the one in
    /// the configuration.
    pub fn with_memory(mut self, memory: Arc<MemoryEngine>) -> Self {
        self.memory = OnceCell::from(Some(memory));
        self
    }

    /// Use these transports instead of building them from configuration.
    pub fn with_transports(mut self, transports: Vec<Arc<dyn ToolTransport>>) -> Self {
        self.transports = Some(transports);
        self
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Run `query` to a terminal record.
    pub async fn run(&self, query: &str, cancel: &CancellationToken) -> SessionRecord {
        let transports = match &self.transports {
            Some(transports) => transports.clone(),
            None => ferrule_transport::build_all(&self.config.transports, self.config.call_timeout),
        };
        let registry = Arc::new(
            ToolRegistry::new(transports).with_retry(RetryPolicy::from_config(&self.config.retry)),
        );

        let discovery = tokio::select! {
            _ = cancel.cancelled() => None,
            report = registry.discover_all() => Some(report),
        };
        let report = match discovery {
            Some(Ok(report)) => report,
            Some(Err(e)) => {
                registry.close_all().await;
                return self.failed_before_start(query, e.to_string());
            }
            None => {
                registry.close_all().await;
                return self.failed_before_start(query, "cancelled".into());
            }
        };
        for (transport, reason) in &report.degraded {
            warn!(transport = %transport, reason = %reason, "Transport unavailable for this session");
        }
        info!(tools = report.tools, degraded = report.degraded.len(), "Tool catalog ready");

        let mut agent = AgentLoop::new(
            Arc::clone(&self.decision),
            Arc::clone(&registry),
            Arc::clone(&self.event_bus),
        )
        .with_max_steps(self.config.max_steps)
        .with_call_timeout(self.config.call_timeout)
        .with_recall_top_k(self.config.recall_top_k)
        .with_remember_results(self.config.remember_results);
        if let Some(memory) = self.memory().await {
            agent = agent.with_memory(memory);
        }

        let record = agent.run(query, cancel).await;
        registry.close_all().await;
        record
    }

    /// The runner's memory engine, opening it on the first call.
    pub async fn memory(&self) -> Option<Arc<MemoryEngine>> {
        self.memory
            .get_or_init(|| async {
                match open_memory(&self.config.memory) {
                    Ok(engine) => Some(Arc::new(engine.with_events(Arc::clone(&self.event_bus)))),
                    Err(e) => {
                        warn!(error = %e, "Memory unavailable; running without recall");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// A record for a session that never reached the loop.
    fn failed_before_start(&self, query: &str, reason: String) -> SessionRecord {
        let mut session = Session::new(query, self.config.max_steps);
        session.state = TerminalState::Failure;
        warn!(session_id = %session.id, reason = %reason, "Session failed to start");
        self.event_bus.publish(DomainEvent::SessionTerminated {
            session_id: session.id.to_string(),
            state: TerminalState::Failure,
            steps: 0,
            timestamp: Utc::now(),
        });
        SessionRecord {
            session,
            status: TerminalState::Failure,
            answer: None,
            failure_reason: Some(reason),
            context: AgentContext::new(),
        }
    }
}

/// Run one session with transports built from `config`.
///
/// Pass the engine other sessions are writing to as `memory`; with `None`
/// the index in `config` is opened for this session alone.
pub async fn run_session(
    query: &str,
    config: &SessionConfig,
    decision: Arc<dyn DecisionService>,
    memory: Option<Arc<MemoryEngine>>,
) -> SessionRecord {
    let mut runner = SessionRunner::new(config.clone(), decision);
    if let Some(memory) = memory {
        runner = runner.with_memory(memory);
    }
    runner.run(query, &CancellationToken::new()).await
}
