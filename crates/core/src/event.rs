//! Domain event system: decoupled observation of sessions.
//!
//! Events are published when something interesting happens in a session.
//! Progress notifications from remote tool hosts are forwarded here too, so
//! callers can watch long-running calls without touching the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::session::TerminalState;
use crate::tool::ProgressEvent;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A session received its query
    SessionStarted {
        session_id: String,
        query: String,
        timestamp: DateTime<Utc>,
    },

    /// The planner chose a tool call
    StepDecided {
        session_id: String,
        step: u32,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call completed (successfully or not)
    ToolInvoked {
        session_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A remote tool host reported partial progress
    ToolProgress {
        session_id: String,
        event: ProgressEvent,
    },

    /// Chunks were added to the memory index
    MemoryIngested {
        source: String,
        chunks: usize,
        timestamp: DateTime<Utc>,
    },

    /// A session reached a terminal state
    SessionTerminated {
        session_id: String,
        state: TerminalState,
        steps: u32,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::SessionStarted { .. } => "session_started",
            DomainEvent::StepDecided { .. } => "step_decided",
            DomainEvent::ToolInvoked { .. } => "tool_invoked",
            DomainEvent::ToolProgress { .. } => "tool_progress",
            DomainEvent::MemoryIngested { .. } => "memory_ingested",
            DomainEvent::SessionTerminated { .. } => "session_terminated",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        let kind = event.kind();
        // No subscribers is fine
        let receivers = self.sender.send(Arc::new(event)).unwrap_or(0);
        trace!(event = kind, receivers, "Domain event published");
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
