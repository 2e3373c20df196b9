//! # Ferrule Core
//!
//! Domain types, traits, and error definitions for the Ferrule agent.
//! This crate has **no transport or storage dependencies**; it defines the
//! model every other crate implements against.
//!
//! ## Seams
//!
//! - [`ToolTransport`]: a channel to a tool host (local pipe or remote stream)
//! - [`Embedder`]: text → fixed-dimension vector
//! - [`DecisionService`]: context + catalog → next action
//!
//! Implementations live in their respective crates, so the agent loop can be
//! driven entirely by mocks in tests.

pub mod decision;
pub mod error;
pub mod event;
pub mod memory;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use decision::{CatalogSummary, Decision, DecisionRequest, DecisionService, ToolSummary};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::{DocumentChunk, Embedder, MemoryQueryResult, Metric, ScoredChunk};
pub use session::{AgentContext, ContextEntry, Session, SessionId, SessionRecord, TerminalState};
pub use tool::{
    FailureKind, ProgressEvent, ProgressSink, ToolCall, ToolDescriptor, ToolFailure, ToolResult,
    ToolStatus, ToolTransport,
};
