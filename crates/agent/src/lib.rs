//! The Ferrule agent: planner, loop, and session entrypoint.
//!
//! A session runs Perceiving → Deciding → Acting → Remembering until the
//! decision service gives a final answer, a fatal error occurs, or the step
//! limit is reached. See [`SessionRunner`] for the usual way in.

pub mod loop_runner;
pub mod planner;
pub mod remote;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use loop_runner::{AgentLoop, LoopState};
pub use planner::{Plan, Planner};
pub use remote::RemoteDecisionService;
pub use session::{SessionRunner, open_memory, run_session};
pub use tokio_util::sync::CancellationToken;
