//! The planner: asks the decision service for the next action and checks it
//! against the tool registry before the loop acts on it.

use ferrule_core::decision::{Decision, DecisionRequest, DecisionService};
use ferrule_core::error::{DecisionError, Error, PlanError};
use ferrule_core::memory::MemoryQueryResult;
use ferrule_core::session::{AgentContext, Session};
use ferrule_transport::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decision attempts per step: the first try plus one retry with feedback.
const PLAN_ATTEMPTS: u32 = 2;

/// A decision that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Call {
        name: String,
        arguments: Value,
        rationale: Option<String>,
    },
    Answer(String),
}

pub struct Planner {
    service: Arc<dyn DecisionService>,
    registry: Arc<ToolRegistry>,
}

impl Planner {
    pub fn new(service: Arc<dyn DecisionService>, registry: Arc<ToolRegistry>) -> Self {
        Self { service, registry }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Produce the next validated action.
    ///
    /// An unknown tool, arguments that fail the tool's schema, or a malformed
    /// reply is an invalid plan: the error is appended to `context` as
    /// feedback and the service is asked again. A second consecutive invalid
    /// plan is [`PlanError::Exhausted`]. Service outages are returned as-is.
    pub async fn plan(
        &self,
        session: &Session,
        context: &mut AgentContext,
        memory: Option<&MemoryQueryResult>,
    ) -> Result<Plan, Error> {
        let mut last = String::new();

        for attempt in 1..=PLAN_ATTEMPTS {
            let request = DecisionRequest {
                session_id: session.id.clone(),
                query: session.query.clone(),
                context: context.clone(),
                catalog: self.registry.summary().await,
                memory: memory.cloned(),
                remaining_steps: session.max_steps.saturating_sub(session.steps),
            };

            let rejection = match self.service.decide(&request).await {
                Ok(Decision::FinalAnswer { answer }) => return Ok(Plan::Answer(answer)),
                Ok(Decision::ToolCall {
                    name,
                    arguments,
                    rationale,
                }) => match self.registry.validate(&name, &arguments).await {
                    Ok(()) => {
                        debug!(session_id = %session.id, tool = %name, attempt, "Plan accepted");
                        return Ok(Plan::Call {
                            name,
                            arguments,
                            rationale,
                        });
                    }
                    Err(e) => e.to_string(),
                },
                Err(DecisionError::Malformed(reason)) => {
                    format!("the previous reply could not be parsed: {reason}")
                }
                Err(e) => return Err(e.into()),
            };

            warn!(session_id = %session.id, attempt, reason = %rejection, "Invalid plan");
            context.push_feedback(format!(
                "Invalid plan: {rejection}. Choose a tool from the catalog with arguments matching its schema, or give a final answer."
            ));
            last = rejection;
        }

        Err(PlanError::Exhausted {
            attempts: PLAN_ATTEMPTS,
            last,
        }
        .into())
    }
}
