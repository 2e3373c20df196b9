//! `ferrule run`: answer one query.

use anyhow::Context;
use ferrule_agent::{CancellationToken, RemoteDecisionService, SessionRunner};
use ferrule_config::AppConfig;
use ferrule_core::session::TerminalState;
use std::sync::Arc;
use tracing::warn;

pub async fn run(
    config: AppConfig,
    query: &str,
    max_steps: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let decision = RemoteDecisionService::from_config(&config.decision)?.context(
        "No decision service configured. Set [decision] url or FERRULE_DECISION_URL.",
    )?;

    let mut session = config.session_config();
    if let Some(max) = max_steps {
        session.max_steps = max;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling session");
            on_interrupt.cancel();
        }
    });

    let record = SessionRunner::new(session, Arc::new(decision))
        .run(query, &cancel)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", record.summary());
    }

    if record.status != TerminalState::Success {
        std::process::exit(2);
    }
    Ok(())
}
