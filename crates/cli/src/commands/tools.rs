//! `ferrule tools`: discover every enabled transport and list the catalog.

use ferrule_config::AppConfig;
use ferrule_transport::{RetryPolicy, ToolRegistry};

pub async fn run(config: AppConfig, json: bool) -> anyhow::Result<()> {
    let session = config.session_config();
    let transports = ferrule_transport::build_all(&session.transports, session.call_timeout);
    if transports.is_empty() {
        println!("No transports configured. Add [[transports]] entries to the config file.");
        return Ok(());
    }

    let registry =
        ToolRegistry::new(transports).with_retry(RetryPolicy::from_config(&session.retry));
    let report = registry.discover_all().await;
    let summary = registry.summary().await;
    registry.close_all().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} tools", report.tools);
        print!("{}", summary.render());
    }
    for (transport, reason) in &report.degraded {
        eprintln!("unavailable: {transport}: {reason}");
    }
    Ok(())
}
