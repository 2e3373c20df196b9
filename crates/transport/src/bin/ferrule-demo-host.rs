//! Demo tool host speaking the stdio protocol.
//!
//! Tools: `echo` returns its arguments, `sleep` waits and reports progress,
//! `fail` always reports a tool error, `reload` announces a catalog change.

use async_trait::async_trait;
use ferrule_transport::host::{CallContext, HostedTool, ToolHandler, ToolHost};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    fn describe(&self) -> HostedTool {
        HostedTool {
            name: "echo".into(),
            description: "Return the given text unchanged.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    async fn call(&self, arguments: Value, _ctx: CallContext) -> Result<Value, String> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or("text is required")?;
        Ok(json!({ "text": text }))
    }
}

struct Sleep;

#[async_trait]
impl ToolHandler for Sleep {
    fn describe(&self) -> HostedTool {
        HostedTool {
            name: "sleep".into(),
            description: "Wait for the given number of milliseconds, reporting progress.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "ms": { "type": "integer", "minimum": 0 } },
                "required": ["ms"]
            }),
        }
    }

    async fn call(&self, arguments: Value, ctx: CallContext) -> Result<Value, String> {
        let ms = arguments
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or("ms is required")?;
        let steps = 4u64;
        for step in 1..=steps {
            tokio::time::sleep(Duration::from_millis(ms / steps)).await;
            ctx.progress(step as f64, Some(steps as f64), Some("sleeping"));
        }
        Ok(json!({ "slept_ms": ms }))
    }
}

struct Fail;

#[async_trait]
impl ToolHandler for Fail {
    fn describe(&self) -> HostedTool {
        HostedTool {
            name: "fail".into(),
            description: "Always report a tool error.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "message": { "type": "string" } }
            }),
        }
    }

    async fn call(&self, arguments: Value, _ctx: CallContext) -> Result<Value, String> {
        Err(arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("requested failure")
            .to_string())
    }
}

struct Reload;

#[async_trait]
impl ToolHandler for Reload {
    fn describe(&self) -> HostedTool {
        HostedTool {
            name: "reload".into(),
            description: "Announce that the tool list changed.".into(),
            input_schema: json!({ "type": "object" }),
        }
    }

    async fn call(&self, _arguments: Value, ctx: CallContext) -> Result<Value, String> {
        ctx.notify_tools_changed();
        Ok(json!("catalog change announced"))
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut host = ToolHost::new("ferrule-demo-host")
        .with_instructions("Demo tools for exercising the agent loop.");
    host.register(Arc::new(Echo));
    host.register(Arc::new(Sleep));
    host.register(Arc::new(Fail));
    host.register(Arc::new(Reload));
    host.serve_stdio().await
}
