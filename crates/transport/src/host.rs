//! Serving side of the stdio protocol.
//!
//! [`ToolHost`] answers `initialize`, `tools/list` and `tools/call` over any
//! line-oriented reader/writer pair, using the same framing the client
//! transport speaks. Calls run concurrently; replies are written in
//! completion order.

use crate::rpc::{self, INVALID_PARAMS, METHOD_NOT_FOUND, PROTOCOL_VERSION};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A tool as a host advertises it.
#[derive(Debug, Clone)]
pub struct HostedTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Per-call handle for talking back to the client while a tool runs.
#[derive(Clone)]
pub struct CallContext {
    outbound: mpsc::UnboundedSender<Value>,
    progress_token: Option<Value>,
}

impl CallContext {
    /// Report partial progress. A no-op if the client sent no token.
    pub fn progress(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        let Some(token) = &self.progress_token else {
            return;
        };
        let mut params = json!({ "progressToken": token, "progress": progress });
        if let Some(total) = total {
            params["total"] = json!(total);
        }
        if let Some(message) = message {
            params["message"] = json!(message);
        }
        let _ = self
            .outbound
            .send(rpc::notification("notifications/progress", params));
    }

    /// Tell the client this host's tool list changed.
    pub fn notify_tools_changed(&self) {
        let _ = self.outbound.send(rpc::notification(
            "notifications/tools/list_changed",
            json!({}),
        ));
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn describe(&self) -> HostedTool;

    /// Run the tool. `Err` is reported to the client as a tool error.
    async fn call(&self, arguments: Value, ctx: CallContext) -> Result<Value, String>;
}

pub struct ToolHost {
    name: String,
    version: String,
    instructions: Option<String>,
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            handlers: BTreeMap::new(),
        }
    }

    pub fn with_instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = Some(text.into());
        self
    }

    /// Register a handler. Replaces any handler with the same tool name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.describe().name;
        self.handlers.insert(name, handler);
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Serve on this process's stdin/stdout until stdin closes.
    pub async fn serve_stdio(self) -> std::io::Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC until `reader` reaches EOF.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let host = Arc::new(self);
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = rx.recv().await {
                let line = match rpc::encode_line(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode outbound message");
                        continue;
                    }
                };
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut lines = BufReader::new(reader).lines();
        while let Some(raw) = lines.next_line().await? {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "Received invalid JSON from client");
                    continue;
                }
            };

            let id = message.get("id").cloned();
            let method = message
                .get("method")
                .and_then(Value::as_str)
                .map(str::to_string);
            let (Some(id), Some(method)) = (id, method) else {
                // Notifications and stray responses need no answer.
                continue;
            };
            let params = message.get("params").cloned().unwrap_or(Value::Null);

            let host = Arc::clone(&host);
            let outbound = tx.clone();
            tokio::spawn(async move {
                let reply = host.handle(id, &method, params, outbound.clone()).await;
                let _ = outbound.send(reply);
            });
        }

        debug!(host = %host.name, "Client closed input, shutting down");
        drop(tx);
        match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        }
    }

    async fn handle(
        &self,
        id: Value,
        method: &str,
        params: Value,
        outbound: mpsc::UnboundedSender<Value>,
    ) -> Value {
        match method {
            "initialize" => {
                let mut result = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": { "name": self.name, "version": self.version },
                    "capabilities": { "tools": { "listChanged": true } },
                });
                if let Some(text) = &self.instructions {
                    result["instructions"] = json!(text);
                }
                rpc::success(id, result)
            }
            "ping" => rpc::success(id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .handlers
                    .values()
                    .map(|h| {
                        let tool = h.describe();
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "inputSchema": tool.input_schema,
                        })
                    })
                    .collect();
                rpc::success(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return rpc::failure(id, INVALID_PARAMS, "missing tool name");
                };
                let Some(handler) = self.handlers.get(name) else {
                    return rpc::failure(id, INVALID_PARAMS, format!("unknown tool '{name}'"));
                };
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
                let ctx = CallContext {
                    outbound,
                    progress_token: params
                        .get("_meta")
                        .and_then(|m| m.get("progressToken"))
                        .cloned(),
                };
                debug!(host = %self.name, tool = name, "Handling tool call");
                rpc::success(id, call_result(handler.call(arguments, ctx).await))
            }
            other => rpc::failure(id, METHOD_NOT_FOUND, format!("method '{other}' not found")),
        }
    }
}

fn call_result(outcome: Result<Value, String>) -> Value {
    match outcome {
        Ok(Value::String(text)) => json!({
            "content": [{ "type": "text", "text": text }],
            "isError": false,
        }),
        Ok(value) => {
            let text = value.to_string();
            let mut result = json!({
                "content": [{ "type": "text", "text": text }],
                "isError": false,
            });
            if value.is_object() {
                result["structuredContent"] = value;
            }
            result
        }
        Err(message) => json!({
            "content": [{ "type": "text", "text": message }],
            "isError": true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    struct Upper;

    #[async_trait]
    impl ToolHandler for Upper {
        fn describe(&self) -> HostedTool {
            HostedTool {
                name: "upper".into(),
                description: "Uppercase text".into(),
                input_schema: json!({ "type": "object", "required": ["text"] }),
            }
        }

        async fn call(&self, arguments: Value, ctx: CallContext) -> Result<Value, String> {
            ctx.progress(1.0, Some(1.0), Some("working"));
            match arguments.get("text").and_then(Value::as_str) {
                Some(text) => Ok(json!({ "text": text.to_uppercase() })),
                None => Err("text is required".into()),
            }
        }
    }

    /// Run a host over in-memory pipes and return the client ends.
    fn spawn_host() -> (tokio::io::DuplexStream, tokio::io::Lines<BufReader<tokio::io::DuplexStream>>) {
        let (client_out, host_in) = duplex(4096);
        let (host_out, client_in) = duplex(4096);
        let mut host = ToolHost::new("test-host").with_instructions("Be nice.");
        host.register(Arc::new(Upper));
        tokio::spawn(host.serve(host_in, host_out));
        (client_out, BufReader::new(client_in).lines())
    }

    async fn send(writer: &mut tokio::io::DuplexStream, message: Value) {
        let line = rpc::encode_line(&message).unwrap();
        writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn next(lines: &mut tokio::io::Lines<BufReader<tokio::io::DuplexStream>>) -> Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn initialize_returns_instructions() {
        let (mut w, mut r) = spawn_host();
        send(&mut w, rpc::request("1", "initialize", rpc::initialize_params())).await;
        let reply = next(&mut r).await;
        assert_eq!(reply["id"], "1");
        assert_eq!(reply["result"]["instructions"], "Be nice.");
    }

    #[tokio::test]
    async fn list_and_call_round_trip() {
        let (mut w, mut r) = spawn_host();
        send(&mut w, rpc::request("1", "tools/list", json!({}))).await;
        let reply = next(&mut r).await;
        assert_eq!(reply["result"]["tools"][0]["name"], "upper");

        send(
            &mut w,
            rpc::request(
                "2",
                "tools/call",
                json!({ "name": "upper", "arguments": { "text": "abc" }, "_meta": { "progressToken": "2" } }),
            ),
        )
        .await;
        let progress = next(&mut r).await;
        assert_eq!(progress["method"], "notifications/progress");
        assert_eq!(progress["params"]["progressToken"], "2");
        let reply = next(&mut r).await;
        assert_eq!(reply["result"]["structuredContent"]["text"], "ABC");
        assert_eq!(reply["result"]["isError"], false);
    }

    #[tokio::test]
    async fn handler_error_sets_is_error() {
        let (mut w, mut r) = spawn_host();
        send(
            &mut w,
            rpc::request("5", "tools/call", json!({ "name": "upper", "arguments": {} })),
        )
        .await;
        // No progress token, so no progress notification precedes the reply.
        let reply = next(&mut r).await;
        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(reply["result"]["content"][0]["text"], "text is required");
    }

    #[tokio::test]
    async fn unknown_tool_and_method_are_rpc_errors() {
        let (mut w, mut r) = spawn_host();
        send(&mut w, rpc::request("1", "tools/call", json!({ "name": "nope" }))).await;
        assert_eq!(next(&mut r).await["error"]["code"], INVALID_PARAMS);
        send(&mut w, rpc::request("2", "resources/list", json!({}))).await;
        assert_eq!(next(&mut r).await["error"]["code"], METHOD_NOT_FOUND);
    }

    #[test]
    fn string_results_are_plain_text() {
        let result = call_result(Ok(json!("hello")));
        assert_eq!(result["content"][0]["text"], "hello");
        assert!(result.get("structuredContent").is_none());
    }
}
