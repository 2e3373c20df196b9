//! Local pipe transport: a tool host launched as a child process.
//!
//! Messages are newline-delimited JSON-RPC on the child's stdin/stdout. The
//! child is spawned lazily on first use and respawned after it exits, so a
//! retry after a broken pipe reconnects transparently.

use crate::rpc::{self, Inbound, RpcClient};
use async_trait::async_trait;
use ferrule_core::error::TransportError;
use ferrule_core::tool::{ProgressSink, ToolCall, ToolDescriptor, ToolTransport};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to launch a tool host process.
#[derive(Debug, Clone)]
pub struct StdioLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
    /// Bound on spawn + handshake + catalog listing
    pub connect_timeout: Duration,
}

impl StdioLaunch {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            workdir: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A tool host reached over a child process's standard streams.
#[derive(Clone)]
pub struct StdioTransport {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    name: String,
    launch: StdioLaunch,
    client: RpcClient,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    connect_lock: AsyncMutex<()>,
    /// Bumped on every spawn so a stale reader cannot tear down its successor
    generation: AtomicU64,
    closed: AtomicBool,
}

impl StdioTransport {
    pub fn new(name: impl Into<String>, launch: StdioLaunch) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(StdioInner {
                client: RpcClient::new(name.clone()),
                name,
                launch,
                child: AsyncMutex::new(None),
                writer: AsyncMutex::new(None),
                connect_lock: AsyncMutex::new(()),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether a child process is currently attached.
    pub async fn is_running(&self) -> bool {
        self.inner.child.lock().await.is_some()
    }
}

impl StdioInner {
    fn connection_error(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Connection {
            transport: self.name.clone(),
            reason: reason.into(),
        }
    }

    async fn ensure_running(self: &Arc<Self>) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                transport: self.name.clone(),
            });
        }
        if self.child.lock().await.is_some() {
            return Ok(());
        }

        let launch = &self.launch;
        let mut command = Command::new(&launch.command);
        command
            .args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &launch.workdir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            self.connection_error(format!("failed to spawn '{}': {e}", launch.command))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.connection_error("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.connection_error("failed to capture child stdout"))?;

        *self.writer.lock().await = Some(BufWriter::new(stdin));
        *self.child.lock().await = Some(child);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reader = Arc::clone(self);
        tokio::spawn(async move {
            reader.reader_loop(stdout, generation).await;
        });

        match self.handshake().await {
            Ok(()) => {
                info!(transport = %self.name, command = %self.launch.command, "Tool host started");
                Ok(())
            }
            Err(err) => {
                self.teardown("handshake failed").await;
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> Result<(), TransportError> {
        let result = self
            .request("initialize", rpc::initialize_params(), self.launch.connect_timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout { .. } => {
                    self.connection_error("initialize handshake timed out")
                }
                other => other,
            })?;
        self.client.set_initialized(&result).await;
        self.write(&rpc::notification("notifications/initialized", json!({})))
            .await
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.client.next_id();
        let rx = self.client.register(&id, None).await;
        if let Err(err) = self.write(&rpc::request(&id, method, params)).await {
            self.client.forget(&id).await;
            return Err(err);
        }
        self.client.wait(&id, rx, timeout, method).await
    }

    async fn write(&self, message: &Value) -> Result<(), TransportError> {
        let line = rpc::encode_line(message).map_err(|e| TransportError::Protocol {
            transport: self.name.clone(),
            message: e.to_string(),
        })?;
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| self.connection_error("tool host is not running"))?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.connection_error(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.connection_error(format!("flush failed: {e}")))
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout, generation: u64) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let raw = match lines.next_line().await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    warn!(transport = %self.name, error = %e, "Failed to read from tool host");
                    break;
                }
            };
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with('{') {
                debug!(transport = %self.name, line = trimmed, "Skipping non-JSON line");
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => {
                    if let Inbound::Reply(reply) = self.client.handle_inbound(value).await {
                        if let Err(e) = self.write(&reply).await {
                            warn!(transport = %self.name, error = %e, "Failed to answer tool host");
                        }
                    }
                }
                Err(e) => {
                    warn!(transport = %self.name, error = %e, "Received invalid JSON from tool host");
                }
            }
        }

        debug!(transport = %self.name, "Tool host stream ended");
        if self.generation.load(Ordering::SeqCst) == generation {
            self.teardown("tool host exited").await;
        }
    }

    /// Drop the child and fail everything in flight. The next use respawns.
    async fn teardown(&self, reason: &str) {
        self.writer.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.client.reset(reason).await;
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn discover(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        self.inner.ensure_running().await?;
        self.inner.client.mark_catalog_fresh();
        let result = self
            .inner
            .request("tools/list", json!({}), self.inner.launch.connect_timeout)
            .await?;
        let tools = rpc::parse_tool_list(&result, &self.inner.name);
        debug!(transport = %self.inner.name, count = tools.len(), "Discovered tools");
        Ok(tools)
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        timeout: Duration,
        progress: Option<ProgressSink>,
    ) -> Result<Value, TransportError> {
        self.inner.ensure_running().await?;

        let client = &self.inner.client;
        let id = client.next_id();
        let rx = client.register(&id, progress.map(|sink| (sink, call))).await;
        let message = rpc::request(&id, "tools/call", rpc::call_params(call, &id));
        if let Err(err) = self.inner.write(&message).await {
            client.forget(&id).await;
            return Err(err);
        }

        let result = client.wait(&id, rx, timeout, &call.name).await?;
        rpc::interpret_call_result(&call.name, result)
    }

    async fn instructions(&self) -> Option<String> {
        self.inner.client.instructions().await
    }

    fn catalog_stale(&self) -> bool {
        self.inner.client.catalog_stale()
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.teardown("transport closed").await;
        info!(transport = %self.inner.name, "Tool host stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_failure_is_a_connection_error() {
        let transport = StdioTransport::new("missing", StdioLaunch::new("/definitely/not/a/real/binary"));
        let err = transport.discover().await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
        assert!(!transport.is_running().await);
    }

    #[tokio::test]
    async fn closed_transport_refuses_work() {
        let transport = StdioTransport::new("t", StdioLaunch::new("/definitely/not/a/real/binary"));
        transport.close().await;
        transport.close().await;
        let err = transport.discover().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed { .. }));
        assert!(!err.is_transient());
    }
}
