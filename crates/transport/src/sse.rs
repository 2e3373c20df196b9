//! Remote stream transport: a tool host reached over HTTP server-sent events.
//!
//! The client keeps one `GET` stream open. The host's first `endpoint`
//! event names the URL that requests are POSTed to; replies and progress
//! notifications come back as `message` events on the stream.

use crate::rpc::{self, Inbound, RpcClient};
use async_trait::async_trait;
use ferrule_core::error::TransportError;
use ferrule_core::tool::{ProgressSink, ToolCall, ToolDescriptor, ToolTransport};
use futures::StreamExt;
use reqwest::Url;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line arrives, so a character split
/// across network chunks decodes intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end])
                .trim_end_matches('\r')
                .to_string();

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".into()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                } else {
                    self.event = None;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }
}

/// A tool host reached over an HTTP event stream.
#[derive(Clone)]
pub struct SseTransport {
    inner: Arc<SseInner>,
}

struct SseInner {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    connect_timeout: Duration,
    http: reqwest::Client,
    client: RpcClient,
    endpoint: AsyncMutex<Option<Url>>,
    stream_task: AsyncMutex<Option<JoinHandle<()>>>,
    connect_lock: AsyncMutex<()>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl SseTransport {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_options(name, url, HashMap::new(), DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_options(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(SseInner {
                client: RpcClient::new(name.clone()),
                name,
                url: url.into(),
                headers,
                connect_timeout,
                http: reqwest::Client::new(),
                endpoint: AsyncMutex::new(None),
                stream_task: AsyncMutex::new(None),
                connect_lock: AsyncMutex::new(()),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the event stream is currently open.
    pub async fn is_connected(&self) -> bool {
        self.inner.endpoint.lock().await.is_some()
    }
}

impl SseInner {
    fn connection_error(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Connection {
            transport: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn protocol_error(&self, message: impl Into<String>) -> TransportError {
        TransportError::Protocol {
            transport: self.name.clone(),
            message: message.into(),
        }
    }

    fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder
    }

    async fn ensure_connected(self: &Arc<Self>) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                transport: self.name.clone(),
            });
        }
        if self.endpoint.lock().await.is_some() {
            return Ok(());
        }

        let base = Url::parse(&self.url)
            .map_err(|e| self.protocol_error(format!("invalid url '{}': {e}", self.url)))?;

        let request = self
            .apply_headers(self.http.get(base.clone()))
            .header("Accept", "text/event-stream");
        let response = tokio::time::timeout(self.connect_timeout, request.send())
            .await
            .map_err(|_| self.connection_error("timed out opening event stream"))?
            .map_err(|e| self.connection_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.connection_error(format!(
                "event stream refused with status {}",
                response.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reader = Arc::clone(self);
        let handle = tokio::spawn(async move {
            reader
                .stream_loop(response, base, endpoint_tx, generation)
                .await;
        });
        *self.stream_task.lock().await = Some(handle);

        let endpoint = match tokio::time::timeout(self.connect_timeout, endpoint_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                self.teardown("stream ended before endpoint").await;
                return Err(self.connection_error("stream ended before endpoint event"));
            }
            Err(_) => {
                self.teardown("no endpoint event").await;
                return Err(self.connection_error("timed out waiting for endpoint event"));
            }
        };
        debug!(transport = %self.name, endpoint = %endpoint, "Received message endpoint");
        *self.endpoint.lock().await = Some(endpoint);

        match self.handshake().await {
            Ok(()) => {
                info!(transport = %self.name, url = %self.url, "Connected to remote tool host");
                Ok(())
            }
            Err(err) => {
                self.teardown("handshake failed").await;
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> Result<(), TransportError> {
        let id = self.client.next_id();
        let rx = self.client.register(&id, None).await;
        let message = rpc::request(&id, "initialize", rpc::initialize_params());
        let result = self
            .round_trip(&id, rx, &message, self.connect_timeout, "initialize")
            .await
            .map_err(|e| match e {
                TransportError::Timeout { .. } => {
                    self.connection_error("initialize handshake timed out")
                }
                other => other,
            })?;
        self.client.set_initialized(&result).await;
        let initialized = rpc::notification("notifications/initialized", json!({}));
        tokio::time::timeout(self.connect_timeout, self.post(&initialized))
            .await
            .map_err(|_| self.connection_error("initialized notification timed out"))?
    }

    /// POST a request and wait for its reply, both bounded by `timeout`.
    ///
    /// The request is forgotten on any failure.
    async fn round_trip(
        &self,
        id: &str,
        rx: oneshot::Receiver<Result<Value, TransportError>>,
        message: &Value,
        timeout: Duration,
        tool: &str,
    ) -> Result<Value, TransportError> {
        let exchange = async {
            self.post(message).await?;
            self.client.wait(id, rx, timeout, tool).await
        };
        let outcome = tokio::time::timeout(timeout, exchange)
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Timeout {
                    tool: tool.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            });
        if outcome.is_err() {
            self.client.forget(id).await;
        }
        outcome
    }

    async fn stream_loop(
        self: Arc<Self>,
        response: reqwest::Response,
        base: Url,
        endpoint_tx: oneshot::Sender<Url>,
        generation: u64,
    ) {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut decoder = SseDecoder::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(transport = %self.name, error = %e, "Event stream interrupted");
                    break;
                }
            };

            for event in decoder.feed(&bytes) {
                match event.event.as_str() {
                    "endpoint" => match base.join(event.data.trim()) {
                        Ok(url) => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(url);
                            }
                        }
                        Err(e) => {
                            warn!(transport = %self.name, error = %e, "Invalid endpoint event");
                        }
                    },
                    "message" => match serde_json::from_str::<Value>(&event.data) {
                        Ok(value) => {
                            if let Inbound::Reply(reply) = self.client.handle_inbound(value).await {
                                match tokio::time::timeout(self.connect_timeout, self.post(&reply)).await {
                                    Ok(Ok(())) => {}
                                    Ok(Err(e)) => {
                                        warn!(transport = %self.name, error = %e, "Failed to answer tool host");
                                    }
                                    Err(_) => {
                                        warn!(transport = %self.name, "Timed out answering tool host");
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(transport = %self.name, error = %e, "Received invalid JSON event");
                        }
                    },
                    other => {
                        debug!(transport = %self.name, event = other, "Ignoring event");
                    }
                }
            }
        }

        debug!(transport = %self.name, "Event stream ended");
        if self.generation.load(Ordering::SeqCst) == generation {
            self.endpoint.lock().await.take();
            self.client.reset("event stream closed").await;
        }
    }

    async fn post(&self, message: &Value) -> Result<(), TransportError> {
        let endpoint = self
            .endpoint
            .lock()
            .await
            .clone()
            .ok_or_else(|| self.connection_error("event stream is not open"))?;
        let response = self
            .apply_headers(self.http.post(endpoint))
            .json(message)
            .send()
            .await
            .map_err(|e| self.connection_error(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(self.connection_error(format!("host returned {status}")))
        } else {
            Err(self.protocol_error(format!("host rejected message with {status}")))
        }
    }

    async fn teardown(&self, reason: &str) {
        self.endpoint.lock().await.take();
        if let Some(handle) = self.stream_task.lock().await.take() {
            handle.abort();
        }
        self.client.reset(reason).await;
    }
}

#[async_trait]
impl ToolTransport for SseTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn discover(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        self.inner.ensure_connected().await?;
        self.inner.client.mark_catalog_fresh();

        let client = &self.inner.client;
        let id = client.next_id();
        let rx = client.register(&id, None).await;
        let message = rpc::request(&id, "tools/list", json!({}));
        let result = self
            .inner
            .round_trip(&id, rx, &message, self.inner.connect_timeout, "tools/list")
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
        self.inner.ensure_connected().await?;

        let client = &self.inner.client;
        let id = client.next_id();
        let rx = client.register(&id, progress.map(|sink| (sink, call))).await;
        let message = rpc::request(&id, "tools/call", rpc::call_params(call, &id));
        let result = self
            .inner
            .round_trip(&id, rx, &message, timeout, &call.name)
            .await?;
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
        info!(transport = %self.inner.name, "Disconnected from remote tool host");
    }
}
