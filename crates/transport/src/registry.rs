//! Tool registry: one namespace over every configured transport.
//!
//! Descriptors are resolved per transport on (re)connect and looked up by
//! name at dispatch time. Two transports declaring the same name is a
//! configuration error, never silent shadowing.

use crate::retry::RetryPolicy;
use crate::schema::ArgumentValidator;
use ferrule_core::decision::{CatalogSummary, ToolSummary};
use ferrule_core::error::{PlanError, RegistryError, TransportError};
use ferrule_core::tool::{FailureKind, ProgressSink, ToolCall, ToolDescriptor, ToolResult, ToolTransport};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct Entry {
    descriptor: ToolDescriptor,
    validator: Arc<ArgumentValidator>,
}

#[derive(Default)]
struct Catalog {
    tools: BTreeMap<String, Entry>,
    instructions: BTreeMap<String, String>,
    /// Transports whose last discovery or call failed to connect
    disconnected: HashSet<String>,
}

impl Catalog {
    fn remove_transport(&mut self, transport: &str) -> usize {
        let before = self.tools.len();
        self.tools.retain(|_, e| e.descriptor.transport != transport);
        self.instructions.remove(transport);
        before - self.tools.len()
    }

    /// Entries for `transport`'s descriptors, checked against the tools of
    /// every other transport. The catalog itself is left untouched.
    fn stage(
        &self,
        transport: &str,
        descriptors: Vec<ToolDescriptor>,
    ) -> Result<BTreeMap<String, Entry>, RegistryError> {
        let mut staged: BTreeMap<String, Entry> = BTreeMap::new();
        for descriptor in descriptors {
            let existing = self
                .tools
                .get(&descriptor.name)
                .filter(|e| e.descriptor.transport != transport)
                .or_else(|| staged.get(&descriptor.name));
            if let Some(existing) = existing {
                return Err(RegistryError::Collision {
                    tool: descriptor.name.clone(),
                    first: existing.descriptor.transport.clone(),
                    second: descriptor.transport.clone(),
                });
            }
            let validator = Arc::new(ArgumentValidator::compile(&descriptor));
            staged.insert(descriptor.name.clone(), Entry { descriptor, validator });
        }
        Ok(staged)
    }
}

/// Outcome of discovering every transport.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub tools: usize,
    /// Transports whose discovery failed, with the reason
    pub degraded: Vec<(String, String)>,
}

impl DiscoveryReport {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

pub struct ToolRegistry {
    transports: Vec<Arc<dyn ToolTransport>>,
    catalog: RwLock<Catalog>,
    retry: RetryPolicy,
}

impl ToolRegistry {
    pub fn new(transports: Vec<Arc<dyn ToolTransport>>) -> Self {
        Self {
            transports,
            catalog: RwLock::new(Catalog::default()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn transports(&self) -> &[Arc<dyn ToolTransport>] {
        &self.transports
    }

    fn transport(&self, name: &str) -> Option<&Arc<dyn ToolTransport>> {
        self.transports.iter().find(|t| t.name() == name)
    }

    async fn discover_one(
        &self,
        transport: &Arc<dyn ToolTransport>,
    ) -> Result<(Vec<ToolDescriptor>, Option<String>), TransportError> {
        let label = format!("discover:{}", transport.name());
        let tools = self.retry.run(&label, |_| transport.discover()).await?;
        let instructions = transport.instructions().await;
        Ok((tools, instructions))
    }

    /// Discover every transport in parallel and rebuild the namespace.
    ///
    /// A transport that fails discovery contributes no tools; the others
    /// stay usable. A name collision fails the whole registry.
    pub async fn discover_all(&self) -> Result<DiscoveryReport, RegistryError> {
        let outcomes = join_all(self.transports.iter().map(|t| self.discover_one(t))).await;

        let mut catalog = Catalog::default();
        let mut report = DiscoveryReport::default();

        for (transport, outcome) in self.transports.iter().zip(outcomes) {
            match outcome {
                Ok((tools, instructions)) => {
                    debug!(transport = transport.name(), count = tools.len(), "Transport catalog loaded");
                    let staged = catalog.stage(transport.name(), tools)?;
                    catalog.tools.extend(staged);
                    if let Some(text) = instructions.filter(|t| !t.trim().is_empty()) {
                        catalog.instructions.insert(transport.name().to_string(), text);
                    }
                }
                Err(err) => {
                    warn!(transport = transport.name(), error = %err, "Discovery failed, transport degraded");
                    catalog.disconnected.insert(transport.name().to_string());
                    report
                        .degraded
                        .push((transport.name().to_string(), err.to_string()));
                }
            }
        }

        report.tools = catalog.tools.len();
        info!(
            tools = report.tools,
            transports = self.transports.len(),
            degraded = report.degraded.len(),
            "Tool registry ready"
        );
        *self.catalog.write().await = catalog;
        Ok(report)
    }

    /// Re-discover one transport, replacing its descriptors.
    ///
    /// If discovery fails the transport's old descriptors are dropped. If the
    /// new catalog collides with another transport's, the old descriptors
    /// stay and the collision is returned.
    pub async fn refresh_transport(&self, name: &str) -> Result<usize, RegistryError> {
        let transport = self
            .transport(name)
            .ok_or_else(|| RegistryError::UnknownTransport(name.to_string()))?;

        let outcome = self.discover_one(transport).await;
        let mut catalog = self.catalog.write().await;

        match outcome {
            Ok((tools, instructions)) => {
                let staged = catalog.stage(name, tools).inspect_err(|err| {
                    warn!(transport = name, error = %err, "Refreshed catalog rejected, keeping the old one");
                })?;
                let count = staged.len();
                let removed = catalog.remove_transport(name);
                catalog.tools.extend(staged);
                if let Some(text) = instructions.filter(|t| !t.trim().is_empty()) {
                    catalog.instructions.insert(name.to_string(), text);
                }
                catalog.disconnected.remove(name);
                info!(transport = name, removed, added = count, "Transport catalog refreshed");
                Ok(count)
            }
            Err(err) => {
                let removed = catalog.remove_transport(name);
                warn!(transport = name, error = %err, removed, "Refresh failed, dropping descriptors");
                catalog.disconnected.insert(name.to_string());
                Ok(0)
            }
        }
    }

    /// Refresh every transport that announced a catalog change or lost its
    /// connection. Returns the names refreshed.
    pub async fn refresh_stale(&self) -> Result<Vec<String>, RegistryError> {
        let disconnected = self.catalog.read().await.disconnected.clone();
        let stale: Vec<String> = self
            .transports
            .iter()
            .filter(|t| t.catalog_stale() || disconnected.contains(t.name()))
            .map(|t| t.name().to_string())
            .collect();

        for name in &stale {
            self.refresh_transport(name).await?;
        }
        Ok(stale)
    }

    /// Drop every descriptor a transport contributed.
    pub async fn mark_disconnected(&self, name: &str) {
        let mut catalog = self.catalog.write().await;
        let removed = catalog.remove_transport(name);
        catalog.disconnected.insert(name.to_string());
        if removed > 0 {
            warn!(transport = name, removed, "Transport disconnected, descriptors removed");
        }
    }

    pub async fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.catalog
            .read()
            .await
            .tools
            .get(name)
            .map(|e| e.descriptor.clone())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.catalog.read().await.tools.contains_key(name)
    }

    /// Tool names in sorted order.
    pub async fn names(&self) -> Vec<String> {
        self.catalog.read().await.tools.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.catalog.read().await.tools.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Compact catalog for planning context.
    pub async fn summary(&self) -> CatalogSummary {
        let catalog = self.catalog.read().await;
        CatalogSummary {
            tools: catalog
                .tools
                .values()
                .map(|e| ToolSummary::from(&e.descriptor))
                .collect(),
            instructions: catalog
                .instructions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Check a planned call against the namespace and the tool's schema.
    pub async fn validate(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), PlanError> {
        let validator = {
            let catalog = self.catalog.read().await;
            let entry = catalog.tools.get(name).ok_or_else(|| PlanError::UnknownTool {
                name: name.to_string(),
            })?;
            Arc::clone(&entry.validator)
        };
        validator
            .validate(arguments)
            .map_err(|reason| PlanError::InvalidArguments {
                tool: name.to_string(),
                reason,
            })
    }

    /// Execute a call on its owning transport.
    ///
    /// Always yields a result: invalid arguments, timeouts, tool errors and
    /// exhausted retries all become failed [`ToolResult`]s.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        timeout: Duration,
        progress: Option<ProgressSink>,
    ) -> ToolResult {
        let started = Instant::now();

        let (transport_name, validator) = {
            let catalog = self.catalog.read().await;
            match catalog.tools.get(&call.name) {
                Some(entry) => (
                    entry.descriptor.transport.clone(),
                    Arc::clone(&entry.validator),
                ),
                None => {
                    return ToolResult::failed(
                        call,
                        FailureKind::InvalidArguments,
                        format!("unknown tool '{}'", call.name),
                        0,
                    );
                }
            }
        };

        if let Err(reason) = validator.validate(&call.arguments) {
            return ToolResult::failed(call, FailureKind::InvalidArguments, reason, 0);
        }

        let Some(transport) = self.transport(&transport_name) else {
            return ToolResult::failed(
                call,
                FailureKind::Connection,
                format!("transport '{transport_name}' is not registered"),
                0,
            );
        };

        debug!(tool = %call.name, transport = %transport_name, call_index = call.index, "Dispatching tool call");
        let label = format!("invoke:{}", call.name);
        let outcome = self
            .retry
            .run(&label, |_| transport.invoke(call, timeout, progress.clone()))
            .await;

        if matches!(outcome, Err(TransportError::Connection { .. })) {
            self.mark_disconnected(&transport_name).await;
        }

        let elapsed = started.elapsed().as_millis() as u64;
        let result = ToolResult::from_outcome(call, outcome, elapsed);
        debug!(
            tool = %call.name,
            call_index = call.index,
            ok = result.is_ok(),
            duration_ms = elapsed,
            "Tool call finished"
        );
        result
    }

    /// Close every transport. Safe to call more than once.
    pub async fn close_all(&self) {
        join_all(self.transports.iter().map(|t| t.close())).await;
        debug!(transports = self.transports.len(), "All transports closed");
    }
}
