//! Tool transports and the tool registry for Ferrule.
//!
//! Two interchangeable [`ToolTransport`] variants reach tool hosts:
//! [`StdioTransport`] (a child process over stdin/stdout) and
//! [`SseTransport`] (a remote host over an HTTP event stream). The
//! [`ToolRegistry`] merges their catalogs into one namespace and dispatches
//! calls with argument validation and retry.

pub mod host;
pub mod registry;
pub mod retry;
pub mod rpc;
pub mod schema;
pub mod sse;
pub mod stdio;

pub use registry::{DiscoveryReport, ToolRegistry};
pub use retry::RetryPolicy;
pub use sse::SseTransport;
pub use stdio::{StdioLaunch, StdioTransport};

use ferrule_config::TransportConfig;
use ferrule_core::tool::ToolTransport;
use std::sync::Arc;
use std::time::Duration;

/// Build a transport from its configuration entry. Nothing connects yet.
pub fn from_config(config: &TransportConfig, connect_timeout: Duration) -> Arc<dyn ToolTransport> {
    match config {
        TransportConfig::Stdio {
            name,
            command,
            args,
            env,
            workdir,
            ..
        } => {
            let launch = StdioLaunch::new(command.clone())
                .with_args(args.clone())
                .with_env(env.clone())
                .with_workdir(workdir.clone())
                .with_connect_timeout(connect_timeout);
            Arc::new(StdioTransport::new(name.clone(), launch))
        }
        TransportConfig::Sse {
            name, url, headers, ..
        } => Arc::new(SseTransport::with_options(
            name.clone(),
            url.clone(),
            headers.clone(),
            connect_timeout,
        )),
    }
}

/// Build every enabled transport, in configuration order.
pub fn build_all(configs: &[TransportConfig], connect_timeout: Duration) -> Vec<Arc<dyn ToolTransport>> {
    configs
        .iter()
        .filter(|c| c.enabled())
        .map(|c| from_config(c, connect_timeout))
        .collect()
}
