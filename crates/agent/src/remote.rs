//! HTTP client for an external decision service.
//!
//! POSTs the step's context, catalog, and recalled memory as JSON and expects
//! a tagged [`Decision`] back:
//! `{"type": "tool_call", "name": ..., "arguments": {...}}` or
//! `{"type": "final_answer", "answer": ...}`.

use async_trait::async_trait;
use ferrule_config::DecisionConfig;
use ferrule_core::decision::{CatalogSummary, Decision, DecisionRequest, DecisionService};
use ferrule_core::error::DecisionError;
use ferrule_core::memory::MemoryQueryResult;
use ferrule_core::session::AgentContext;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Wire body sent to the service.
#[derive(Debug, Serialize)]
struct RemoteRequest<'a> {
    session_id: &'a str,
    query: &'a str,
    /// Plain-text transcript, ready to drop into a prompt
    transcript: String,
    context: &'a AgentContext,
    catalog: &'a CatalogSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<&'a MemoryQueryResult>,
    remaining_steps: u32,
}

pub struct RemoteDecisionService {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl RemoteDecisionService {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DecisionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DecisionError::Unavailable(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            timeout,
            client,
        })
    }

    /// Build from the `[decision]` section; `None` when no URL is configured.
    pub fn from_config(config: &DecisionConfig) -> Result<Option<Self>, DecisionError> {
        config
            .url
            .as_ref()
            .map(|url| Self::new(url.clone(), Duration::from_secs(config.timeout_secs)))
            .transpose()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DecisionService for RemoteDecisionService {
    fn name(&self) -> &str {
        "remote"
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, DecisionError> {
        let body = RemoteRequest {
            session_id: &request.session_id.0,
            query: &request.query,
            transcript: format!(
                "{}\n## Tools\n{}",
                request.context.render(),
                request.catalog.render()
            ),
            context: &request.context,
            catalog: &request.catalog,
            memory: request.memory.as_ref(),
            remaining_steps: request.remaining_steps,
        };

        debug!(url = %self.url, session_id = %request.session_id, "Requesting decision");
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DecisionError::Timeout(self.timeout.as_secs())
                } else {
                    DecisionError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %error_body, "Decision service returned error");
            return Err(DecisionError::Unavailable(format!("HTTP {status}: {error_body}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| DecisionError::Unavailable(e.to_string()))?;
        serde_json::from_str::<Decision>(&text).map_err(|e| DecisionError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use ferrule_core::session::{Session, SessionId};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/decide")
    }

    fn request() -> DecisionRequest {
        let session = Session::new("find X", 5);
        let mut context = AgentContext::new();
        context.push_perception("User query: find X");
        DecisionRequest {
            session_id: SessionId::from("s-1"),
            query: session.query,
            context,
            catalog: CatalogSummary::default(),
            memory: None,
            remaining_steps: 5,
        }
    }

    #[tokio::test]
    async fn posts_context_and_parses_tool_call() {
        let seen = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&seen);
        let app = Router::new().route(
            "/decide",
            post(move |axum::Json(body): axum::Json<Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() = body;
                    axum::Json(json!({
                        "type": "tool_call",
                        "name": "searchWeb",
                        "arguments": {"q": "X"}
                    }))
                }
            }),
        );
        let service = RemoteDecisionService::new(serve(app).await, Duration::from_secs(5)).unwrap();

        let decision = service.decide(&request()).await.unwrap();
        assert_eq!(decision, Decision::call("searchWeb", json!({"q": "X"})));

        let body = seen.lock().unwrap().clone();
        assert_eq!(body["session_id"], "s-1");
        assert_eq!(body["remaining_steps"], 5);
        assert!(body["transcript"].as_str().unwrap().contains("find X"));
    }

    #[tokio::test]
    async fn unparseable_reply_is_malformed() {
        let app = Router::new().route("/decide", post(|| async { "not json" }));
        let service = RemoteDecisionService::new(serve(app).await, Duration::from_secs(5)).unwrap();
        let err = service.decide(&request()).await.unwrap_err();
        assert!(matches!(err, DecisionError::Malformed(_)));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let app = Router::new().route(
            "/decide",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let service = RemoteDecisionService::new(serve(app).await, Duration::from_secs(5)).unwrap();
        let err = service.decide(&request()).await.unwrap_err();
        match err {
            DecisionError::Unavailable(message) => assert!(message.contains("503")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn from_config_without_url_is_none() {
        let config = DecisionConfig::default();
        assert!(RemoteDecisionService::from_config(&config).unwrap().is_none());

        let config = DecisionConfig {
            url: Some("http://localhost:9/decide".into()),
            timeout_secs: 3,
        };
        let service = RemoteDecisionService::from_config(&config).unwrap().unwrap();
        assert_eq!(service.url(), "http://localhost:9/decide");
    }
}
