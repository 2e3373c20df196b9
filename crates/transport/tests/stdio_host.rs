//! Stdio transport against the demo host binary.

use ferrule_core::error::TransportError;
use ferrule_core::tool::{FailureKind, ProgressEvent, ProgressSink, ToolCall, ToolTransport};
use ferrule_transport::{RetryPolicy, StdioLaunch, StdioTransport, ToolRegistry};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn demo_host() -> StdioTransport {
    StdioTransport::new(
        "demo",
        StdioLaunch::new(env!("CARGO_BIN_EXE_ferrule-demo-host"))
            .with_connect_timeout(Duration::from_secs(10)),
    )
}

fn call(index: u64, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        index,
        name: name.into(),
        arguments,
    }
}

#[tokio::test]
async fn discovers_demo_tools_and_instructions() {
    let transport = demo_host();
    let mut names: Vec<String> = transport
        .discover()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["echo", "fail", "reload", "sleep"]);
    assert!(transport.instructions().await.unwrap().contains("Demo tools"));
    assert!(transport.is_running().await);
    transport.close().await;
    assert!(!transport.is_running().await);
}

#[tokio::test]
async fn echo_returns_structured_payload() {
    let transport = demo_host();
    let payload = transport
        .invoke(&call(1, "echo", json!({ "text": "hi" })), Duration::from_secs(5), None)
        .await
        .unwrap();
    assert_eq!(payload, json!({ "text": "hi" }));
    transport.close().await;
}

#[tokio::test]
async fn progress_events_reach_the_sink() {
    let transport = demo_host();
    let seen: Arc<Mutex<Vec<ProgressEvent>>> = Arc::default();
    let sink_seen = seen.clone();
    let sink: ProgressSink = Arc::new(move |e| sink_seen.lock().unwrap().push(e));

    let payload = transport
        .invoke(
            &call(3, "sleep", json!({ "ms": 40 })),
            Duration::from_secs(5),
            Some(sink),
        )
        .await
        .unwrap();
    assert_eq!(payload["slept_ms"], 40);

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.call_index == 3 && e.tool == "sleep"));
    assert_eq!(events.last().unwrap().progress, 4.0);
    drop(events);
    transport.close().await;
}

#[tokio::test]
async fn timeout_is_distinct_and_host_survives() {
    let transport = demo_host();
    let err = transport
        .invoke(
            &call(1, "sleep", json!({ "ms": 2000 })),
            Duration::from_millis(100),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout { ref tool, .. } if tool == "sleep"));

    let payload = transport
        .invoke(&call(2, "echo", json!({ "text": "still here" })), Duration::from_secs(5), None)
        .await
        .unwrap();
    assert_eq!(payload["text"], "still here");
    transport.close().await;
}

#[tokio::test]
async fn tool_error_is_an_application_error() {
    let transport = demo_host();
    let err = transport
        .invoke(&call(1, "fail", json!({ "message": "quota exceeded" })), Duration::from_secs(5), None)
        .await
        .unwrap_err();
    match err {
        TransportError::Application { tool, message } => {
            assert_eq!(tool, "fail");
            assert_eq!(message, "quota exceeded");
        }
        other => panic!("unexpected {other:?}"),
    }
    transport.close().await;
}

#[tokio::test]
async fn list_changed_marks_catalog_stale() {
    let transport = demo_host();
    transport.discover().await.unwrap();
    assert!(!transport.catalog_stale());
    transport
        .invoke(&call(1, "reload", json!({})), Duration::from_secs(5), None)
        .await
        .unwrap();
    assert!(transport.catalog_stale());
    transport.discover().await.unwrap();
    assert!(!transport.catalog_stale());
    transport.close().await;
}

#[tokio::test]
async fn closed_transport_rejects_calls() {
    let transport = demo_host();
    transport.discover().await.unwrap();
    transport.close().await;
    let err = transport
        .invoke(&call(1, "echo", json!({ "text": "x" })), Duration::from_secs(1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Closed { .. }));
}

#[tokio::test]
async fn registry_dispatches_through_stdio() {
    let transport: Arc<dyn ToolTransport> = Arc::new(demo_host());
    let registry = ToolRegistry::new(vec![transport]).with_retry(RetryPolicy::none());
    let report = registry.discover_all().await.unwrap();
    assert_eq!(report.tools, 4);
    assert!(registry.summary().await.render().contains("[demo] Demo tools"));

    let ok = registry
        .dispatch(&call(1, "echo", json!({ "text": "a" })), Duration::from_secs(5), None)
        .await;
    assert!(ok.is_ok());

    let invalid = registry
        .dispatch(&call(2, "sleep", json!({ "ms": "soon" })), Duration::from_secs(5), None)
        .await;
    assert_eq!(invalid.failure_kind(), Some(FailureKind::InvalidArguments));

    let failed = registry
        .dispatch(&call(3, "fail", json!({})), Duration::from_secs(5), None)
        .await;
    assert_eq!(failed.failure_kind(), Some(FailureKind::Application));

    registry
        .dispatch(&call(4, "reload", json!({})), Duration::from_secs(5), None)
        .await;
    assert_eq!(registry.refresh_stale().await.unwrap(), vec!["demo".to_string()]);
    assert_eq!(registry.len().await, 4);

    registry.close_all().await;
}
