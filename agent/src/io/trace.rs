//! Best-effort trace delivery to the telemetry sink (`{base}/trace/push`).
//!
//! # Separation of Concerns
//!
//! - **Trace events (this module)**: product telemetry consumed by the UI as an
//!   SSE stream. Always sent, unaffected by `RUST_LOG`.
//! - **Tracing (`logging`)**: dev diagnostics on stderr.
//!
//! Delivery never fails the caller: network errors, non-2xx replies and
//! timeouts are logged at `debug` and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Event vocabulary emitted by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceKind {
    #[serde(rename = "step")]
    Step,
    #[serde(rename = "bedrock.call")]
    PlannerCall,
    #[serde(rename = "bedrock.done")]
    PlannerDone,
    #[serde(rename = "plan.summary")]
    PlanSummary,
    #[serde(rename = "fileOp.start")]
    FileOpStart,
    #[serde(rename = "fileOp.diff")]
    FileOpDiff,
    #[serde(rename = "fileOp.end")]
    FileOpEnd,
    #[serde(rename = "command.start")]
    CommandStart,
    #[serde(rename = "command.chunk")]
    CommandChunk,
    #[serde(rename = "command.end")]
    CommandEnd,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "done")]
    Done,
}

impl TraceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceKind::Step => "step",
            TraceKind::PlannerCall => "bedrock.call",
            TraceKind::PlannerDone => "bedrock.done",
            TraceKind::PlanSummary => "plan.summary",
            TraceKind::FileOpStart => "fileOp.start",
            TraceKind::FileOpDiff => "fileOp.diff",
            TraceKind::FileOpEnd => "fileOp.end",
            TraceKind::CommandStart => "command.start",
            TraceKind::CommandChunk => "command.chunk",
            TraceKind::CommandEnd => "command.end",
            TraceKind::Error => "error",
            TraceKind::Done => "done",
        }
    }
}

/// One trace record as pushed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub session_id: String,
    pub kind: TraceKind,
    pub payload: Value,
    /// RFC 3339 emission time.
    pub timestamp: String,
}

impl TraceEvent {
    pub fn new(session_id: &str, kind: TraceKind, payload: Value) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            payload,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Destination for trace events. Implementations must swallow every failure.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Deliver `event` to the sink rooted at `base` (the planner base URL).
    async fn push(&self, base: &str, event: &TraceEvent);
}

/// Sink that POSTs events as JSON to `{base}/trace/push`.
pub struct HttpTraceSink {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTraceSink {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl TraceSink for HttpTraceSink {
    async fn push(&self, base: &str, event: &TraceEvent) {
        let url = format!("{}/trace/push", base.trim_end_matches('/'));
        let result = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(event)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                debug!(status = %resp.status(), kind = event.kind.as_str(), "trace push rejected");
            }
            Err(err) => {
                debug!(err = %err, kind = event.kind.as_str(), "trace push failed");
            }
        }
    }
}

/// Per-cycle handle binding a sink to one session and trace base URL.
///
/// Cloned into every component that reports progress.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn TraceSink>,
    base: String,
    session_id: String,
}

impl Tracer {
    pub fn new(
        sink: Arc<dyn TraceSink>,
        base: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            base: base.into(),
            session_id: session_id.into(),
        }
    }

    pub async fn emit(&self, kind: TraceKind, payload: Value) {
        let event = TraceEvent::new(&self.session_id, kind, payload);
        self.sink.push(&self.base, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serializes_to_wire_name() {
        for kind in [
            TraceKind::PlannerCall,
            TraceKind::FileOpDiff,
            TraceKind::CommandChunk,
            TraceKind::Done,
        ] {
            let value = serde_json::to_value(kind).expect("serialize");
            assert_eq!(value, json!(kind.as_str()));
        }
    }

    #[test]
    fn event_body_carries_session_kind_and_payload() {
        let event = TraceEvent::new("s-1", TraceKind::FileOpStart, json!({"path": "a"}));
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["session_id"], "s-1");
        assert_eq!(value["kind"], "fileOp.start");
        assert_eq!(value["payload"]["path"], "a");
        assert!(value["timestamp"].is_string());
    }

    /// Nothing listens on the target port; the push must still return normally.
    #[tokio::test]
    async fn http_sink_swallows_connection_errors() {
        let sink = HttpTraceSink::new(Duration::from_millis(200));
        let event = TraceEvent::new("s", TraceKind::Step, json!({}));
        sink.push("http://127.0.0.1:9", &event).await;
    }
}
