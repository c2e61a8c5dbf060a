//! Planning service client (`POST {base}/invocations`).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::types::{PlanRequest, PlannerReply};

/// Longest slice of a non-2xx body kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlannerError {
    /// The request did not complete within the planning budget.
    #[error("timeout")]
    Timeout,

    #[error("planner unreachable: {0}")]
    Unreachable(String),

    #[error("planner returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("planner reply is not valid JSON: {0}")]
    Decode(String),
}

/// Source of plans for a prompt.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Send `request` to `invocation_url` and decode the 2xx reply.
    async fn plan(
        &self,
        invocation_url: &str,
        request: &PlanRequest,
    ) -> Result<PlannerReply, PlannerError>;
}

/// JSON-over-HTTP planner with a per-request timeout.
pub struct HttpPlanner {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPlanner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    #[instrument(skip_all, fields(url = invocation_url, session_id = %request.session_id))]
    async fn plan(
        &self,
        invocation_url: &str,
        request: &PlanRequest,
    ) -> Result<PlannerReply, PlannerError> {
        let response = self
            .client
            .post(invocation_url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;
        debug!(status = status.as_u16(), bytes = body.len(), "planner replied");

        if !status.is_success() {
            return Err(PlannerError::Http {
                status: status.as_u16(),
                body: clip(&body, ERROR_BODY_LIMIT),
            });
        }
        serde_json::from_str(&body).map_err(|err| PlannerError::Decode(err.to_string()))
    }
}

fn classify(err: reqwest::Error) -> PlannerError {
    if err.is_timeout() {
        PlannerError::Timeout
    } else {
        PlannerError::Unreachable(err.to_string())
    }
}

fn clip(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
