//! Test doubles shared by unit and integration tests.
//!
//! Enabled under `cfg(test)` and by the `test-support` feature.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::core::types::{PlanRequest, PlannerReply};
use crate::io::planner::{Planner, PlannerError};
use crate::io::sandbox::Sandbox;
use crate::io::trace::{TraceEvent, TraceKind, TraceSink, Tracer};

/// Base URL reported to sinks by tracers built from [`RecordingSink::tracer`].
pub const TEST_TRACE_BASE: &str = "http://trace.test";

/// Sink that keeps every pushed event in memory.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(String, TraceEvent)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracer(&self, session_id: &str) -> Tracer {
        Tracer::new(Arc::new(self.clone()), TEST_TRACE_BASE, session_id)
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.lock().iter().map(|(_, event)| event.clone()).collect()
    }

    pub fn kinds(&self) -> Vec<TraceKind> {
        self.lock().iter().map(|(_, event)| event.kind).collect()
    }

    /// Base URLs the events were pushed to, in push order.
    pub fn bases(&self) -> Vec<String> {
        self.lock().iter().map(|(base, _)| base.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, TraceEvent)>> {
        self.events.lock().expect("recording sink lock poisoned")
    }
}

#[async_trait]
impl TraceSink for RecordingSink {
    async fn push(&self, base: &str, event: &TraceEvent) {
        self.lock().push((base.to_string(), event.clone()));
    }
}

/// One scripted planner answer.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Reply(PlannerReply),
    Fail(PlannerError),
    /// Sleep before answering with the inner reply.
    Delay(Duration, PlannerReply),
}

/// Planner that replays scripted replies and records every request.
#[derive(Clone, Default)]
pub struct ScriptedPlanner {
    replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
    requests: Arc<Mutex<Vec<(String, PlanRequest)>>>,
}

impl ScriptedPlanner {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        }
    }

    /// Planner answering once with `actions` (raw JSON) and no assistant message.
    pub fn with_actions(actions: serde_json::Value) -> Self {
        Self::new(vec![ScriptedReply::Reply(PlannerReply {
            assistant_message: None,
            actions: Some(actions),
        })])
    }

    pub fn failing(err: PlannerError) -> Self {
        Self::new(vec![ScriptedReply::Fail(err)])
    }

    /// Requests received so far, paired with the invocation URL they were sent to.
    pub fn requests(&self) -> Vec<(String, PlanRequest)> {
        self.requests.lock().expect("planner lock poisoned").clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        invocation_url: &str,
        request: &PlanRequest,
    ) -> Result<PlannerReply, PlannerError> {
        self.requests
            .lock()
            .expect("planner lock poisoned")
            .push((invocation_url.to_string(), request.clone()));
        let next = self
            .replies
            .lock()
            .expect("planner lock poisoned")
            .pop_front();
        match next {
            Some(ScriptedReply::Reply(reply)) => Ok(reply),
            Some(ScriptedReply::Fail(err)) => Err(err),
            Some(ScriptedReply::Delay(delay, reply)) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            None => Err(PlannerError::Unreachable("no scripted reply left".to_string())),
        }
    }
}

/// Throwaway project root.
pub struct TestProject {
    _temp: TempDir,
    sandbox: Sandbox,
}

impl TestProject {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = Sandbox::new(temp.path()).expect("sandbox");
        Self {
            _temp: temp,
            sandbox,
        }
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write project file");
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root().join(rel)).ok()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.root().join(rel).exists()
    }

    /// Every regular file under the root, as sorted `/`-separated relative paths.
    pub fn list_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(self.root(), &self.sandbox, &mut files);
        files.sort();
        files
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_files(dir: &Path, sandbox: &Sandbox, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, sandbox, out);
        } else if let Some(rel) = sandbox.relative(&path) {
            out.push(rel);
        }
    }
}
