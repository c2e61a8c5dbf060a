//! Shared deterministic types for the agent core.
//!
//! These types define the contracts between the planner, the applier and the
//! caller. They carry no I/O and serialize to the wire shapes the planner and
//! the route adapter exchange.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single planned mutation returned by the planner.
///
/// Plans arrive as untrusted JSON and only become `Action`s after passing
/// [`validate_plan`](crate::core::validate::validate_plan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    CreateFile { path: String, contents: String },
    UpdateFile { path: String, contents: String },
    DeleteFile { path: String },
    RunCommand { command: String },
}

impl Action {
    /// Wire tag of this action (`create_file`, `run_command`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateFile { .. } => "create_file",
            Action::UpdateFile { .. } => "update_file",
            Action::DeleteFile { .. } => "delete_file",
            Action::RunCommand { .. } => "run_command",
        }
    }

    /// Project-relative path touched by this action, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Action::CreateFile { path, .. }
            | Action::UpdateFile { path, .. }
            | Action::DeleteFile { path } => Some(path),
            Action::RunCommand { .. } => None,
        }
    }
}

/// Project files sent to the planner for situational context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Relative path -> file text (possibly truncated to the context budget).
    pub files: BTreeMap<String, String>,
}

/// Body of `POST {base}/invocations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanRequest {
    pub input: String,
    pub context: ProjectContext,
    pub session_id: String,
}

/// Decoded 2xx planner reply. `actions` stays untyped until validated.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlannerReply {
    #[serde(default)]
    pub assistant_message: Option<String>,
    #[serde(default)]
    pub actions: Option<serde_json::Value>,
}

/// One entry of a [`DiffSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffChange {
    /// A line (1-indexed) whose text differs between the old and new contents.
    Line {
        line: usize,
        before: String,
        after: String,
    },
    /// The new contents are longer by `count` lines.
    LinesAdded { count: usize },
    /// The new contents are shorter by `count` lines.
    LinesRemoved { count: usize },
}

/// Pre-write comparison attached to `fileOp.diff` trace events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub existed: bool,
    pub changes: Vec<DiffChange>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Result of one orchestration cycle, returned to the route adapter.
///
/// Failures are encoded in `error`; the cycle itself never returns `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub assistant: String,
    pub plan: Vec<Action>,
    pub logs: Vec<String>,
    pub preview_path: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_serializes_with_type_tag() {
        let action = Action::CreateFile {
            path: "app/page.tsx".to_string(),
            contents: String::new(),
        };
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(
            value,
            json!({"type": "create_file", "path": "app/page.tsx", "contents": ""})
        );
    }

    #[test]
    fn run_command_has_no_path() {
        let action = Action::RunCommand {
            command: "npm run lint".to_string(),
        };
        assert_eq!(action.path(), None);
        assert_eq!(action.kind(), "run_command");
    }

    #[test]
    fn response_omits_error_when_absent() {
        let response = AgentResponse {
            assistant: "done".to_string(),
            plan: Vec::new(),
            logs: Vec::new(),
            preview_path: "/".to_string(),
            session_id: "s".to_string(),
            error: None,
        };
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["previewPath"], "/");
        assert!(value.get("error").is_none());
    }
}
