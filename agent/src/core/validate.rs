//! Plan validation: the gate between the planner's untrusted JSON and the applier.
//!
//! Checks run as whole-plan passes so a disallowed tag anywhere in the plan is
//! reported before any field problem:
//! 1. the value is an array,
//! 2. every element carries an allowed `type` tag,
//! 3. `create_file`/`update_file` carry a string `contents`,
//! 4. file actions carry a string `path`,
//! 5. `run_command` carries a string `command`.
//!
//! The first violation rejects the whole plan.

use serde_json::Value;
use thiserror::Error;

use crate::core::types::Action;

pub const ALLOWED_ACTION_TYPES: [&str; 4] =
    ["create_file", "update_file", "delete_file", "run_command"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("malformed plan: actions must be an array")]
    MalformedPlan,
    #[error("disallowed action type `{kind}` at index {index}")]
    DisallowedAction { index: usize, kind: String },
    #[error("action {index} ({kind}) is missing string field `{field}`")]
    MissingField {
        index: usize,
        kind: &'static str,
        field: &'static str,
    },
}

/// Validate a raw `actions` value and convert it into typed [`Action`]s.
///
/// Returns an order-preserving sequence of the same length on success.
pub fn validate_plan(actions: &Value) -> Result<Vec<Action>, PlanError> {
    let items = actions.as_array().ok_or(PlanError::MalformedPlan)?;

    let mut kinds = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        kinds.push(allowed_kind(index, item)?);
    }

    for (index, (item, kind)) in items.iter().zip(kinds.iter().copied()).enumerate() {
        if matches!(kind, "create_file" | "update_file") {
            string_field(index, item, kind, "contents")?;
        }
    }
    for (index, (item, kind)) in items.iter().zip(kinds.iter().copied()).enumerate() {
        if kind != "run_command" {
            string_field(index, item, kind, "path")?;
        }
    }
    for (index, (item, kind)) in items.iter().zip(kinds.iter().copied()).enumerate() {
        if kind == "run_command" {
            string_field(index, item, kind, "command")?;
        }
    }

    items
        .iter()
        .zip(kinds.iter().copied())
        .enumerate()
        .map(|(index, (item, kind))| build_action(index, item, kind))
        .collect()
}

fn allowed_kind(index: usize, item: &Value) -> Result<&'static str, PlanError> {
    let tag = item.get("type").and_then(Value::as_str);
    match tag {
        Some(tag) => ALLOWED_ACTION_TYPES
            .iter()
            .copied()
            .find(|allowed| *allowed == tag)
            .ok_or_else(|| PlanError::DisallowedAction {
                index,
                kind: tag.to_string(),
            }),
        None => Err(PlanError::DisallowedAction {
            index,
            kind: describe_missing_tag(item),
        }),
    }
}

fn describe_missing_tag(item: &Value) -> String {
    match item.get("type") {
        Some(other) => other.to_string(),
        None if item.is_object() => "<missing>".to_string(),
        None => format!("<{}>", json_type_name(item)),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn string_field<'a>(
    index: usize,
    item: &'a Value,
    kind: &'static str,
    field: &'static str,
) -> Result<&'a str, PlanError> {
    item.get(field)
        .and_then(Value::as_str)
        .ok_or(PlanError::MissingField { index, kind, field })
}

fn build_action(index: usize, item: &Value, kind: &'static str) -> Result<Action, PlanError> {
    let action = match kind {
        "create_file" => Action::CreateFile {
            path: string_field(index, item, kind, "path")?.to_string(),
            contents: string_field(index, item, kind, "contents")?.to_string(),
        },
        "update_file" => Action::UpdateFile {
            path: string_field(index, item, kind, "path")?.to_string(),
            contents: string_field(index, item, kind, "contents")?.to_string(),
        },
        "delete_file" => Action::DeleteFile {
            path: string_field(index, item, kind, "path")?.to_string(),
        },
        _ => Action::RunCommand {
            command: string_field(index, item, kind, "command")?.to_string(),
        },
    };
    Ok(action)
}
