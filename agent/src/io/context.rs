//! Bounded project snapshot sent with each planning request.

use std::fs;

use tracing::{debug, instrument};

use crate::core::preview::is_chat_path;
use crate::core::types::ProjectContext;
use crate::io::config::ContextConfig;
use crate::io::sandbox::Sandbox;

/// Read the configured candidate files into a [`ProjectContext`].
///
/// Every read is best-effort: missing, unreadable or out-of-root files are
/// omitted. Chat-route files are never included. Each file is cut to
/// `file_budget_chars`, and files stop being added once the snapshot holds
/// `total_budget_chars`.
#[instrument(skip_all, fields(candidates = config.files.len()))]
pub fn build_context(sandbox: &Sandbox, config: &ContextConfig) -> ProjectContext {
    let mut context = ProjectContext::default();
    let mut total = 0usize;

    for rel in &config.files {
        if is_chat_path(rel) {
            debug!(path = %rel, "skipping chat route file");
            continue;
        }
        if total >= config.total_budget_chars {
            debug!(total, "context budget exhausted");
            break;
        }
        let Ok(path) = sandbox.resolve(rel) else {
            debug!(path = %rel, "context candidate outside root");
            continue;
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %rel, err = %err, "context candidate unreadable");
                continue;
            }
        };

        let text = String::from_utf8_lossy(&bytes);
        let remaining = config.total_budget_chars - total;
        let budget = config.file_budget_chars.min(remaining);
        let clipped = take_chars(&text, budget);
        total += clipped.chars().count();
        context.files.insert(rel.clone(), clipped);
    }

    debug!(files = context.files.len(), total, "context built");
    context
}

fn take_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
