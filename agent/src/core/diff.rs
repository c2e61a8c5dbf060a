//! Pre-write line diff used for `fileOp.diff` trace events.

use crate::core::types::{DiffChange, DiffSummary};

/// Maximum number of differing-line records kept in a summary.
pub const MAX_LINE_CHANGES: usize = 8;

/// Compare the current file contents (if the file existed) with the new contents.
///
/// Lines are compared pairwise up to the shorter length; at most
/// [`MAX_LINE_CHANGES`] differing lines are recorded, followed by a single
/// added/removed marker when the line counts differ.
pub fn diff_summary(before: Option<&str>, after: &str) -> DiffSummary {
    let Some(before) = before else {
        return DiffSummary {
            existed: false,
            changes: Vec::new(),
        };
    };

    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();

    let mut changes: Vec<DiffChange> = old
        .iter()
        .zip(&new)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .take(MAX_LINE_CHANGES)
        .map(|(idx, (a, b))| DiffChange::Line {
            line: idx + 1,
            before: (*a).to_string(),
            after: (*b).to_string(),
        })
        .collect();

    if new.len() > old.len() {
        changes.push(DiffChange::LinesAdded {
            count: new.len() - old.len(),
        });
    } else if old.len() > new.len() {
        changes.push(DiffChange::LinesRemoved {
            count: old.len() - new.len(),
        });
    }

    DiffSummary {
        existed: true,
        changes,
    }
}
