//! Per-action failures raised while applying a plan.
//!
//! These never abort the cycle: the orchestrator logs them and moves on to the
//! next action.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("path escapes project root: {path}")]
    PathEscape { path: String },

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ApplyError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ApplyError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn path_escape(path: &str) -> Self {
        ApplyError::PathEscape {
            path: path.to_string(),
        }
    }
}
