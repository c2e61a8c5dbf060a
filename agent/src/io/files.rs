//! Sandboxed create/update/delete of project files.
//!
//! Every operation emits `fileOp.start` before touching disk and `fileOp.end`
//! after; writes additionally emit `fileOp.diff` when the target existed and
//! changed. Writes go through a sibling temp file and a rename so readers never
//! observe a partially written file.

use std::io::ErrorKind;
use std::path::Path;

use serde_json::json;
use tokio::fs;
use tracing::{debug, instrument};

use crate::core::diff::diff_summary;
use crate::core::types::DiffSummary;
use crate::io::error::ApplyError;
use crate::io::sandbox::Sandbox;
use crate::io::trace::{TraceKind, Tracer};

pub struct FileApplier<'a> {
    sandbox: &'a Sandbox,
    tracer: &'a Tracer,
}

impl<'a> FileApplier<'a> {
    pub fn new(sandbox: &'a Sandbox, tracer: &'a Tracer) -> Self {
        Self { sandbox, tracer }
    }

    /// Write `contents` to `rel`, returning the diff against the previous contents.
    ///
    /// A path escape is reported before anything is traced or written.
    #[instrument(skip_all, fields(path = rel, update = is_update))]
    pub async fn write(
        &self,
        rel: &str,
        contents: &str,
        is_update: bool,
    ) -> Result<DiffSummary, ApplyError> {
        let target = self.sandbox.resolve(rel)?;
        let op = if is_update { "update" } else { "create" };
        self.tracer
            .emit(TraceKind::FileOpStart, json!({"op": op, "path": rel}))
            .await;

        let previous = read_existing(&target).await?;
        let diff = diff_summary(previous.as_deref(), contents);
        if !diff.is_empty() {
            self.tracer
                .emit(
                    TraceKind::FileOpDiff,
                    json!({"op": op, "path": rel, "diff": diff}),
                )
                .await;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ApplyError::io("create directory", parent, source))?;
        }
        write_atomic(&target, contents).await?;
        debug!(bytes = contents.len(), existed = diff.existed, "file written");

        self.tracer
            .emit(
                TraceKind::FileOpEnd,
                json!({"op": op, "path": rel, "bytes": contents.len()}),
            )
            .await;
        Ok(diff)
    }

    /// Delete `rel` if present. Deleting a missing file succeeds.
    #[instrument(skip_all, fields(path = rel))]
    pub async fn remove(&self, rel: &str) -> Result<bool, ApplyError> {
        let target = self.sandbox.resolve(rel)?;
        self.tracer
            .emit(TraceKind::FileOpStart, json!({"op": "delete", "path": rel}))
            .await;

        let existed = match fs::remove_file(&target).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(source) => return Err(ApplyError::io("delete", &target, source)),
        };
        debug!(existed, "file removed");

        self.tracer
            .emit(
                TraceKind::FileOpEnd,
                json!({"op": "delete", "path": rel, "existed": existed}),
            )
            .await;
        Ok(existed)
    }
}

async fn read_existing(path: &Path) -> Result<Option<String>, ApplyError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ApplyError::io("read", path, source)),
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), ApplyError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Unique per call, so concurrent writers never share a temp file.
    let tmp_path = path.with_file_name(format!(
        ".{file_name}.{}.agent-tmp",
        uuid::Uuid::new_v4().simple()
    ));
    fs::write(&tmp_path, contents)
        .await
        .map_err(|source| ApplyError::io("write temp file", &tmp_path, source))?;
    if let Err(source) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(ApplyError::io("replace", path, source));
    }
    Ok(())
}
