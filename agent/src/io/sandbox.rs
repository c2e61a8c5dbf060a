//! Single-root path jail for every file the agent touches.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::io::error::ApplyError;

/// Fixed project root, canonicalized once at construction.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: &Path) -> Result<Self, ApplyError> {
        let root = root
            .canonicalize()
            .map_err(|source| ApplyError::io("canonicalize project root", root, source))?;
        debug!(root = %root.display(), "sandbox root resolved");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `rel` to an absolute path strictly inside the root.
    ///
    /// Rejects absolute paths, `..` segments that climb above the root, the root
    /// itself, and paths whose deepest existing ancestor is a symlink leading
    /// outside the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, ApplyError> {
        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in Path::new(rel.trim()).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(ApplyError::path_escape(rel));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ApplyError::path_escape(rel));
                }
            }
        }
        if parts.is_empty() {
            return Err(ApplyError::path_escape(rel));
        }

        let resolved: PathBuf = parts
            .iter()
            .fold(self.root.clone(), |acc, part| acc.join(part));
        self.ensure_no_symlink_escape(rel, &resolved)?;
        Ok(resolved)
    }

    /// Convert an absolute path under the root back into a `/`-separated relative path.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn ensure_no_symlink_escape(&self, rel: &str, resolved: &Path) -> Result<(), ApplyError> {
        let existing = resolved
            .ancestors()
            .find(|ancestor| ancestor.symlink_metadata().is_ok());
        let Some(existing) = existing else {
            return Err(ApplyError::path_escape(rel));
        };
        match existing.canonicalize() {
            Ok(real) if real.starts_with(&self.root) => Ok(()),
            // Dangling links cannot be canonicalized; writing through them could land anywhere.
            _ => Err(ApplyError::path_escape(rel)),
        }
    }
}
