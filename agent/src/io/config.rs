//! Agent configuration stored under `.agent/config.toml`.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable that overrides [`AgentConfig::planner_url`].
pub const PLANNER_URL_ENV: &str = "PLANNER_URL";

/// Default config location for a project root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(".agent").join("config.toml")
}

/// Agent configuration (TOML).
///
/// Missing fields default to the timeouts and budgets the agent was designed
/// around (20s planning, 15s per command, 30s per cycle).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Planner base URL (with or without the `/invocations` suffix).
    pub planner_url: String,

    /// Hard ceiling on the planning request.
    pub planning_timeout_secs: u64,

    /// Wall-clock ceiling per allow-listed command before it is killed.
    pub command_timeout_secs: u64,

    /// Outer ceiling on a whole cycle, applied by the CLI and server.
    pub cycle_timeout_secs: u64,

    /// Per-event budget for trace delivery.
    pub trace_timeout_ms: u64,

    /// Captured stdout/stderr beyond this many bytes is dropped (still streamed).
    pub command_output_limit_bytes: usize,

    pub context: ContextConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Candidate project files, relative to the root. Missing files are skipped.
    pub files: Vec<String>,
    /// Each file is truncated to this many characters.
    pub file_budget_chars: usize,
    /// Files stop being added once the snapshot reaches this many characters.
    pub total_budget_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            files: [
                "package.json",
                "next.config.js",
                "next.config.mjs",
                "tsconfig.json",
                "app/layout.tsx",
                "app/page.tsx",
                "app/globals.css",
            ]
            .iter()
            .map(|p| (*p).to_string())
            .collect(),
            file_budget_chars: 4_000,
            total_budget_chars: 10_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            planner_url: "http://localhost:8000".to_string(),
            planning_timeout_secs: 20,
            command_timeout_secs: 15,
            cycle_timeout_secs: 30,
            trace_timeout_ms: 2_000,
            command_output_limit_bytes: 100_000,
            context: ContextConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.planner_url.trim().is_empty() {
            return Err(anyhow!("planner_url must be non-empty"));
        }
        if self.planning_timeout_secs == 0 {
            return Err(anyhow!("planning_timeout_secs must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.cycle_timeout_secs == 0 {
            return Err(anyhow!("cycle_timeout_secs must be > 0"));
        }
        if self.trace_timeout_ms == 0 {
            return Err(anyhow!("trace_timeout_ms must be > 0"));
        }
        if self.command_output_limit_bytes == 0 {
            return Err(anyhow!("command_output_limit_bytes must be > 0"));
        }
        if self.context.file_budget_chars == 0 || self.context.total_budget_chars == 0 {
            return Err(anyhow!("context budgets must be > 0"));
        }
        for file in &self.context.files {
            let path = Path::new(file);
            let escapes = path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if file.trim().is_empty() || escapes {
                return Err(anyhow!(
                    "context file '{file}' must be a relative path inside the project"
                ));
            }
        }
        Ok(())
    }

    pub fn planning_timeout(&self) -> Duration {
        Duration::from_secs(self.planning_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn trace_timeout(&self) -> Duration {
        Duration::from_millis(self.trace_timeout_ms)
    }

    /// Replace `planner_url` with `value` when it is set and non-empty.
    pub fn apply_planner_override(&mut self, value: Option<String>) {
        if let Some(url) = value.filter(|v| !v.trim().is_empty()) {
            debug!(planner_url = %url, "planner url overridden from environment");
            self.planner_url = url;
        }
    }
}

/// Load config from a TOML file, then apply the `PLANNER_URL` override.
///
/// If the file is missing, starts from `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let mut cfg = read_config_file(path)?;
    cfg.apply_planner_override(std::env::var(PLANNER_URL_ENV).ok());
    cfg.validate()?;
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        return Ok(AgentConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = read_config_file(&temp.path().join("missing.toml")).expect("read");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".agent").join("config.toml");
        let mut cfg = AgentConfig::default();
        cfg.planning_timeout_secs = 5;
        cfg.context.files = vec!["app/page.tsx".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = read_config_file(&path).expect("read");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "command_timeout_secs = 3\n").expect("write");
        let cfg = read_config_file(&path).expect("read");
        assert_eq!(cfg.command_timeout_secs, 3);
        assert_eq!(cfg.planning_timeout_secs, 20);
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let cfg = AgentConfig {
            planning_timeout_secs: 0,
            ..AgentConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("planning_timeout_secs"));
    }

    #[test]
    fn validate_rejects_escaping_context_files() {
        let mut cfg = AgentConfig::default();
        cfg.context.files.push("../secrets.env".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = AgentConfig::default();
        cfg.context.files.push("/etc/passwd".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn planner_override_ignores_blank_values() {
        let mut cfg = AgentConfig::default();
        cfg.apply_planner_override(Some("  ".to_string()));
        assert_eq!(cfg.planner_url, "http://localhost:8000");
        cfg.apply_planner_override(Some("http://planner:9000".to_string()));
        assert_eq!(cfg.planner_url, "http://planner:9000");
    }
}
