//! `agent` CLI: run one cycle, inspect the planner context, or check a plan offline.

use std::fs;
use std::path::{Path, PathBuf};

use agent::core::types::PlannerReply;
use agent::core::validate::validate_plan;
use agent::exit_codes;
use agent::io::config::{AgentConfig, config_path, load_config, write_config};
use agent::io::context::build_context;
use agent::io::sandbox::Sandbox;
use agent::logging;
use agent::orchestrator::{Agent, RunOptions};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Plan and apply project changes from a prompt"
)]
struct Cli {
    /// Project root every file operation is confined to.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/.agent/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if none exists.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one plan/apply cycle and print the response as JSON.
    Run {
        prompt: String,
        #[arg(long)]
        session_id: Option<String>,
        /// Planner base or invocation URL (overrides config and `PLANNER_URL`).
        #[arg(long)]
        planner_url: Option<String>,
    },
    /// Print the project context that would be sent to the planner.
    Context,
    /// Validate a planner reply (or bare action array) from a JSON file.
    CheckPlan { file: PathBuf },
}

#[tokio::main]
async fn main() {
    logging::init();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(|| config_path(&cli.root));
    match cli.command {
        Command::Init { force } => cmd_init(&config_file, force),
        Command::Run {
            prompt,
            session_id,
            planner_url,
        } => cmd_run(&cli.root, &config_file, &prompt, session_id, planner_url).await,
        Command::Context => cmd_context(&cli.root, &config_file),
        Command::CheckPlan { file } => cmd_check_plan(&file),
    }
}

fn cmd_init(config_file: &Path, force: bool) -> Result<i32> {
    if config_file.exists() && !force {
        eprintln!("{} already exists (use --force to overwrite)", config_file.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_file, &AgentConfig::default())?;
    println!("wrote {}", config_file.display());
    Ok(exit_codes::OK)
}

async fn cmd_run(
    root: &Path,
    config_file: &Path,
    prompt: &str,
    session_id: Option<String>,
    planner_url: Option<String>,
) -> Result<i32> {
    let config = load_config(config_file)?;
    let ceiling = config.cycle_timeout();
    let agent = Agent::from_config(root, config).context("open project root")?;
    let options = RunOptions {
        session_id,
        planner_url,
    };
    let response = agent.run_agent_within(prompt, options, ceiling).await;
    print_json(&response)?;
    Ok(if response.error.is_some() {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

fn cmd_context(root: &Path, config_file: &Path) -> Result<i32> {
    let config = load_config(config_file)?;
    let sandbox = Sandbox::new(root).context("open project root")?;
    print_json(&build_context(&sandbox, &config.context))?;
    Ok(exit_codes::OK)
}

fn cmd_check_plan(file: &Path) -> Result<i32> {
    let raw = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", file.display()))?;
    let actions = match value {
        Value::Array(_) => value,
        other => {
            let reply: PlannerReply = serde_json::from_value(other)
                .with_context(|| format!("parse planner reply {}", file.display()))?;
            reply.actions.unwrap_or_else(|| Value::Array(Vec::new()))
        }
    };
    match validate_plan(&actions) {
        Ok(plan) => {
            print_json(&plan)?;
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("plan rejected: {err}");
            Ok(exit_codes::INVALID)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "agent",
            "--root",
            "/tmp/project",
            "run",
            "add a hello page",
            "--planner-url",
            "http://planner.test",
        ]);
        assert_eq!(cli.root, PathBuf::from("/tmp/project"));
        match cli.command {
            Command::Run {
                prompt,
                session_id,
                planner_url,
            } => {
                assert_eq!(prompt, "add a hello page");
                assert_eq!(session_id, None);
                assert_eq!(planner_url.as_deref(), Some("http://planner.test"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn init_writes_default_config_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());

        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        let written = fs::read_to_string(&path).expect("read");
        assert!(written.contains("planner_url = \"http://localhost:8000\""), "{written}");

        fs::write(&path, "planner_url = \"http://custom\"\n").expect("write");
        cmd_init(&path, false).expect("second init");
        let kept = fs::read_to_string(&path).expect("read");
        assert!(kept.contains("http://custom"));
    }

    #[test]
    fn root_defaults_to_current_dir() {
        let cli = Cli::parse_from(["agent", "context"]);
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(matches!(cli.command, Command::Context));
    }

    #[test]
    fn check_plan_accepts_bare_array_and_reply() {
        let temp = tempfile::tempdir().expect("tempdir");
        let bare = temp.path().join("bare.json");
        fs::write(&bare, r#"[{"type":"delete_file","path":"a.txt"}]"#).expect("write");
        assert_eq!(cmd_check_plan(&bare).expect("check"), exit_codes::OK);

        let reply = temp.path().join("reply.json");
        fs::write(
            &reply,
            r#"{"assistant_message":"hi","actions":[{"type":"run_command"}]}"#,
        )
        .expect("write");
        assert_eq!(cmd_check_plan(&reply).expect("check"), exit_codes::INVALID);
    }
}
