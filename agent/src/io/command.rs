//! Allow-listed command execution with line streaming and a hard timeout.
//!
//! Output flows producer -> consumer: one reader task per pipe splits the
//! stream into lines and sends them over a bounded channel; the runner drains
//! the channel, forwarding each line as a `command.chunk` trace event and
//! keeping a bounded copy for the result. Lines within one stream keep their
//! order; stdout and stderr are not ordered relative to each other.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::core::allow_list::{default_allow_list, is_allowed};
use crate::io::error::ApplyError;
use crate::io::trace::{TraceKind, Tracer};

/// Exit code reported for commands killed by the timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code reported in `command.end` when the command could not be run.
pub const FAILED_EXIT_CODE: i32 = -1;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl StreamName {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

#[derive(Debug)]
struct OutputLine {
    stream: StreamName,
    text: String,
}

/// Result of [`CommandRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// The command was not on the allow-list and never ran.
    pub skipped: bool,
    pub timed_out: bool,
}

impl CommandOutcome {
    fn skipped() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            skipped: true,
            timed_out: false,
        }
    }
}

pub struct CommandRunner {
    workdir: PathBuf,
    allow_list: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandRunner {
    pub fn new(workdir: PathBuf, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir,
            allow_list: default_allow_list(),
            timeout,
            output_limit_bytes,
        }
    }

    /// Replace the allow-list (the default is [`ALLOWED_COMMANDS`](crate::core::allow_list::ALLOWED_COMMANDS)).
    pub fn with_allow_list(mut self, allow_list: Vec<String>) -> Self {
        self.allow_list = allow_list;
        self
    }

    /// Run `command` in the project root if it is allow-listed.
    ///
    /// Commands off the list are not spawned and report a skipped success.
    /// Every `command.start` is followed by a `command.end`; when the command
    /// could not be spawned or awaited, the end event carries `error`.
    #[instrument(skip_all, fields(command = command, timeout_secs = self.timeout.as_secs()))]
    pub async fn run(&self, command: &str, tracer: &Tracer) -> Result<CommandOutcome, ApplyError> {
        if !is_allowed(&self.allow_list, command) {
            debug!(command, "command not allow-listed, skipping");
            tracer
                .emit(
                    TraceKind::CommandStart,
                    json!({"command": command, "skipped": true}),
                )
                .await;
            tracer
                .emit(
                    TraceKind::CommandEnd,
                    json!({"command": command, "exitCode": 0, "skipped": true}),
                )
                .await;
            return Ok(CommandOutcome::skipped());
        }

        let mut words = command.split_whitespace();
        let program = words.next().ok_or_else(|| ApplyError::Spawn {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;
        let mut cmd = Command::new(program);
        cmd.args(words)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracer
            .emit(
                TraceKind::CommandStart,
                json!({"command": command, "cwd": self.workdir.display().to_string()}),
            )
            .await;

        let outcome = match self.execute(cmd, command, tracer).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(err = %err, "command failed to run");
                tracer
                    .emit(
                        TraceKind::CommandEnd,
                        json!({
                            "command": command,
                            "exitCode": FAILED_EXIT_CODE,
                            "error": err.to_string(),
                        }),
                    )
                    .await;
                return Err(err);
            }
        };

        tracer
            .emit(
                TraceKind::CommandEnd,
                json!({
                    "command": command,
                    "exitCode": outcome.exit_code,
                    "timeout": outcome.timed_out,
                }),
            )
            .await;
        debug!(
            exit_code = outcome.exit_code,
            timed_out = outcome.timed_out,
            "command finished"
        );
        Ok(outcome)
    }

    /// Spawn `cmd`, stream its output and wait for it under the timeout.
    async fn execute(
        &self,
        mut cmd: Command,
        command: &str,
        tracer: &Tracer,
    ) -> Result<CommandOutcome, ApplyError> {
        debug!("spawning child process");
        let mut child = cmd.spawn().map_err(|source| ApplyError::Spawn {
            command: command.to_string(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| not_piped(command, "stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| not_piped(command, "stderr"))?;

        let (tx, mut rx) = mpsc::channel::<OutputLine>(CHANNEL_CAPACITY);
        let stdout_task = tokio::spawn(forward_lines(stdout, StreamName::Stdout, tx.clone()));
        let stderr_task = tokio::spawn(forward_lines(stderr, StreamName::Stderr, tx));

        let mut captured_stdout = Captured::new(self.output_limit_bytes);
        let mut captured_stderr = Captured::new(self.output_limit_bytes);

        let drain_and_wait = async {
            while let Some(line) = rx.recv().await {
                tracer
                    .emit(
                        TraceKind::CommandChunk,
                        json!({"stream": line.stream.as_str(), "text": line.text}),
                    )
                    .await;
                match line.stream {
                    StreamName::Stdout => captured_stdout.push(&line.text),
                    StreamName::Stderr => captured_stderr.push(&line.text),
                }
            }
            child.wait().await
        };
        let waited = tokio::time::timeout(self.timeout, drain_and_wait).await;

        let (exit_code, timed_out) = match waited {
            Ok(Ok(status)) => (status.code().unwrap_or(TIMEOUT_EXIT_CODE), false),
            Ok(Err(source)) => {
                return Err(ApplyError::Spawn {
                    command: command.to_string(),
                    source,
                });
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "command timed out, killing");
                if let Err(err) = child.kill().await {
                    warn!(err = %err, "failed to kill timed out command");
                }
                stdout_task.abort();
                stderr_task.abort();
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        let stdout = captured_stdout.finish("stdout");
        let mut stderr = captured_stderr.finish("stderr");
        if timed_out {
            stderr.push_str(&format!(
                "\n[command timed out after {}s]\n",
                self.timeout.as_secs()
            ));
        }

        Ok(CommandOutcome {
            exit_code,
            stdout,
            stderr,
            skipped: false,
            timed_out,
        })
    }
}

fn not_piped(command: &str, stream: &str) -> ApplyError {
    ApplyError::Spawn {
        command: command.to_string(),
        source: std::io::Error::other(format!("{stream} was not piped")),
    }
}

/// Read `reader` line by line and send each line (without its newline) to `tx`.
///
/// Stops at EOF, on a read error, or when the receiver is gone.
async fn forward_lines<R>(reader: R, stream: StreamName, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(OutputLine { stream, text }).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(err = %err, stream = stream.as_str(), "output read failed");
                break;
            }
        }
    }
}

/// Bounded in-memory copy of one output stream.
struct Captured {
    text: String,
    limit: usize,
    truncated: usize,
}

impl Captured {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: 0,
        }
    }

    fn push(&mut self, line: &str) {
        let needed = line.len() + 1;
        if self.text.len() + needed <= self.limit {
            self.text.push_str(line);
            self.text.push('\n');
        } else {
            self.truncated += needed;
        }
    }

    fn finish(mut self, label: &str) -> String {
        if self.truncated > 0 {
            self.text
                .push_str(&format!("[{label} truncated {} bytes]\n", self.truncated));
        }
        self.text
    }
}
