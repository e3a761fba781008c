//! Running external command line tools (gadget CLI, helm, kubectl).
//!
//! Every integration shells out through [`CommandRunner`] so tests can swap in a
//! scripted runner. Dropping an in-flight [`CommandRunner::run`] future kills the
//! child process, which is how callers implement cancellation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Instant;

use crate::error::CommandError;

/// Grace period for draining stderr once the child has exited or been killed.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Stand-in deadline for durations too long to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What happens when an invocation runs past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineMode {
    /// Kill the child and report [`CommandError::TimedOut`].
    Fail,
    /// Kill the child and return whatever it wrote so far.
    Collect,
}

/// A single command line to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub deadline: Duration,
    pub deadline_mode: DeadlineMode,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            deadline,
            deadline_mode: DeadlineMode::Fail,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn collect_on_deadline(mut self) -> Self {
        self.deadline_mode = DeadlineMode::Collect;
        self
    }

    /// Program file name, used in log lines and error messages.
    pub fn program_name(&self) -> String {
        program_name(&self.program)
    }
}

fn program_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_else(|| OsStr::new(""))
        .to_string_lossy()
        .into_owned()
}

/// Captured result of a finished (or deadline-collected) invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// True when the deadline fired in [`DeadlineMode::Collect`].
    pub timed_out: bool,
}

impl CommandOutput {
    /// Hand over stdout. Anything the tool wrote to stderr is only logged.
    pub fn into_stdout(self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            log::debug!("stderr (exit {:?}, timed out: {}): {stderr}", self.exit_code, self.timed_out);
        }
        self.stdout
    }
}

/// Runs command lines. Implementations must kill the child when the returned
/// future is dropped.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        let program = invocation.program_name();
        log::debug!("exec: {} {}", program, invocation.args.join(" "));

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| CommandError::Io {
            program: program.clone(),
            source: std::io::Error::other("stdout not captured"),
        })?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let now = Instant::now();
        let deadline = now
            .checked_add(invocation.deadline)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let mut out = Vec::new();
        let mut chunk = [0u8; 8192];
        let mut timed_out = false;

        // Chunked reads keep everything received before the deadline.
        loop {
            match tokio::time::timeout_at(deadline, stdout.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => out.extend_from_slice(&chunk[..n]),
                Ok(Err(source)) => {
                    return Err(CommandError::Io { program, source });
                }
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let status = if timed_out {
            None
        } else {
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(source)) => return Err(CommandError::Io { program, source }),
                Err(_) => {
                    timed_out = true;
                    None
                }
            }
        };

        if timed_out {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        let stderr = tokio::time::timeout(STDERR_DRAIN, stderr_task)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();

        if timed_out {
            if invocation.deadline_mode == DeadlineMode::Fail {
                return Err(CommandError::TimedOut {
                    program,
                    deadline: invocation.deadline,
                });
            }
            log::debug!("{} hit its {:?} deadline, keeping partial output", program, invocation.deadline);
            return Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr,
                exit_code: None,
                timed_out: true,
            });
        }

        let exit_code = status.and_then(|s| s.code());
        if !status.is_some_and(|s| s.success()) {
            return Err(CommandError::Failed {
                program,
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr,
            exit_code,
            timed_out: false,
        })
    }
}
