//! External process invocation for git and the CI converter.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{MigrationError, Result};

/// A command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Data written to stdin.
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// A `git` invocation.
    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("git", args).env("GIT_TERMINAL_PROMPT", "0")
    }

    /// An arbitrary invocation.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed data to stdin.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The first argument, used to identify git subcommands.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Printable command line.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is not an error; spawn failures are.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Replaces secrets in text before it is logged or stored.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    /// Create a redactor for the given secrets. Empty strings are ignored.
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secrets: secrets
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// Redact every known secret.
    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), "***"))
    }
}

/// Runs commands as child processes. Children are killed if the returned
/// future is dropped.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    redactor: Redactor,
}

impl SystemRunner {
    /// Create a runner that redacts the given secrets from its logs.
    pub fn new(redactor: Redactor) -> Self {
        Self { redactor }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        match &spec.cwd {
            Some(cwd) => tracing::debug!(
                cwd = %cwd.display(),
                "$ {}",
                self.redactor.redact(&spec.display())
            ),
            None => tracing::debug!("$ {}", self.redactor.redact(&spec.display())),
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        // Input is written while output is collected so a full pipe cannot
        // deadlock either side.
        let feed = async move {
            match (&spec.stdin, stdin) {
                (Some(input), Some(mut stdin)) => {
                    stdin.write_all(input.as_bytes()).await?;
                    stdin.shutdown().await
                }
                _ => Ok(()),
            }
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if let Err(e) = written {
            if output.status.success() {
                return Err(MigrationError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("{} exited before reading its input: {e}", spec.program),
                )));
            }
            tracing::debug!(program = %spec.program, error = %e, "Input not fully written");
        }

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: self
                .redactor
                .redact(&String::from_utf8_lossy(&output.stderr)),
        };

        if !result.success() {
            tracing::debug!(
                program = %spec.program,
                code = ?result.code,
                stderr = %result.stderr.trim(),
                "Command failed"
            );
        }
        Ok(result)
    }
}
