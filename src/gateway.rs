//! Remote worker interface
//!
//! The engine never touches the worker directly. Every command, stat, removal,
//! copy and file push goes through these traits, so the transport (and the
//! worker's idea of a filesystem) stays outside this crate. Remote paths are
//! `/`-separated and relative to the builder directory on the worker.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;

use crate::error::CheckoutError;

/// A shell command to run on the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Directory to run in, relative to the builder directory
    pub workdir: String,
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    /// Capture stdout into the result
    pub collect_stdout: bool,
    /// Describe the environment in the step log
    pub log_environ: bool,
}

impl ShellCommand {
    pub fn new<I, S>(workdir: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            workdir: workdir.into(),
            argv: argv.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            timeout: Duration::from_secs(20 * 60),
            collect_stdout: false,
            log_environ: true,
        }
    }

    /// Space-joined argv for logs and error messages
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Outcome of a finished remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    /// Present only when stdout collection was requested
    pub stdout: Option<String>,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    pub fn timed_out() -> Self {
        Self {
            exit_code: -1,
            stdout: None,
            timed_out: true,
        }
    }

    /// A timeout counts the same as a non-zero exit
    pub fn did_fail(&self) -> bool {
        self.timed_out || self.exit_code != 0
    }
}

/// Remote command and filesystem operations on a worker
#[async_trait]
pub trait RemoteOpGateway: Send + Sync {
    async fn run_command(&self, cmd: &ShellCommand) -> Result<CommandResult, CheckoutError>;

    /// Whether `path` exists on the worker
    async fn probe_path(&self, path: &str, timeout: Duration) -> Result<bool, CheckoutError>;

    /// Remove files or directories; returns the worker's exit code
    async fn remove_paths(&self, paths: &[String], timeout: Duration) -> Result<i32, CheckoutError>;

    /// Copy a whole directory tree; returns the worker's exit code
    async fn copy_directory(&self, from: &str, to: &str, timeout: Duration)
        -> Result<i32, CheckoutError>;
}

/// Pushes local files to the worker
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Deliver the bytes of `local` to `target` on the worker
    async fn push(&self, local: &Path, target: &str, timeout: Duration) -> Result<i32, CheckoutError>;
}

/// A worker that can run commands and receive files
pub trait Worker: RemoteOpGateway + FileTransfer {}

impl<T: RemoteOpGateway + FileTransfer> Worker for T {}

/// Join remote path segments, folding `.` and `..` lexically
pub fn join_remote(base: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut leading_up = 0usize;
    for segment in base.split('/').chain(rel.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    leading_up += 1;
                }
            }
            s => parts.push(s),
        }
    }
    let mut joined: Vec<&str> = std::iter::repeat("..").take(leading_up).collect();
    joined.extend(parts);
    if joined.is_empty() {
        ".".to_string()
    } else {
        joined.join("/")
    }
}
