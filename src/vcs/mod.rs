//! VCS backends
//!
//! A backend knows its tool's command syntax and nothing about checkout
//! strategy. The state machine decides *what* to do (clone, update, clean,
//! capture) and calls through [`VcsBackend`] for *how*.

mod darcs;
mod monotone;

pub use darcs::Darcs;
pub use monotone::Monotone;

use std::path::Path;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{CheckoutConfig, Method};
use crate::error::CheckoutError;
use crate::gateway::{CommandResult, ShellCommand, Worker};
use crate::probe::WorkspaceProbe;
use crate::revision::RevisionFormat;
use crate::stamp::{CheckoutTarget, PatchSpec};

/// Per-backend checkout capabilities
#[async_trait]
pub trait VcsBackend: Send + Sync {
    /// Short lowercase name, used as the step name
    fn name(&self) -> &'static str;

    /// Name recorded as the source of published properties
    fn property_source(&self) -> &'static str;

    /// Directory whose presence makes a workdir updatable
    fn marker_dir(&self) -> &'static str;

    /// Full-mode methods this backend can carry out
    fn supported_methods(&self) -> &'static [Method];

    fn requires_branch(&self) -> bool {
        false
    }

    /// Database path used when none is configured
    fn default_database(&self) -> &'static str {
        ""
    }

    fn revision_format(&self) -> RevisionFormat;

    /// Make sure the tool is installed and usable.
    ///
    /// A missing tool is a [`CheckoutError::Capability`] and is never retried.
    async fn probe_tool(&self, ctx: &VcsContext<'_>) -> Result<(), CheckoutError>;

    /// One fresh clone into `ctx.workdir()`.
    ///
    /// A failed clone is returned as a failed [`CommandResult`], not an error,
    /// so the caller can decide whether to retry.
    async fn clone_fresh(&self, ctx: &VcsContext<'_>) -> Result<CommandResult, CheckoutError>;

    /// Bring an existing checkout to the target
    async fn update(&self, ctx: &VcsContext<'_>) -> Result<(), CheckoutError>;

    /// Untracked files relative to the workdir, plus ignored ones if asked
    async fn list_untracked(
        &self,
        _ctx: &VcsContext<'_>,
        _include_ignored: bool,
    ) -> Result<Vec<String>, CheckoutError> {
        Err(CheckoutError::Capability(format!(
            "{} cannot list untracked files",
            self.name()
        )))
    }

    /// Raw output of the backend's "which revision is this" query
    async fn current_revision(&self, ctx: &VcsContext<'_>) -> Result<String, CheckoutError>;
}

/// Everything a backend needs to issue commands for one run.
///
/// Every remote operation goes through here: it carries the configured
/// timeout and is refused once the run's token is cancelled.
#[derive(Clone)]
pub struct VcsContext<'a> {
    worker: &'a dyn Worker,
    config: &'a CheckoutConfig,
    target: &'a CheckoutTarget,
    workdir: String,
    cancel: CancellationToken,
}

impl<'a> VcsContext<'a> {
    pub fn new(worker: &'a dyn Worker, config: &'a CheckoutConfig, target: &'a CheckoutTarget) -> Self {
        Self {
            worker,
            config,
            target,
            workdir: config.workdir().to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop issuing remote operations once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Same run, operating in another directory
    pub fn at(&self, workdir: impl Into<String>) -> Self {
        Self {
            workdir: workdir.into(),
            ..self.clone()
        }
    }

    pub fn worker(&self) -> &'a dyn Worker {
        self.worker
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails with [`CheckoutError::Cancelled`] once the run was stopped
    pub fn ensure_running(&self) -> Result<(), CheckoutError> {
        if self.cancel.is_cancelled() {
            debug!(workdir = %self.workdir, "Run stopped, not issuing remote operation");
            return Err(CheckoutError::Cancelled);
        }
        Ok(())
    }

    pub fn config(&self) -> &'a CheckoutConfig {
        self.config
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// Target branch, falling back to the configured one
    pub fn branch(&self) -> Option<&'a str> {
        self.target.branch.as_deref().or(self.config.branch())
    }

    pub fn revision(&self) -> Option<&'a str> {
        self.target.revision.as_deref()
    }

    pub fn patch(&self) -> Option<&'a PatchSpec> {
        self.target.patch.as_ref()
    }

    pub fn command(&self, workdir: &str, argv: Vec<String>) -> ShellCommand {
        ShellCommand {
            workdir: workdir.to_string(),
            argv,
            env: self.config.env().clone(),
            timeout: self.config.timeout(),
            collect_stdout: false,
            log_environ: self.config.log_environ(),
        }
    }

    /// Run in the workdir without judging the result
    pub async fn run(&self, argv: Vec<String>) -> Result<CommandResult, CheckoutError> {
        let workdir = self.workdir.clone();
        self.run_in(&workdir, argv).await
    }

    pub async fn run_in(&self, workdir: &str, argv: Vec<String>) -> Result<CommandResult, CheckoutError> {
        let cmd = self.command(workdir, argv);
        self.dispatch(&cmd).await
    }

    /// Run in the workdir; a failed command is an error
    pub async fn run_checked(&self, argv: Vec<String>) -> Result<(), CheckoutError> {
        let cmd = self.command(&self.workdir, argv);
        let result = self.dispatch(&cmd).await?;
        check(&cmd, &result)
    }

    /// Run in the workdir and return its stdout; a failed command is an error
    pub async fn run_stdout(&self, argv: Vec<String>) -> Result<String, CheckoutError> {
        let mut cmd = self.command(&self.workdir, argv);
        cmd.collect_stdout = true;
        let result = self.dispatch(&cmd).await?;
        check(&cmd, &result)?;
        Ok(result.stdout.unwrap_or_default())
    }

    async fn dispatch(&self, cmd: &ShellCommand) -> Result<CommandResult, CheckoutError> {
        self.ensure_running()?;
        self.worker.run_command(cmd).await
    }

    /// Probe bound to this run's worker and timeout
    pub fn probe(&self) -> Result<WorkspaceProbe<'a>, CheckoutError> {
        self.ensure_running()?;
        Ok(WorkspaceProbe::new(self.worker, self.config.timeout()))
    }

    /// Remove `paths` on the worker; a non-zero exit is an error
    pub async fn remove_paths(&self, paths: &[String]) -> Result<(), CheckoutError> {
        self.ensure_running()?;
        let rc = self.worker.remove_paths(paths, self.config.timeout()).await?;
        if rc != 0 {
            return Err(CheckoutError::CommandFailed {
                command: format!("rmdir {}", paths.join(" ")),
                exit_code: rc,
            });
        }
        Ok(())
    }

    /// Copy a directory tree on the worker; a non-zero exit is an error
    pub async fn copy_directory(&self, from: &str, to: &str) -> Result<(), CheckoutError> {
        self.ensure_running()?;
        let rc = self.worker.copy_directory(from, to, self.config.timeout()).await?;
        if rc != 0 {
            return Err(CheckoutError::CommandFailed {
                command: format!("cpdir {} {}", from, to),
                exit_code: rc,
            });
        }
        Ok(())
    }

    /// Push a local file to the worker, returning its exit code
    pub async fn push(&self, local: &Path, target: &str) -> Result<i32, CheckoutError> {
        self.ensure_running()?;
        self.worker.push(local, target, self.config.timeout()).await
    }
}

/// Turn a failed result into [`CheckoutError::CommandFailed`]
pub fn check(cmd: &ShellCommand, result: &CommandResult) -> Result<(), CheckoutError> {
    if result.did_fail() {
        warn!(
            command = %cmd.display(),
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            "Source step command failed"
        );
        return Err(CheckoutError::CommandFailed {
            command: cmd.display(),
            exit_code: result.exit_code,
        });
    }
    Ok(())
}

pub(crate) fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
