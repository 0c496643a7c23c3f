//! Checkout state machine
//!
//! ```text
//! ProbeTool ──▶ ProbeWorkspace ──▶ Acquire ──▶ [Patch] ──▶ CaptureRevision ──▶ Done
//!     │               │               │           │              │
//!     └───────────────┴───────────────┴─────┬─────┴──────────────┘
//!                                           ▼
//!                                         Failed
//! ```
//!
//! Each state issues its remote operations strictly one after another. Only
//! the initial clone inside `Acquire` is retried.

use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Method, Mode};
use crate::error::CheckoutError;
use crate::patch::PatchApplier;
use crate::properties::SourceProperties;
use crate::retry::{backoff, RetryDecision, RetryPolicy};
use crate::revision::RevisionCapture;
use crate::vcs::{VcsBackend, VcsContext};

/// Side directory the copy method keeps up to date
pub const SOURCE_DIR: &str = "source";

/// Where a checkout run currently is
#[derive(Debug)]
pub enum CheckoutState {
    ProbeTool,
    ProbeWorkspace,
    Acquire,
    Patch,
    CaptureRevision,
    /// Checked out; holds the captured revision
    Done(String),
    /// Holds the error that ended the run
    Failed(CheckoutError),
}

impl CheckoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Done(_) | CheckoutState::Failed(_))
    }
}

impl fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckoutState::ProbeTool => "probe_tool",
            CheckoutState::ProbeWorkspace => "probe_workspace",
            CheckoutState::Acquire => "acquire",
            CheckoutState::Patch => "patch",
            CheckoutState::CaptureRevision => "capture_revision",
            CheckoutState::Done(_) => "done",
            CheckoutState::Failed(_) => "failed",
        };
        f.write_str(name)
    }
}

/// Drives one workspace from whatever it holds to the checkout target
pub struct CheckoutStateMachine<'a> {
    backend: &'a dyn VcsBackend,
    ctx: VcsContext<'a>,
    properties: &'a SourceProperties,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a> CheckoutStateMachine<'a> {
    pub fn new(
        backend: &'a dyn VcsBackend,
        ctx: VcsContext<'a>,
        properties: &'a SourceProperties,
        cancel: CancellationToken,
    ) -> Self {
        let retry = RetryPolicy::new(ctx.config().retry());
        Self {
            backend,
            ctx: ctx.with_cancel(cancel.clone()),
            properties,
            retry,
            cancel,
        }
    }

    /// Run to a terminal state, returning the captured revision
    pub async fn run(mut self) -> Result<String, CheckoutError> {
        let mut state = CheckoutState::ProbeTool;
        while !state.is_terminal() {
            let from = state.to_string();
            state = self.step(state).await;
            debug!(from = %from, to = %state, "Checkout state transition");
        }

        match state {
            CheckoutState::Done(revision) => Ok(revision),
            CheckoutState::Failed(e) => {
                if e.is_cancelled() {
                    info!("Checkout stopped");
                } else {
                    error!(error = %e, "Checkout failed");
                }
                Err(e)
            }
            _ => unreachable!("loop exits only on terminal states"),
        }
    }

    async fn step(&mut self, state: CheckoutState) -> CheckoutState {
        if self.cancel.is_cancelled() {
            return CheckoutState::Failed(CheckoutError::Cancelled);
        }

        let result = match state {
            CheckoutState::ProbeTool => self
                .backend
                .probe_tool(&self.ctx)
                .await
                .map(|_| CheckoutState::ProbeWorkspace),
            CheckoutState::ProbeWorkspace => self
                .probe_workspace()
                .await
                .map(|_| CheckoutState::Acquire),
            CheckoutState::Acquire => self.acquire().await.map(|_| {
                if self.ctx.patch().is_some() {
                    CheckoutState::Patch
                } else {
                    CheckoutState::CaptureRevision
                }
            }),
            CheckoutState::Patch => self.patch().await.map(|_| CheckoutState::CaptureRevision),
            CheckoutState::CaptureRevision => RevisionCapture::new(self.backend, self.properties)
                .capture(&self.ctx, &self.cancel)
                .await
                .map(CheckoutState::Done),
            terminal => Ok(terminal),
        };

        // an operation that finished after a stop request does not count
        if self.cancel.is_cancelled() {
            return CheckoutState::Failed(CheckoutError::Cancelled);
        }
        result.unwrap_or_else(CheckoutState::Failed)
    }

    /// A tree patched by an earlier run is never reused
    async fn probe_workspace(&self) -> Result<(), CheckoutError> {
        if self.ctx.probe()?.is_patched(self.ctx.workdir()).await? {
            warn!(workdir = self.ctx.workdir(), "Workdir was patched by a previous run, removing it");
            self.remove_dir(self.ctx.workdir()).await?;
        }
        Ok(())
    }

    async fn acquire(&mut self) -> Result<(), CheckoutError> {
        let config = self.ctx.config();
        let ctx = self.ctx.clone();
        match (config.mode(), config.method()) {
            (Mode::Incremental, _) => self.incremental(&ctx).await,
            (Mode::Full, Some(Method::Clobber)) => self.clobber(&ctx).await,
            (Mode::Full, Some(Method::Copy)) => self.copy(&ctx).await,
            (Mode::Full, Some(Method::Clean)) => self.clean(&ctx, false).await,
            (Mode::Full, Some(Method::Fresh)) => self.clean(&ctx, true).await,
            (Mode::Full, None) => Err(CheckoutError::config("full mode requires a method")),
        }
    }

    async fn incremental(&mut self, ctx: &VcsContext<'a>) -> Result<(), CheckoutError> {
        if self.is_updatable(ctx).await? {
            self.backend.update(ctx).await
        } else {
            self.clone_with_retry(ctx).await
        }
    }

    async fn clobber(&mut self, ctx: &VcsContext<'a>) -> Result<(), CheckoutError> {
        self.remove_dir(ctx.workdir()).await?;
        self.clone_with_retry(ctx).await
    }

    /// Update the side directory, then copy it over the real workdir.
    ///
    /// The VCS never runs in the real workdir in this method.
    async fn copy(&mut self, ctx: &VcsContext<'a>) -> Result<(), CheckoutError> {
        self.remove_dir(ctx.workdir()).await?;

        let source = ctx.at(SOURCE_DIR);
        self.incremental(&source).await?;

        ctx.copy_directory(SOURCE_DIR, ctx.workdir()).await
    }

    async fn clean(&mut self, ctx: &VcsContext<'a>, include_ignored: bool) -> Result<(), CheckoutError> {
        if !self.is_updatable(ctx).await? {
            return self.clone_with_retry(ctx).await;
        }

        let files: Vec<String> = self
            .backend
            .list_untracked(ctx, include_ignored)
            .await?
            .into_iter()
            .map(|f| format!("{}/{}", ctx.workdir(), f))
            .collect();
        if !files.is_empty() {
            debug!(count = files.len(), "Removing untracked files");
            ctx.remove_paths(&files).await?;
        }
        self.backend.update(ctx).await
    }

    /// Clone, wiping and retrying per the retry budget.
    ///
    /// Every retry is a plain clone into a wiped workdir; the workspace is not
    /// probed again.
    async fn clone_with_retry(&mut self, ctx: &VcsContext<'a>) -> Result<(), CheckoutError> {
        loop {
            let result = self.backend.clone_fresh(ctx).await?;
            if !result.did_fail() {
                return Ok(());
            }

            match self.retry.should_retry(&self.cancel) {
                RetryDecision::GiveUp if self.cancel.is_cancelled() => {
                    return Err(CheckoutError::Cancelled);
                }
                RetryDecision::GiveUp => {
                    return Err(CheckoutError::TransientAcquisition {
                        attempts: self.retry.failures(),
                    });
                }
                RetryDecision::Retry { after } => {
                    warn!(
                        remaining = self.retry.remaining(),
                        delay_secs = after.as_secs_f64(),
                        "Checkout failed, retrying"
                    );
                    backoff(after, &self.cancel).await?;
                    self.remove_dir(ctx.workdir()).await?;
                }
            }
        }
    }

    async fn patch(&self) -> Result<(), CheckoutError> {
        match self.ctx.patch() {
            Some(patch) => PatchApplier::new(&self.ctx).apply(patch).await,
            None => Ok(()),
        }
    }

    async fn is_updatable(&self, ctx: &VcsContext<'a>) -> Result<bool, CheckoutError> {
        ctx.probe()?
            .is_updatable(ctx.workdir(), self.backend.marker_dir())
            .await
    }

    async fn remove_dir(&self, dir: &str) -> Result<(), CheckoutError> {
        self.ctx.remove_paths(&[dir.to_string()]).await
    }
}
