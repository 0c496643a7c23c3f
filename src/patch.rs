//! Patch download and apply
//!
//! The diff and a `patched` marker are written to a private local temp dir,
//! pushed to the worker, and the diff is applied there with `patch`. The temp
//! dir is removed on every exit path, including early returns and a dropped
//! future. The marker stays in the workdir so the next run knows the tree
//! is no longer pristine.

use std::path::Path;
use tracing::{debug, error, info};

use crate::error::CheckoutError;
use crate::gateway::join_remote;
use crate::probe::PATCHED_MARKER;
use crate::stamp::PatchSpec;
use crate::vcs::VcsContext;

/// Name of the transferred diff on the worker
pub const DIFF_FILE: &str = ".buildbot-diff";

const MARKER_CONTENT: &str = "patched\n";

/// Applies a [`PatchSpec`] to a remote workdir
pub struct PatchApplier<'a> {
    ctx: &'a VcsContext<'a>,
}

impl<'a> PatchApplier<'a> {
    pub fn new(ctx: &'a VcsContext<'a>) -> Self {
        Self { ctx }
    }

    pub async fn apply(&self, patch: &PatchSpec) -> Result<(), CheckoutError> {
        let artifacts = tempfile::Builder::new().prefix("sourcestep-patch").tempdir()?;
        let diff = artifacts.path().join(DIFF_FILE);
        let marker = artifacts.path().join(PATCHED_MARKER);
        tokio::fs::write(&diff, &patch.diff).await?;
        tokio::fs::write(&marker, MARKER_CONTENT).await?;

        let result = self.transfer_and_apply(patch, &diff, &marker).await;

        let dir = artifacts.path().to_path_buf();
        if let Err(e) = artifacts.close() {
            error!(dir = %dir.display(), error = %e, "Failed to remove local patch artifacts");
            if result.is_ok() {
                return Err(e.into());
            }
        }
        result
    }

    async fn transfer_and_apply(
        &self,
        patch: &PatchSpec,
        diff: &Path,
        marker: &Path,
    ) -> Result<(), CheckoutError> {
        let workdir = self.ctx.workdir();
        let patch_dir = match &patch.root {
            Some(root) => join_remote(workdir, root),
            None => workdir.to_string(),
        };
        let remote_diff = join_remote(&patch_dir, DIFF_FILE);
        let rc = self.ctx.push(diff, &remote_diff).await?;
        if rc != 0 {
            return Err(CheckoutError::Patch(format!("transfer of {} failed ({})", remote_diff, rc)));
        }
        let remote_marker = join_remote(workdir, PATCHED_MARKER);
        let rc = self.ctx.push(marker, &remote_marker).await?;
        if rc != 0 {
            return Err(CheckoutError::Patch(format!("transfer of {} failed ({})", remote_marker, rc)));
        }
        debug!(diff = %remote_diff, marker = %remote_marker, "Patch artifacts transferred");

        let command = vec![
            "patch".to_string(),
            format!("-p{}", patch.level),
            "--remove-empty-files".to_string(),
            "--force".to_string(),
            "--forward".to_string(),
            "-i".to_string(),
            DIFF_FILE.to_string(),
        ];
        let result = self.ctx.run_in(&patch_dir, command).await?;
        if result.did_fail() {
            return Err(CheckoutError::Patch(format!(
                "patch exited with code {}",
                result.exit_code
            )));
        }

        self.ctx
            .remove_paths(&[remote_diff.clone()])
            .await
            .map_err(|e| match e {
                CheckoutError::CommandFailed { exit_code, .. } => {
                    CheckoutError::Patch(format!("could not remove {} ({})", remote_diff, exit_code))
                }
                other => other,
            })?;

        info!(level = patch.level, dir = %patch_dir, "Applied patch");
        Ok(())
    }
}
