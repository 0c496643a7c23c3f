//! Workspace state probing

use std::time::Duration;
use tracing::debug;

use crate::error::CheckoutError;
use crate::gateway::{join_remote, Worker};

/// Marker left in a workdir by a patch apply
pub const PATCHED_MARKER: &str = ".buildbot-patched";

/// Answers questions about what is already on the worker
pub struct WorkspaceProbe<'a> {
    worker: &'a dyn Worker,
    timeout: Duration,
}

impl<'a> WorkspaceProbe<'a> {
    pub fn new(worker: &'a dyn Worker, timeout: Duration) -> Self {
        Self { worker, timeout }
    }

    pub async fn exists(&self, path: &str) -> Result<bool, CheckoutError> {
        let exists = self.worker.probe_path(path, self.timeout).await?;
        debug!(path, exists, "Probed path");
        Ok(exists)
    }

    /// A previous run patched this workdir and it must be reset
    pub async fn is_patched(&self, workdir: &str) -> Result<bool, CheckoutError> {
        self.exists(&join_remote(workdir, PATCHED_MARKER)).await
    }

    /// The workdir holds a checkout the backend can update in place.
    ///
    /// Only the backend's marker directory counts; an existing workdir
    /// without it is not updatable.
    pub async fn is_updatable(&self, workdir: &str, marker_dir: &str) -> Result<bool, CheckoutError> {
        self.exists(&join_remote(workdir, marker_dir)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Expect, ScriptedWorker};

    #[tokio::test]
    async fn test_patched_marker_probe() {
        let worker = ScriptedWorker::new(vec![Expect::stat("wkdir/.buildbot-patched", true)]);
        let probe = WorkspaceProbe::new(&worker, Duration::from_secs(1200));

        assert!(probe.is_patched("wkdir").await.unwrap());
        worker.assert_done();
    }

    #[tokio::test]
    async fn test_updatable_checks_marker_not_workdir() {
        let worker = ScriptedWorker::new(vec![Expect::stat("wkdir/_MTN", false)]);
        let probe = WorkspaceProbe::new(&worker, Duration::from_secs(1200));

        assert!(!probe.is_updatable("wkdir", "_MTN").await.unwrap());
        worker.assert_done();
    }
}
