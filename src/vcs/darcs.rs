//! Darcs backend

use async_trait::async_trait;

use super::{argv, VcsBackend, VcsContext};
use crate::config::Method;
use crate::error::CheckoutError;
use crate::gateway::CommandResult;
use crate::revision::RevisionFormat;

#[derive(Debug, Clone, Copy, Default)]
pub struct Darcs;

#[async_trait]
impl VcsBackend for Darcs {
    fn name(&self) -> &'static str {
        "darcs"
    }

    fn property_source(&self) -> &'static str {
        "Darcs"
    }

    fn marker_dir(&self) -> &'static str {
        "_darcs"
    }

    fn supported_methods(&self) -> &'static [Method] {
        &[Method::Clobber, Method::Copy]
    }

    // the newest change entry, header and patch name together
    fn revision_format(&self) -> RevisionFormat {
        RevisionFormat::ChangeEntry
    }

    async fn probe_tool(&self, ctx: &VcsContext<'_>) -> Result<(), CheckoutError> {
        let version = ctx.run(argv(&["darcs", "--version"])).await?;
        if version.did_fail() {
            return Err(CheckoutError::Capability(
                "Darcs is not installed on worker".to_string(),
            ));
        }
        Ok(())
    }

    /// `darcs get` creates the repository itself, so it runs from the
    /// builder directory and names the workdir
    async fn clone_fresh(&self, ctx: &VcsContext<'_>) -> Result<CommandResult, CheckoutError> {
        let mut command = argv(&["darcs", "get", "--verbose", "--lazy"]);
        if let Some(revision) = ctx.revision() {
            command.extend(["--to-hash".to_string(), revision.to_string()]);
        }
        command.extend([
            "--repo-name".to_string(),
            ctx.workdir().to_string(),
            ctx.config().repourl().to_string(),
        ]);
        ctx.run_in(".", command).await
    }

    async fn update(&self, ctx: &VcsContext<'_>) -> Result<(), CheckoutError> {
        ctx.run_checked(argv(&["darcs", "pull", "--all", "--verbose"])).await
    }

    async fn current_revision(&self, ctx: &VcsContext<'_>) -> Result<String, CheckoutError> {
        ctx.run_stdout(argv(&["darcs", "changes", "--max-count=1"])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckoutConfig, CheckoutSettings};
    use crate::stamp::CheckoutTarget;
    use crate::testing::{Expect, ScriptedWorker};

    fn config() -> CheckoutConfig {
        let settings = CheckoutSettings {
            workdir: "wkdir".to_string(),
            ..CheckoutSettings::new("http://localhost/darcs")
        };
        CheckoutConfig::from_settings(settings, &Darcs).unwrap()
    }

    #[tokio::test]
    async fn test_clone_runs_from_builder_dir() {
        let worker = ScriptedWorker::new(vec![Expect::shell(
            ".",
            &["darcs", "get", "--verbose", "--lazy", "--repo-name", "wkdir", "http://localhost/darcs"],
        )]);
        let config = config();
        let target = CheckoutTarget::default();
        let ctx = VcsContext::new(&worker, &config, &target);

        let result = Darcs.clone_fresh(&ctx).await.unwrap();
        assert!(!result.did_fail());
        worker.assert_done();
    }

    #[tokio::test]
    async fn test_clone_to_revision() {
        let worker = ScriptedWorker::new(vec![Expect::shell(
            ".",
            &[
                "darcs", "get", "--verbose", "--lazy", "--to-hash", "abc123",
                "--repo-name", "source", "http://localhost/darcs",
            ],
        )]);
        let config = config();
        let target = CheckoutTarget {
            revision: Some("abc123".to_string()),
            ..CheckoutTarget::default()
        };
        let ctx = VcsContext::new(&worker, &config, &target).at("source");

        Darcs.clone_fresh(&ctx).await.unwrap();
        worker.assert_done();
    }

    #[tokio::test]
    async fn test_clean_not_supported() {
        let worker = ScriptedWorker::new(vec![]);
        let config = config();
        let target = CheckoutTarget::default();
        let ctx = VcsContext::new(&worker, &config, &target);

        let err = Darcs.list_untracked(&ctx, false).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Capability(_)));
    }
}
