//! Monotone (`mtn`) backend

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{argv, VcsBackend, VcsContext};
use crate::config::Method;
use crate::error::CheckoutError;
use crate::gateway::{join_remote, CommandResult};
use crate::revision::RevisionFormat;

/// Monotone checkouts backed by a database shared between builds
#[derive(Debug, Clone, Copy, Default)]
pub struct Monotone;

impl Monotone {
    fn branch<'c>(&self, ctx: &VcsContext<'c>) -> Result<&'c str, CheckoutError> {
        ctx.branch()
            .ok_or_else(|| CheckoutError::config("you must provide branch"))
    }

    async fn pull(&self, ctx: &VcsContext<'_>) -> Result<CommandResult, CheckoutError> {
        let config = ctx.config();
        let ticker = if config.progress() { "--ticker=dot" } else { "--ticker=none" };
        let command = vec![
            "mtn".to_string(),
            "pull".to_string(),
            format!("{}?{}", config.repourl(), self.branch(ctx)?),
            format!("--db={}", config.database()),
            ticker.to_string(),
        ];
        ctx.run(command).await
    }

    /// Create, migrate or replace the shared database as needed
    async fn check_database(&self, ctx: &VcsContext<'_>) -> Result<(), CheckoutError> {
        let db = ctx.config().database();
        let db_path = join_remote(ctx.workdir(), db);

        let mut needs_init = true;
        if ctx.probe()?.exists(&db_path).await? {
            let info = ctx.run_stdout(argv(&["mtn", "db", "info", "--db", db])).await?;
            if info.contains("migration needed") {
                info!(database = db, "Older format database found, migrating it");
                ctx.run_checked(argv(&["mtn", "db", "migrate", "--db", db])).await?;
                needs_init = false;
            } else if info.contains("too new, cannot use") || info.contains("database has no tables") {
                warn!(database = db, "Database unusable by this mtn, replacing it");
                ctx.remove_paths(&[db_path.clone()]).await?;
            } else if info.contains("not a monotone database") {
                return Err(CheckoutError::Capability(format!(
                    "{} is not a monotone database",
                    db_path
                )));
            } else {
                debug!(database = db, "Database exists and is compatible");
                needs_init = false;
            }
        }

        if needs_init {
            info!(database = db, "Initializing database");
            ctx.run_checked(argv(&["mtn", "db", "init", "--db", db])).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VcsBackend for Monotone {
    fn name(&self) -> &'static str {
        "monotone"
    }

    fn property_source(&self) -> &'static str {
        "Monotone"
    }

    fn marker_dir(&self) -> &'static str {
        "_MTN"
    }

    fn supported_methods(&self) -> &'static [Method] {
        &[Method::Clobber, Method::Copy, Method::Clean, Method::Fresh]
    }

    fn requires_branch(&self) -> bool {
        true
    }

    fn default_database(&self) -> &'static str {
        "../db.mtn"
    }

    fn revision_format(&self) -> RevisionFormat {
        RevisionFormat::Hex { len: 40 }
    }

    async fn probe_tool(&self, ctx: &VcsContext<'_>) -> Result<(), CheckoutError> {
        let version = ctx.run(argv(&["mtn", "--version"])).await?;
        if version.did_fail() {
            return Err(CheckoutError::Capability(
                "Monotone is not installed on worker".to_string(),
            ));
        }
        self.check_database(ctx).await
    }

    async fn clone_fresh(&self, ctx: &VcsContext<'_>) -> Result<CommandResult, CheckoutError> {
        let pull = self.pull(ctx).await?;
        if pull.did_fail() {
            return Ok(pull);
        }

        let mut command = argv(&["mtn", "checkout", "."]);
        command.push(format!("--db={}", ctx.config().database()));
        if let Some(revision) = ctx.revision() {
            command.extend(["--revision".to_string(), revision.to_string()]);
        }
        command.extend(["--branch".to_string(), self.branch(ctx)?.to_string()]);
        ctx.run(command).await
    }

    async fn update(&self, ctx: &VcsContext<'_>) -> Result<(), CheckoutError> {
        let branch = self.branch(ctx)?;
        let pull = self.pull(ctx).await?;
        if pull.did_fail() {
            return Err(CheckoutError::CommandFailed {
                command: format!("mtn pull {}?{}", ctx.config().repourl(), branch),
                exit_code: pull.exit_code,
            });
        }

        let mut command = argv(&["mtn", "update"]);
        command.push(format!("--db={}", ctx.config().database()));
        match ctx.revision() {
            Some(revision) => command.extend(["--revision".to_string(), revision.to_string()]),
            None => command.extend(["-r".to_string(), format!("h:{}", branch)]),
        }
        command.extend(["-b".to_string(), branch.to_string()]);
        ctx.run_checked(command).await
    }

    async fn list_untracked(
        &self,
        ctx: &VcsContext<'_>,
        include_ignored: bool,
    ) -> Result<Vec<String>, CheckoutError> {
        let mut listings = vec![argv(&["mtn", "ls", "unknown"])];
        if include_ignored {
            listings.push(argv(&["mtn", "ls", "ignored"]));
        }

        let mut files = Vec::new();
        for command in listings {
            let stdout = ctx.run_stdout(command).await?;
            files.extend(
                stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(files)
    }

    async fn current_revision(&self, ctx: &VcsContext<'_>) -> Result<String, CheckoutError> {
        ctx.run_stdout(argv(&["mtn", "automate", "select", "w:"])).await
    }
}
