//! Source step driver - resolves the source stamp and runs the checkout

use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{CheckoutConfig, CheckoutSettings};
use crate::error::CheckoutError;
use crate::gateway::Worker;
use crate::machine::CheckoutStateMachine;
use crate::properties::{PropertyStore, SourceProperties};
use crate::stamp::{BuildContext, Change, CheckoutTarget};
use crate::vcs::{VcsBackend, VcsContext};

/// Property holding the revision inferred from the build's changes
pub const REVISION: &str = "revision";

/// Infers a revision from a stamp's changes; owned by the surrounding build system
pub type RevisionInference = Arc<dyn Fn(&[Change]) -> Option<String> + Send + Sync>;

/// Final result of a step run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepResult {
    Success,
    Failure,
    /// Dry run, nothing touched
    Skipped,
    /// Build stopped while the step ran
    Cancelled,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepResult::Success => "success",
            StepResult::Failure => "failure",
            StepResult::Skipped => "skipped",
            StepResult::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A named operator log attached to the step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLog {
    pub name: String,
    pub content: String,
}

/// What one run of a source step produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutOutcome {
    pub run_id: Uuid,
    pub result: StepResult,
    /// Set only on success
    pub resolved_revision: Option<String>,
    /// Workdir holding the final tree
    pub workdir: String,
    pub status_text: Vec<String>,
    /// Human-readable cause of a failure
    pub error: Option<String>,
    pub logs: Vec<StepLog>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CheckoutOutcome {
    pub fn is_success(&self) -> bool {
        self.result == StepResult::Success
    }

    pub fn log(&self, name: &str) -> Option<&str> {
        self.logs
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.content.as_str())
    }
}

/// A configured source step for one codebase
pub struct SourceStep {
    name: String,
    backend: Arc<dyn VcsBackend>,
    config: CheckoutConfig,
    properties: SourceProperties,
    infer_revision: Option<RevisionInference>,
}

impl SourceStep {
    /// Validate `settings` and bind the step to the build's property store.
    ///
    /// Fails before any remote interaction if the settings are invalid or the
    /// store cannot hold this step's codebase.
    pub fn new(
        backend: Arc<dyn VcsBackend>,
        settings: CheckoutSettings,
        store: &Arc<PropertyStore>,
    ) -> Result<Self, CheckoutError> {
        let config = CheckoutConfig::from_settings(settings, backend.as_ref())?;
        let properties = store.scope(config.codebase(), backend.property_source())?;
        let name = if config.codebase().is_empty() {
            backend.name().to_string()
        } else {
            format!("{} {}", backend.name(), config.codebase())
        };

        Ok(Self {
            name,
            backend,
            config,
            properties,
            infer_revision: None,
        })
    }

    pub fn with_revision_inference<F>(mut self, infer: F) -> Self
    where
        F: Fn(&[Change]) -> Option<String> + Send + Sync + 'static,
    {
        self.infer_revision = Some(Arc::new(infer));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Status words while running (`done == false`) or once finished
    pub fn describe(&self, done: bool) -> Vec<String> {
        let word = if done { "update" } else { "updating" };
        let mut desc = vec![word.to_string()];
        if !self.config.codebase().is_empty() {
            desc.push(self.config.codebase().to_string());
        }
        desc
    }

    pub async fn run(
        &self,
        build: &dyn BuildContext,
        worker: &dyn Worker,
        cancel: CancellationToken,
    ) -> CheckoutOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "source_step",
            step = %self.name,
            codebase = self.config.codebase(),
            run_id = %run_id
        );
        self.run_inner(run_id, build, worker, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        build: &dyn BuildContext,
        worker: &dyn Worker,
        cancel: CancellationToken,
    ) -> CheckoutOutcome {
        let mut outcome = CheckoutOutcome {
            run_id,
            result: StepResult::Failure,
            resolved_revision: None,
            workdir: self.config.workdir().to_string(),
            status_text: self.describe(false),
            error: None,
            logs: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        if self.config.not_really() {
            info!("Faking checkout/update");
            outcome.result = StepResult::Skipped;
            outcome.status_text = vec!["fake".to_string(), self.name.clone(), "successful".to_string()];
            push_log(
                &mut outcome,
                "log",
                format!("Faked {} checkout/update 'successful'\n", self.name),
            );
            return finish(outcome);
        }

        let target = match self.resolve_target(build, &mut outcome) {
            Some(target) => target,
            None => return finish(outcome),
        };

        let ctx = VcsContext::new(worker, &self.config, &target);
        let machine = CheckoutStateMachine::new(self.backend.as_ref(), ctx, &self.properties, cancel);
        match machine.run().await {
            Ok(revision) => {
                info!(revision = %revision, "Checkout finished");
                outcome.result = StepResult::Success;
                outcome.resolved_revision = Some(revision);
                outcome.status_text = self.describe(true);
            }
            Err(CheckoutError::Cancelled) => {
                outcome.result = StepResult::Cancelled;
                outcome.error = Some(CheckoutError::Cancelled.to_string());
            }
            Err(e) => {
                outcome.result = StepResult::Failure;
                outcome.error = Some(e.to_string());
            }
        }
        finish(outcome)
    }

    /// Work out branch, revision and patch; `None` means the run is over
    fn resolve_target(
        &self,
        build: &dyn BuildContext,
        outcome: &mut CheckoutOutcome,
    ) -> Option<CheckoutTarget> {
        let default_branch = self.config.branch().map(str::to_string);
        if self.config.always_use_latest() {
            return Some(CheckoutTarget {
                branch: default_branch,
                revision: None,
                patch: None,
            });
        }

        let codebase = self.config.codebase();
        let Some(stamp) = build.source_stamp(codebase) else {
            let message = format!("No sourcestamp found in build for codebase '{}'", codebase);
            warn!("{}", message);
            outcome.result = StepResult::Failure;
            outcome.status_text = ["Codebase", codebase, "not", "in", "build"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            outcome.error = Some(message.clone());
            push_log(outcome, "log", message);
            return None;
        };

        let revision = match stamp.revision {
            Some(revision) => Some(revision),
            None => {
                let inferred = self
                    .infer_revision
                    .as_ref()
                    .and_then(|infer| infer(&stamp.changes));
                if let Some(revision) = &inferred {
                    if let Err(e) = self.properties.update(REVISION, revision) {
                        warn!(error = %e, "Could not publish inferred revision");
                        outcome.result = StepResult::Failure;
                        outcome.error = Some(e.to_string());
                        return None;
                    }
                }
                inferred
            }
        };

        if let Some(patch) = &stamp.patch {
            push_log(outcome, "patch", patch.diff.clone());
        }

        Some(CheckoutTarget {
            branch: stamp.branch.or(default_branch),
            revision,
            patch: stamp.patch,
        })
    }
}

fn push_log(outcome: &mut CheckoutOutcome, name: &str, content: String) {
    outcome.logs.push(StepLog {
        name: name.to_string(),
        content,
    });
}

fn finish(mut outcome: CheckoutOutcome) -> CheckoutOutcome {
    outcome.finished_at = Utc::now();
    outcome
}
