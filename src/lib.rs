//! # Sourcestep
//!
//! Checkout orchestration for build source steps - drive a remote workspace
//! to a declared source stamp and report the revision actually checked out.
//!
//! This crate provides:
//! - Source stamp resolution (branch, revision, patch) per codebase
//! - Incremental and full checkouts (clobber, copy, clean, fresh)
//! - Bounded, cancellable retry of the initial clone
//! - Patch transfer and apply with stale-patch detection
//! - Revision capture and validation, published as build properties
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                    SourceStep                    │
//! │   stamp → (branch, revision, patch) → outcome    │
//! │                        │                         │
//! │                        ▼                         │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │          CheckoutStateMachine              │  │
//! │  │ ProbeTool → ProbeWorkspace → Acquire →     │  │
//! │  │        Patch → CaptureRevision → Done      │  │
//! │  └────────────────────────────────────────────┘  │
//! │      │          │          │           │         │
//! │      ▼          ▼          ▼           ▼         │
//! │  ┌───────┐  ┌───────┐  ┌───────┐  ┌──────────┐   │
//! │  │ Probe │  │ Retry │  │ Patch │  │ Revision │   │
//! │  └───────┘  └───────┘  └───────┘  └──────────┘   │
//! │                        │                         │
//! │                        ▼                         │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │     VcsBackend  (Monotone, Darcs, ...)     │  │
//! │  └────────────────────────────────────────────┘  │
//! │                        │                         │
//! │                        ▼                         │
//! │            RemoteOpGateway + FileTransfer        │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sourcestep::{CheckoutSettings, PropertyStore, SourceStep, Monotone};
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(PropertyStore::for_codebases([""]));
//! let settings = CheckoutSettings {
//!     branch: Some("master".into()),
//!     mode: "full".into(),
//!     method: Some("clean".into()),
//!     ..CheckoutSettings::new("mtn://example.org/project")
//! };
//! let step = SourceStep::new(Arc::new(Monotone), settings, &store)?;
//!
//! let outcome = step.run(&build, &worker, CancellationToken::new()).await;
//! println!("{} at {:?}", outcome.result, outcome.resolved_revision);
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod machine;
pub mod patch;
pub mod probe;
pub mod properties;
pub mod retry;
pub mod revision;
pub mod stamp;
pub mod step;
pub mod vcs;

#[cfg(test)]
mod testing;

pub use config::{CheckoutConfig, CheckoutSettings, Method, Mode, RetryConfig, RetrySettings};
pub use error::CheckoutError;
pub use gateway::{CommandResult, FileTransfer, RemoteOpGateway, ShellCommand, Worker};
pub use machine::{CheckoutState, CheckoutStateMachine};
pub use patch::PatchApplier;
pub use probe::WorkspaceProbe;
pub use properties::{PropertyLayout, PropertyStore, PropertyValue, SourceProperties};
pub use retry::{RetryDecision, RetryPolicy};
pub use revision::{RevisionCapture, RevisionFormat};
pub use stamp::{BuildContext, BuildSources, Change, CheckoutTarget, PatchSpec, SourceStamp};
pub use step::{CheckoutOutcome, SourceStep, StepLog, StepResult};
pub use vcs::{Darcs, Monotone, VcsBackend, VcsContext};
