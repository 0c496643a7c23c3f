//! Source stamps - the declared target state of a checkout

use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A change that went into the build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Revision the change produced, if the VCS has one
    pub revision: Option<String>,
    /// Branch the change landed on
    pub branch: Option<String>,
    /// Author
    pub who: String,
    /// Commit message
    pub comments: String,
    /// When the change was made
    pub when: DateTime<Utc>,
}

/// A unified diff plus the strip level needed to apply it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Leading path components to strip (`patch -p`)
    pub level: u32,
    /// Diff text
    pub diff: String,
    /// Subdirectory of the workdir to apply the diff in
    pub root: Option<String>,
}

impl PatchSpec {
    pub fn new(level: u32, diff: impl Into<String>) -> Self {
        Self {
            level,
            diff: diff.into(),
            root: None,
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }
}

/// Resolved target state for one codebase of a build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub codebase: String,
    /// `None` means the step's default branch
    pub branch: Option<String>,
    /// `None` means resolve to latest
    pub revision: Option<String>,
    pub patch: Option<PatchSpec>,
    /// Changes in the order they were made
    #[serde(default)]
    pub changes: Vec<Change>,
}

impl SourceStamp {
    pub fn new(codebase: impl Into<String>) -> Self {
        Self {
            codebase: codebase.into(),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_patch(mut self, patch: PatchSpec) -> Self {
        self.patch = Some(patch);
        self
    }

    pub fn with_changes(mut self, changes: Vec<Change>) -> Self {
        self.changes = changes;
        self
    }
}

/// What one run checks out, after stamp resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutTarget {
    pub branch: Option<String>,
    /// `None` checks out the branch head
    pub revision: Option<String>,
    pub patch: Option<PatchSpec>,
}

/// What a source step needs from the running build
pub trait BuildContext: Send + Sync {
    /// The stamp for `codebase`, if the build has one
    fn source_stamp(&self, codebase: &str) -> Option<SourceStamp>;
}

/// Build context backed by a fixed set of stamps
#[derive(Debug, Clone, Default)]
pub struct BuildSources {
    stamps: HashMap<String, SourceStamp>,
}

impl BuildSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stamp under its own codebase
    pub fn with_stamp(mut self, stamp: SourceStamp) -> Self {
        self.stamps.insert(stamp.codebase.clone(), stamp);
        self
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

impl BuildContext for BuildSources {
    fn source_stamp(&self, codebase: &str) -> Option<SourceStamp> {
        self.stamps.get(codebase).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_codebase() {
        let build = BuildSources::new()
            .with_stamp(SourceStamp::new("").with_branch("trunk"))
            .with_stamp(SourceStamp::new("lib").with_revision("42"));

        assert_eq!(build.len(), 2);
        assert_eq!(build.source_stamp("").unwrap().branch.as_deref(), Some("trunk"));
        assert_eq!(build.source_stamp("lib").unwrap().revision.as_deref(), Some("42"));
        assert!(build.source_stamp("docs").is_none());
    }

    #[test]
    fn test_stamp_deserializes_without_changes() {
        let json = r#"{
            "codebase": "lib",
            "branch": null,
            "revision": "abc",
            "patch": {"level": 1, "diff": "--- a\n+++ b\n", "root": null}
        }"#;
        let stamp: SourceStamp = serde_json::from_str(json).unwrap();

        assert!(stamp.changes.is_empty());
        assert_eq!(stamp.patch.unwrap().level, 1);
    }

    #[test]
    fn test_patch_root() {
        let patch = PatchSpec::new(0, "diff").with_root("sub/dir");
        assert_eq!(patch.root.as_deref(), Some("sub/dir"));
    }
}
