//! Post-checkout revision capture

use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CheckoutError;
use crate::properties::SourceProperties;
use crate::vcs::{VcsBackend, VcsContext};

/// Property holding the revision actually checked out
pub const GOT_REVISION: &str = "got_revision";

/// Shape a backend's revision tokens must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionFormat {
    /// Content hash of exactly `len` hex digits
    Hex { len: usize },
    /// Monotonically increasing change number
    Number,
    /// A change log entry: an unindented header line (date and author)
    /// followed only by indented patch name and description lines
    ChangeEntry,
}

impl RevisionFormat {
    /// Trim and check a raw token. Never truncates.
    pub fn validate(&self, raw: &str) -> Result<String, CheckoutError> {
        let token = raw.trim();
        let ok = match self {
            RevisionFormat::Hex { len } => {
                token.len() == *len && token.chars().all(|c| c.is_ascii_hexdigit())
            }
            RevisionFormat::Number => !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()),
            RevisionFormat::ChangeEntry => is_change_entry(token),
        };
        if ok {
            Ok(token.to_string())
        } else {
            Err(CheckoutError::RevisionFormat {
                token: token.to_string(),
                expected: self.to_string(),
            })
        }
    }
}

/// One header line, then nothing but indented or blank lines
fn is_change_entry(token: &str) -> bool {
    let mut lines = token.lines();
    match lines.next() {
        Some(header) if !header.trim().is_empty() => {}
        _ => return false,
    }
    lines.all(|l| l.trim().is_empty() || l.starts_with(char::is_whitespace))
}

impl fmt::Display for RevisionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionFormat::Hex { len } => write!(f, "{} hex digits", len),
            RevisionFormat::Number => f.write_str("a change number"),
            RevisionFormat::ChangeEntry => f.write_str("a single change entry"),
        }
    }
}

/// Queries, validates and publishes the checked-out revision
pub struct RevisionCapture<'a> {
    backend: &'a dyn VcsBackend,
    properties: &'a SourceProperties,
}

impl<'a> RevisionCapture<'a> {
    pub fn new(backend: &'a dyn VcsBackend, properties: &'a SourceProperties) -> Self {
        Self { backend, properties }
    }

    /// Capture the revision in `ctx.workdir` and set `got_revision`.
    ///
    /// Nothing is published when the token fails validation or the build was
    /// stopped while the query ran.
    pub async fn capture(
        &self,
        ctx: &VcsContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, CheckoutError> {
        let raw = self.backend.current_revision(ctx).await?;
        if cancel.is_cancelled() {
            return Err(CheckoutError::Cancelled);
        }
        let token = match self.backend.revision_format().validate(&raw) {
            Ok(token) => token,
            Err(e) => {
                warn!(backend = self.backend.name(), raw = %raw.trim(), "Rejected revision token");
                return Err(e);
            }
        };

        info!(backend = self.backend.name(), revision = %token, "Got revision");
        self.properties.update(GOT_REVISION, &token)?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "95215e2a9a9f8b6f5c9664e3807cd34617ea928c";

    #[test]
    fn test_hex_exact_length() {
        let format = RevisionFormat::Hex { len: 40 };
        assert_eq!(format.validate(&format!("  {SHA}\n")).unwrap(), SHA);
        assert!(format.validate(&SHA[..39]).is_err());
        assert!(format.validate(&format!("{SHA}0")).is_err());
    }

    #[test]
    fn test_hex_rejects_non_hex() {
        let format = RevisionFormat::Hex { len: 4 };
        let err = format.validate("zz12").unwrap_err();
        assert!(matches!(err, CheckoutError::RevisionFormat { .. }));
        assert!(err.to_string().contains("4 hex digits"));
    }

    #[test]
    fn test_number() {
        assert_eq!(RevisionFormat::Number.validate("1234\n").unwrap(), "1234");
        assert!(RevisionFormat::Number.validate("12a").is_err());
    }

    #[test]
    fn test_change_entry_keeps_every_line() {
        let raw = "Tue Aug 20 09:18:41 IST 2013  abc@gmail.com\n  * fix the build\n\n    longer description\n\n";
        let token = RevisionFormat::ChangeEntry.validate(raw).unwrap();
        assert_eq!(
            token,
            "Tue Aug 20 09:18:41 IST 2013  abc@gmail.com\n  * fix the build\n\n    longer description"
        );

        let header_only = "Tue Aug 20 09:18:41 IST 2013 abc@gmail.com";
        assert_eq!(RevisionFormat::ChangeEntry.validate(header_only).unwrap(), header_only);
    }

    #[test]
    fn test_change_entry_rejects_two_entries() {
        let raw = "Tue Aug 20 2013  abc@gmail.com\n  * one\n\nMon Aug 19 2013  abc@gmail.com\n  * two\n";
        let err = RevisionFormat::ChangeEntry.validate(raw).unwrap_err();
        assert!(err.to_string().contains("a single change entry"));
        assert!(RevisionFormat::ChangeEntry.validate("   \n ").is_err());
    }
}
