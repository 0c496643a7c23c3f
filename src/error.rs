//! Checkout error types

use thiserror::Error;

/// Errors that can occur while driving a checkout
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Invalid step configuration, raised before any remote call
    #[error("Configuration error: {}", .0.join("; "))]
    Configuration(Vec<String>),

    /// Required tool missing or incompatible on the worker
    #[error("Worker capability error: {0}")]
    Capability(String),

    /// Initial acquisition failed and every retry was spent
    #[error("Checkout failed after {attempts} attempt(s)")]
    TransientAcquisition { attempts: u32 },

    /// A remote command exited non-zero or timed out
    #[error("Command `{command}` failed with exit code {exit_code}")]
    CommandFailed { command: String, exit_code: i32 },

    /// Patch download or apply failed
    #[error("Patch failed: {0}")]
    Patch(String),

    /// Captured revision token has the wrong shape
    #[error("Invalid revision {token:?}: expected {expected}")]
    RevisionFormat { token: String, expected: String },

    /// Build was stopped externally
    #[error("Checkout cancelled")]
    Cancelled,

    /// Remote transport error
    #[error("Remote error: {0}")]
    Remote(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckoutError {
    /// Build a configuration error from a single message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(vec![message.into()])
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_lists_every_problem() {
        let err = CheckoutError::Configuration(vec![
            "you must provide repourl".to_string(),
            "you must provide branch".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Configuration error: you must provide repourl; you must provide branch"
        );
    }

    #[test]
    fn test_exhausted_acquisition_reports_attempts() {
        let err = CheckoutError::TransientAcquisition { attempts: 3 };
        assert_eq!(err.to_string(), "Checkout failed after 3 attempt(s)");
        assert!(!err.is_cancelled());
        assert!(CheckoutError::Cancelled.is_cancelled());
    }
}
