//! Bounded retry of the initial acquisition

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::CheckoutError;

/// What to do after a failed acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wipe the workspace and try again once `after` has elapsed
    Retry { after: Duration },
    GiveUp,
}

/// Retry budget for one run, carried through the checkout by value
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delay: Duration,
    remaining: u32,
    failures: u32,
}

impl RetryPolicy {
    pub fn new(config: Option<RetryConfig>) -> Self {
        match config {
            Some(RetryConfig { delay, attempts }) => Self {
                delay,
                remaining: attempts,
                failures: 0,
            },
            None => Self::fail_fast(),
        }
    }

    /// First failure is final
    pub fn fail_fast() -> Self {
        Self {
            delay: Duration::ZERO,
            remaining: 0,
            failures: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Attempts made so far that failed
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt and decide whether to go again.
    ///
    /// A stopped build never retries, whatever budget is left.
    pub fn should_retry(&mut self, cancel: &CancellationToken) -> RetryDecision {
        self.failures += 1;
        if cancel.is_cancelled() || self.remaining == 0 {
            return RetryDecision::GiveUp;
        }
        self.remaining -= 1;
        debug!(remaining = self.remaining, "Retry budget consumed");
        RetryDecision::Retry { after: self.delay }
    }
}

/// Sleep for at least `after`, or until the build is stopped
pub async fn backoff(after: Duration, cancel: &CancellationToken) -> Result<(), CheckoutError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CheckoutError::Cancelled),
        _ = tokio::time::sleep(after) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_config_is_fail_fast() {
        let mut policy = RetryPolicy::new(None);
        let cancel = CancellationToken::new();

        assert_eq!(policy.should_retry(&cancel), RetryDecision::GiveUp);
        assert_eq!(policy.failures(), 1);
    }

    #[test]
    fn test_budget_is_consumed() {
        let mut policy = RetryPolicy::new(Some(RetryConfig {
            delay: Duration::from_secs(3),
            attempts: 2,
        }));
        let cancel = CancellationToken::new();

        let retry = RetryDecision::Retry {
            after: Duration::from_secs(3),
        };
        assert_eq!(policy.should_retry(&cancel), retry);
        assert_eq!(policy.should_retry(&cancel), retry);
        assert_eq!(policy.should_retry(&cancel), RetryDecision::GiveUp);
        assert_eq!(policy.remaining(), 0);
        assert_eq!(policy.failures(), 3);
    }

    #[test]
    fn test_cancel_wins_over_budget() {
        let mut policy = RetryPolicy::new(Some(RetryConfig {
            delay: Duration::ZERO,
            attempts: 5,
        }));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(policy.should_retry(&cancel), RetryDecision::GiveUp);
        assert_eq!(policy.remaining(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_at_least_delay() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        backoff(Duration::from_secs(30), &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.cancel();
        });
        let start = tokio::time::Instant::now();

        let err = backoff(Duration::from_secs(60), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
