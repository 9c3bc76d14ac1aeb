//! Whole-method retry.
//
// There is no step-level retry: a failed protocol method is re-run from the
// top, and the step flags make the re-run skip everything that already
// completed. Every attempt boundary is reported to the operator.

use crate::config::RetryConfig;
use crate::error::{DeckError, DeckResult};
use crate::operator::{HumanInTheLoop, Notification};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// The maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_delay: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// A method that can be run again from the top.
#[async_trait]
pub trait Retryable {
    /// Human-readable name used in notifications.
    fn label(&self) -> String;

    /// Runs the method once. `attempt` starts at 1.
    async fn run_once(&mut self, attempt: u32) -> DeckResult<()>;
}

/// Runs `target` until it succeeds, a non-retryable error occurs, or the policy
/// is used up. The operator hears about every attempt boundary.
pub async fn run_with_retry<T: Retryable + Send + ?Sized>(
    target: &mut T,
    policy: &RetryPolicy,
    operator: &dyn HumanInTheLoop,
) -> DeckResult<()> {
    let label = target.label();
    let max = policy.max_attempts.max(1);
    for attempt in 1..=max {
        info!(method = %label, attempt, max, "starting attempt");
        let err = match target.run_once(attempt).await {
            Ok(()) => {
                operator.notify(&Notification::info(
                    "Method finished",
                    format!("{label} completed on attempt {attempt} of {max}"),
                ));
                return Ok(());
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            error!(method = %label, attempt, error = %err, "not retrying");
            operator.notify(&Notification::error(
                "Method stopped",
                format!("{label} stopped on attempt {attempt}: {err}"),
            ));
            return Err(err);
        }

        if attempt == max {
            error!(method = %label, attempt, error = %err, "giving up");
            operator.notify(&Notification::error(
                "Method failed",
                format!("{label} failed after {max} attempts: {err}"),
            ));
            return Err(err);
        }

        let title = if attempt == 1 { "Start failed" } else { "Retrying" };
        warn!(method = %label, attempt, error = %err, "attempt failed, retrying");
        operator.notify(&Notification::warning(
            title,
            format!("{label} attempt {attempt} of {max} failed: {err}; retrying"),
        ));
        sleep(policy.backoff_delay).await;
    }
    // max >= 1, so the loop always returns
    Err(DeckError::Aborted(format!("{label}: no attempts made")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::ScriptedOperator;

    struct Flaky {
        attempts: u32,
        succeed_on_attempt: u32,
        error: fn() -> DeckError,
    }

    #[async_trait]
    impl Retryable for Flaky {
        fn label(&self) -> String {
            "flaky".to_string()
        }

        async fn run_once(&mut self, _attempt: u32) -> DeckResult<()> {
            self.attempts += 1;
            if self.attempts >= self.succeed_on_attempt {
                Ok(())
            } else {
                Err((self.error)())
            }
        }
    }

    fn device_error() -> DeckError {
        DeckError::DeviceCommand {
            command: "aspirate".into(),
            reason: "clot".into(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let mut flaky = Flaky {
            attempts: 0,
            succeed_on_attempt: 2,
            error: device_error,
        };
        let op = ScriptedOperator::default();
        run_with_retry(&mut flaky, &policy(), &op).await.unwrap();
        assert_eq!(flaky.attempts, 2);
        assert_eq!(op.titles(), vec!["Start failed", "Method finished"]);
    }

    #[tokio::test]
    async fn test_retry_logic_fails() {
        let mut flaky = Flaky {
            attempts: 0,
            succeed_on_attempt: 4,
            error: device_error,
        };
        let op = ScriptedOperator::default();
        let result = run_with_retry(&mut flaky, &policy(), &op).await;
        assert!(matches!(result, Err(DeckError::DeviceCommand { .. })));
        assert_eq!(flaky.attempts, 3);
        assert_eq!(op.titles(), vec!["Start failed", "Retrying", "Method failed"]);
    }

    #[tokio::test]
    async fn test_abort_is_not_retried() {
        let mut flaky = Flaky {
            attempts: 0,
            succeed_on_attempt: 10,
            error: || DeckError::Aborted("ctrl-c".into()),
        };
        let op = ScriptedOperator::default();
        assert!(run_with_retry(&mut flaky, &policy(), &op).await.is_err());
        assert_eq!(flaky.attempts, 1);
        assert_eq!(op.titles(), vec!["Method stopped"]);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            backoff_ms: 250,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff_delay, Duration::from_millis(250));
    }
}
