//! Bounded polling with a fixed interval and attempt cap.

use std::future::Future;
use std::time::Duration;

use crate::error::ControlResult;

/// Interval and attempt cap for one polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Delay before each attempt.
    pub interval: Duration,
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Create a policy from whole-second values.
    #[must_use]
    pub const fn from_secs(interval_secs: u64, max_attempts: u32) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            max_attempts,
        }
    }
}

/// Outcome of a bounded polling loop.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The checked condition produced a value.
    Ready(T),
    /// All attempts were exhausted without a value.
    TimedOut {
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Poll a condition under the given policy.
///
/// Each attempt sleeps the policy interval, then calls `check` with the
/// 1-based attempt number. `Ok(Some(value))` ends the loop; `Ok(None)`
/// continues; errors propagate immediately. If the final attempt still
/// returns `Ok(None)` the outcome is [`PollOutcome::TimedOut`].
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut check: F) -> ControlResult<PollOutcome<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ControlResult<Option<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;

        if let Some(value) = check(attempt).await? {
            return Ok(PollOutcome::Ready(value));
        }
    }

    Ok(PollOutcome::TimedOut {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlError;

    fn instant_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::ZERO,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn ready_on_later_attempt() {
        let outcome = poll_until(instant_policy(12), |attempt| async move {
            Ok((attempt == 3).then_some(attempt))
        })
        .await
        .unwrap();

        match outcome {
            PollOutcome::Ready(attempt) => assert_eq!(attempt, 3),
            PollOutcome::TimedOut { .. } => panic!("expected ready"),
        }
    }

    #[tokio::test]
    async fn times_out_after_max_attempts() {
        let outcome = poll_until::<(), _, _>(instant_policy(12), |_| async { Ok(None) })
            .await
            .unwrap();

        match outcome {
            PollOutcome::TimedOut { attempts } => assert_eq!(attempts, 12),
            PollOutcome::Ready(()) => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn value_on_final_attempt_is_ready() {
        let outcome = poll_until(instant_policy(5), |attempt| async move {
            Ok((attempt == 5).then_some("done"))
        })
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::Ready("done")));
    }

    #[tokio::test]
    async fn check_errors_propagate() {
        let result = poll_until::<(), _, _>(instant_policy(12), |attempt| async move {
            if attempt == 2 {
                Err(ControlError::provider("probe failed"))
            } else {
                Ok(None)
            }
        })
        .await;

        assert!(matches!(result, Err(ControlError::Provider(_))));
    }
}
