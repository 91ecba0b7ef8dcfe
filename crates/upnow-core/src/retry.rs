//! Bounded, cancellable retry with backoff.
//!
//! Used for every "attempt to present the alarm surface" call site. The
//! first attempt runs immediately; later attempts wait according to the
//! policy. Before each deferred attempt the caller's liveness predicate is
//! consulted so a retry never acts on a session that has been torn down.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Retry policy: attempt count plus exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first, immediate one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Growth factor applied to each subsequent delay.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    4_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait before attempt number `attempt` (1-based).
    ///
    /// Attempt 1 never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Sum of every delay the policy can wait.
    pub fn total_delay(&self) -> Duration {
        (1..=self.max_attempts).map(|a| self.delay_before(a)).sum()
    }
}

/// Result of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed; carries the last error.
    Exhausted { last_error: E, attempts: u32 },
    /// The cancellation token fired.
    Cancelled { attempts: u32 },
    /// The liveness predicate reported the work is no longer wanted.
    Abandoned { attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Cancelled { attempts }
            | RetryOutcome::Abandoned { attempts } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }
}

/// Run `op` until it succeeds, the policy is exhausted, `cancel` fires, or
/// `is_live` returns false.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, Op, Fut, Live>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut is_live: Live,
    mut op: Op,
) -> RetryOutcome<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Live: FnMut() -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return RetryOutcome::Cancelled { attempts: attempt - 1 };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled {
                attempts: attempt - 1,
            };
        }
        if !is_live() {
            return RetryOutcome::Abandoned {
                attempts: attempt - 1,
            };
        }

        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                }
            }
            Err(err) => last_error = Some(err),
        }
    }

    match last_error {
        Some(last_error) => RetryOutcome::Exhausted {
            last_error,
            attempts: max_attempts,
        },
        // Unreachable with max_attempts >= 1; report as abandoned.
        None => RetryOutcome::Abandoned { attempts: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 3_000,
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1_000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(2_000));
        assert_eq!(policy.delay_before(5), Duration::from_millis(3_000));
        assert_eq!(policy.delay_before(6), Duration::from_millis(3_000));
        assert_eq!(policy.total_delay(), Duration::from_millis(9_500));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let counter = calls.clone();
        let outcome = retry_with_backoff(&RetryPolicy::default(), &token, || true, |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if attempt < 3 { Err("blocked") } else { Ok(attempt) })
        })
        .await;
        assert_eq!(outcome, RetryOutcome::Succeeded { value: 3, attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let outcome: RetryOutcome<(), &str> =
            retry_with_backoff(&policy, &token, || true, |_| std::future::ready(Err("no")))
                .await;
        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                last_error: "no",
                attempts: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_pending_attempts() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let child = token.clone();
        let task = tokio::spawn(async move {
            retry_with_backoff(&RetryPolicy::default(), &child, || true, |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err::<(), _>("blocked"))
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        let outcome = task.await.unwrap();
        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_check_abandons_work() {
        let token = CancellationToken::new();
        let live = Arc::new(AtomicU32::new(1));
        let flag = live.clone();
        let outcome: RetryOutcome<(), &str> = retry_with_backoff(
            &RetryPolicy::default(),
            &token,
            || live.load(Ordering::SeqCst) == 1,
            |_| {
                flag.store(0, Ordering::SeqCst);
                std::future::ready(Err("blocked"))
            },
        )
        .await;
        assert_eq!(outcome, RetryOutcome::Abandoned { attempts: 1 });
    }
}
