//! Fixed-delay retry around LLM calls.
//!
//! An attempt either yields a value, yields nothing (an empty or unusable
//! answer), or fails. Both of the latter count against the budget. The stop
//! flag is checked before every attempt.

use reagent_core::StopFlag;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many attempts, and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Single attempt, no delay (for testing)
    pub const fn no_retry() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` until it yields a value, the budget runs out, or `stop` is set.
///
/// `op` receives the 1-based attempt number. Returns `None` on exhaustion or
/// cancellation.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, stop: &StopFlag, mut op: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    for attempt in 1..=policy.attempts {
        if stop.is_stopped() {
            debug!(attempt, "Retry loop cancelled");
            return None;
        }
        match op(attempt).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => warn!(attempt, total = policy.attempts, "LLM call returned no output"),
            Err(e) => warn!(attempt, total = policy.attempts, error = %e, "LLM call failed"),
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn third_attempt_wins_and_no_fourth_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let result = retry(RetryPolicy::default(), &StopFlag::new(), |attempt| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                match attempt {
                    1 => Err("connection reset"),
                    2 => Ok(None),
                    _ => Ok(Some(attempt)),
                }
            }
        })
        .await;

        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two fixed delays between three attempts
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_none() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Option<u32> = retry(RetryPolicy::default(), &StopFlag::new(), |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Option<u32>, _>("boom")
            }
        })
        .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stop_flag_short_circuits() {
        let stop = StopFlag::new();
        stop.stop();
        let result = retry(RetryPolicy::no_retry(), &stop, |_| async {
            Ok::<_, String>(Some("never"))
        })
        .await;
        assert!(result.is_none());
    }
}
