use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::EngineError;

/// Outcome of one retry attempt.
pub enum Attempt<T> {
    Done(T),
    /// Transient failure; the driver sleeps and tries again.
    Retry(EngineError),
    /// Terminal failure; surfaced immediately.
    Fatal(EngineError),
}

/// Backoff parameters for [`retry_with`].
///
/// The delay starts at `min_timeout`, doubles per attempt up to
/// `poll_interval`, with jitter bounded by 50% of the current delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub min_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Run `thunk` under the default policy until it succeeds, fails
/// terminally, or `timeout` elapses.
pub async fn retry<T, F, Fut>(timeout: Duration, thunk: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    retry_with(RetryPolicy::default(), timeout, thunk).await
}

/// Run `thunk` until success, terminal failure, or deadline.
///
/// When the deadline passes, the thunk is invoked one final time outside
/// the loop so the caller sees the timed-out attempt's real error rather
/// than a synthetic one. `EngineError::is_timeout` recognises that path.
///
/// The thunk runs on the caller's task; the driver spawns nothing, so
/// dropping the future between attempts cancels cleanly.
pub async fn retry_with<T, F, Fut>(
    policy: RetryPolicy,
    timeout: Duration,
    mut thunk: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut delay = policy.min_timeout;

    loop {
        match thunk().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(err) => {
                tracing::debug!(error = %err, delay = ?delay, "retryable error, backing off");
                if Instant::now() + delay >= deadline {
                    break;
                }
                tokio::time::sleep(jittered(delay)).await;
                delay = (delay * 2).min(policy.poll_interval);
            }
        }
    }

    // Deadline passed: one last attempt so the surfaced error is real.
    match thunk().await {
        Attempt::Done(value) => Ok(value),
        Attempt::Retry(err) | Attempt::Fatal(err) => Err(EngineError::Timeout {
            elapsed: start.elapsed(),
            last_state: None,
            source: Some(Box::new(err)),
        }),
    }
}

/// Add jitter bounded by 50% of the delay.
fn jittered(delay: Duration) -> Duration {
    let half = delay.as_millis() as u64 / 2;
    if half == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=half))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use converge_core::ApiError;

    use super::*;

    fn transient() -> EngineError {
        EngineError::Api(ApiError::new("Throttling", "rate exceeded"))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            min_timeout: Duration::from_millis(1),
            poll_interval: Duration::from_millis(5),
        };
        let out = retry_with(policy, Duration::from_secs(5), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Attempt::Retry(transient())
            } else {
                Attempt::Done(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry(Duration::from_secs(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Attempt::<()>::Fatal(EngineError::Api(ApiError::new("AccessDenied", "no")))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(converge_core::is_code(&err, "AccessDenied"));
    }

    #[tokio::test]
    async fn deadline_triggers_final_attempt_with_real_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            min_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(20),
        };
        let err = retry_with(policy, Duration::from_millis(30), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Attempt::<()>::Retry(transient())
        })
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        // The real last-attempt error is preserved in the chain.
        assert!(converge_core::is_code(&err, "Throttling"));
        // At least the in-loop attempt plus the final out-of-loop attempt.
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn final_attempt_may_still_succeed() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            min_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(20),
        };
        // Fails while there is budget, succeeds on the post-deadline call.
        let out = retry_with(policy, Duration::from_millis(10), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Attempt::Retry(transient())
            } else {
                Attempt::Done("late")
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "late");
    }

    #[test]
    fn jitter_is_bounded_by_half_the_delay() {
        let delay = Duration::from_millis(100);
        for _ in 0..50 {
            let j = jittered(delay);
            assert!(j >= delay);
            assert!(j <= delay + Duration::from_millis(50));
        }
    }
}
