use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::EngineError;

/// Generic poller converging an external resource toward a target status
/// set.
///
/// The refresh callback returns `Ok(Some((value, status)))` on each poll;
/// `Ok(None)` — or an error whose chain is the NotFound sentinel — counts
/// against the NotFound budget, because eventually-consistent APIs
/// routinely report "no such object" shortly after a create.
pub struct StateChangeConf<T, F, Fut>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<(T, String)>, EngineError>>,
{
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub refresh: F,
    pub timeout: Duration,
    pub min_delay: Duration,
    pub poll_interval: Duration,
    /// Consecutive NotFound polls tolerated before giving up.
    pub not_found_checks: u32,
    /// Consecutive polls that must observe a target status before success.
    pub continuous_target_occurrence: u32,
}

impl<T, F, Fut> StateChangeConf<T, F, Fut>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<(T, String)>, EngineError>>,
{
    pub fn new<S: Into<String>>(pending: Vec<S>, target: Vec<S>, refresh: F) -> Self {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            refresh,
            timeout: Duration::from_secs(10 * 60),
            min_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
            not_found_checks: 20,
            continuous_target_occurrence: 1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn with_continuous_target(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences;
        self
    }

    fn check(&self) -> Result<(), EngineError> {
        if self.target.is_empty() {
            return Err(EngineError::InvalidWaiter("target set is empty".into()));
        }
        if let Some(s) = self.pending.iter().find(|s| self.target.contains(s)) {
            return Err(EngineError::InvalidWaiter(format!(
                "status {s:?} appears in both pending and target"
            )));
        }
        if self.timeout.is_zero() {
            return Err(EngineError::InvalidWaiter("timeout must be positive".into()));
        }
        if self.min_delay > self.poll_interval || self.poll_interval > self.timeout {
            return Err(EngineError::InvalidWaiter(
                "expected min_delay <= poll_interval <= timeout".into(),
            ));
        }
        Ok(())
    }

    /// Poll until the resource settles in the target set, the NotFound
    /// budget runs out, an unexpected status appears, or the timeout
    /// elapses. The initial poll happens immediately; each further
    /// observation is a fresh poll one interval later — there is no
    /// zero-interval fast path for continuous target occurrences.
    pub async fn wait_for_state(mut self) -> Result<T, EngineError> {
        self.check()?;

        let deadline = Instant::now() + self.timeout;
        let interval = self.poll_interval.max(self.min_delay);
        let needed = self.continuous_target_occurrence.max(1);
        let mut not_found_tally = 0u32;
        let mut target_streak = 0u32;
        let mut last_state: Option<String> = None;

        loop {
            let observed = match (self.refresh)().await {
                Ok(found) => found,
                Err(err) if err.is_not_found() => None,
                Err(err) => return Err(err),
            };

            match observed {
                None => {
                    target_streak = 0;
                    not_found_tally += 1;
                    if not_found_tally > self.not_found_checks {
                        return Err(EngineError::NotFoundChecksExhausted {
                            checks: self.not_found_checks,
                        });
                    }
                    tracing::trace!(
                        tally = not_found_tally,
                        budget = self.not_found_checks,
                        "resource not found yet, still waiting"
                    );
                }
                Some((value, status)) => {
                    not_found_tally = 0;
                    last_state = Some(status.clone());

                    if self.target.iter().any(|t| *t == status) {
                        target_streak += 1;
                        if target_streak >= needed {
                            return Ok(value);
                        }
                    } else if self.pending.iter().any(|p| *p == status) {
                        target_streak = 0;
                    } else {
                        return Err(EngineError::UnexpectedState {
                            state: status,
                            pending: self.pending,
                            target: self.target,
                        });
                    }
                }
            }

            if Instant::now() + interval > deadline {
                return Err(EngineError::Timeout {
                    elapsed: self.timeout,
                    last_state,
                    source: None,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }
}
