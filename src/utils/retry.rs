//! Bounded retry with exponential backoff
//!
//! Only [`ErrorClass::Transient`] failures are retried. Running out of
//! attempts escalates the failure to [`ErrorClass::PermanentExternal`].

use crate::component::{BackendError, ComponentError, ComponentResult, ErrorClass};
use crate::integration::config::RetryConfig;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry policy for backend calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub initial_delay: Duration,
    /// Multiplier applied to each following wait
    pub backoff_factor: f64,
    /// Upper bound on a single wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry` (0 = wait after the first failure)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Cooperative cancellation shared between the orchestrator and a worker
///
/// Cancelling wakes any backoff sleep immediately so a cancelled cycle
/// does not start further network calls. A token may also carry a
/// deadline; backends size their request timeouts from what remains of it.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token whose work must be over by `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `false` when the sleep was cut short by cancellation or by
    /// the deadline.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let wanted = Instant::now() + duration;
        let (wake_at, full) = match self.deadline {
            Some(deadline) if deadline < wanted => (deadline, false),
            _ => (wanted, true),
        };
        let mut cancelled = lock.lock();
        while !*cancelled {
            if cvar.wait_until(&mut cancelled, wake_at).timed_out() {
                return full && !*cancelled;
            }
        }
        false
    }
}

/// Run `op` under `policy`, collecting timing into a [`ComponentResult`]
///
/// `op` receives the 1-based attempt number and the time left before the
/// token's deadline, which it must use as its request timeout. No attempt
/// starts once the deadline has passed, and no backoff sleep runs past it.
pub fn call_with_retry<T>(
    stage: &str,
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut op: impl FnMut(u32, Option<Duration>) -> Result<T, BackendError>,
) -> ComponentResult<T> {
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = Vec::new();
    let mut attempt = 0;

    let outcome = loop {
        if cancel.is_cancelled() {
            break Err(ComponentError::from(BackendError::Cancelled));
        }
        if cancel.is_expired() {
            break Err(deadline_exceeded(stage, attempt));
        }
        attempt += 1;

        match op(attempt, cancel.remaining()) {
            Ok(value) => break Ok(value),
            Err(err) => {
                let class = err.class();
                if !class.is_retryable() {
                    debug!(stage, attempt, class = %class, "not retrying: {}", err);
                    break Err(ComponentError::from(err));
                }
                if attempt >= max_attempts {
                    warn!(stage, attempt, "retries exhausted: {}", err);
                    break Err(ComponentError::new(
                        ErrorClass::PermanentExternal,
                        format!("{stage} failed after {attempt} attempts: {err}"),
                    ));
                }

                let delay = policy.delay_for(attempt - 1);
                if cancel.remaining().is_some_and(|left| left <= delay) {
                    warn!(stage, attempt, "no time left for another attempt: {}", err);
                    break Err(deadline_exceeded(stage, attempt));
                }
                warn!(
                    stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying: {}",
                    err
                );
                backoff.push(delay);
                if !cancel.sleep(delay) {
                    if cancel.is_cancelled() {
                        break Err(ComponentError::from(BackendError::Cancelled));
                    }
                    break Err(deadline_exceeded(stage, attempt));
                }
            }
        }
    };

    ComponentResult {
        outcome,
        elapsed: started.elapsed(),
        attempts: attempt,
        backoff,
    }
}

/// The per-request timeout to use given a backend's own limit and the
/// caller's remaining budget
pub fn within_budget(request_timeout: Duration, budget: Option<Duration>) -> Duration {
    budget.map_or(request_timeout, |left| left.min(request_timeout))
}

fn deadline_exceeded(stage: &str, attempts: u32) -> ComponentError {
    ComponentError::new(
        ErrorClass::PermanentExternal,
        format!("{stage} ran out of time after {attempts} attempts"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
    }

    #[test]
    fn test_success_first_try() {
        let result = call_with_retry("stt", &fast_policy(3), &CancelToken::new(), |_, _| Ok(7));
        assert_eq!(result.payload(), Some(&7));
        assert_eq!(result.attempts, 1);
        assert!(result.backoff.is_empty());
    }

    #[test]
    fn test_transient_then_success() {
        let result = call_with_retry("llm", &fast_policy(3), &CancelToken::new(), |attempt, _| {
            if attempt < 3 {
                Err(BackendError::Network("reset".into()))
            } else {
                Ok("ok")
            }
        });
        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(result.backoff.len(), 2);
    }

    #[test]
    fn test_exhaustion_escalates() {
        let mut calls = 0;
        let result: ComponentResult<()> =
            call_with_retry("tts", &fast_policy(4), &CancelToken::new(), |_, _| {
                calls += 1;
                Err(BackendError::Server {
                    status: 503,
                    body: String::new(),
                })
            });
        assert_eq!(calls, 4);
        assert_eq!(result.error_class(), Some(ErrorClass::PermanentExternal));
        assert_eq!(result.backoff.len(), 3);
        assert!(result.backoff.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_permanent_not_retried() {
        let mut calls = 0;
        let result: ComponentResult<()> =
            call_with_retry("stt", &fast_policy(5), &CancelToken::new(), |_, _| {
                calls += 1;
                Err(BackendError::Auth("bad key".into()))
            });
        assert_eq!(calls, 1);
        assert_eq!(result.error_class(), Some(ErrorClass::PermanentExternal));
    }

    #[test]
    fn test_cancel_interrupts_backoff() {
        let cancel = CancelToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        };

        let remote = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        let result: ComponentResult<()> = call_with_retry("llm", &policy, &cancel, |_, _| {
            Err(BackendError::Network("down".into()))
        });
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.attempts, 1);
        assert!(result.error().map(|e| e.message.contains("cancelled")).unwrap_or(false));
    }

    #[test]
    fn test_token_sleep_completes() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(2)));
        token.cancel();
        assert!(!token.sleep(Duration::from_secs(10)));
    }

    #[test]
    fn test_deadline_bounds_attempts_and_timeouts() {
        let cancel = CancelToken::with_deadline(Instant::now() + Duration::from_millis(150));
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(40),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };

        let mut budgets = Vec::new();
        let started = Instant::now();
        let result: ComponentResult<()> = call_with_retry("llm", &policy, &cancel, |_, budget| {
            budgets.push(budget);
            Err(BackendError::Network("down".into()))
        });

        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(result.attempts < 10);
        assert_eq!(result.error_class(), Some(ErrorClass::PermanentExternal));
        assert!(budgets.iter().all(|b| b.is_some_and(|b| b <= Duration::from_millis(150))));
        assert!(budgets.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_expired_token_starts_nothing() {
        let cancel = CancelToken::with_deadline(Instant::now());
        let mut calls = 0;
        let result: ComponentResult<()> = call_with_retry("stt", &fast_policy(3), &cancel, |_, _| {
            calls += 1;
            Ok(())
        });
        assert_eq!(calls, 0);
        assert!(!result.is_success());
    }

    #[test]
    fn test_within_budget() {
        let limit = Duration::from_secs(30);
        assert_eq!(within_budget(limit, None), limit);
        assert_eq!(within_budget(limit, Some(Duration::from_secs(2))), Duration::from_secs(2));
        assert_eq!(within_budget(limit, Some(Duration::from_secs(90))), limit);
    }

    #[test]
    fn test_token_sleep_stops_at_deadline() {
        let token = CancelToken::with_deadline(Instant::now() + Duration::from_millis(20));
        let started = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(token.is_expired());
        assert!(!token.is_cancelled());
    }
}
