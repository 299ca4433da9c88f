//! Bounded wait loops used by the session state machine.
//!
//! Each routine is parameterized by its policy and a [`Clock`], and returns a
//! result value instead of scheduling nested timers.

use super::clock::Clock;
use crate::config::{ReadinessConfig, WriteConfig};
use crate::protocol::ReadinessReport;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
    pub threshold: u32,
}

impl From<&ReadinessConfig> for StabilityPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            interval: config.probe_interval(),
            ceiling: config.ceiling(),
            threshold: config.stability_threshold.max(1),
        }
    }
}

/// Probes until `threshold` consecutive probes succeed with the same value,
/// or until `ceiling` elapses. An error resets the streak.
///
/// Hitting the ceiling is not an error: the report says `stable: false` and
/// the caller proceeds anyway.
pub async fn wait_until_stable<T, E, F>(
    clock: &dyn Clock,
    policy: &StabilityPolicy,
    mut probe: F,
) -> ReadinessReport
where
    T: PartialEq,
    F: FnMut() -> Result<T, E>,
{
    let started = clock.now();
    let mut probes = 0u32;
    let mut streak = 0u32;
    let mut last: Option<T> = None;

    loop {
        probes += 1;
        match probe() {
            Ok(value) => {
                if last.as_ref() == Some(&value) {
                    streak += 1;
                } else {
                    streak = 1;
                    last = Some(value);
                }
            }
            Err(_) => {
                streak = 0;
                last = None;
            }
        }

        if streak >= policy.threshold {
            return ReadinessReport {
                stable: true,
                probes,
            };
        }
        if clock.now().duration_since(started) >= policy.ceiling {
            return ReadinessReport {
                stable: false,
                probes,
            };
        }
        clock.sleep(policy.interval).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Give up after this many failures in a row from the first attempt.
    pub fast_fail_after: Option<u32>,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn for_write(config: &WriteConfig, fast_fail: bool) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            fast_fail_after: fast_fail
                .then_some(config.fast_fail_after)
                .filter(|n| *n > 0),
            delay: config.retry_delay(),
        }
    }

    pub fn plain(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            fast_fail_after: None,
            delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    /// The fast-fail threshold was reached without a single success.
    FastFailed { attempts: u32, last_error: String },
    Exhausted { attempts: u32, last_error: String },
}

/// Calls `attempt` (with the 1-based attempt number) until it succeeds,
/// sleeping `delay` between failures.
pub async fn retry_with_fast_fail<T, F>(
    clock: &dyn Clock,
    policy: &RetryPolicy,
    mut attempt: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Result<T, String>,
{
    let mut last_error = String::new();
    for n in 1..=policy.max_attempts {
        match attempt(n) {
            Ok(value) => return RetryOutcome::Succeeded { value, attempts: n },
            Err(e) => last_error = e,
        }
        if policy.fast_fail_after == Some(n) {
            return RetryOutcome::FastFailed {
                attempts: n,
                last_error,
            };
        }
        if n < policy.max_attempts {
            clock.sleep(policy.delay).await;
        }
    }
    RetryOutcome::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    }
}

/// Holds for `window`, calling `tick` every `poll`. Returns the tick count.
pub async fn hold_for<F: FnMut()>(
    clock: &dyn Clock,
    window: Duration,
    poll: Duration,
    mut tick: F,
) -> u32 {
    let started = clock.now();
    let mut ticks = 0;
    while clock.now().duration_since(started) < window {
        tick();
        ticks += 1;
        clock.sleep(poll.max(Duration::from_millis(1))).await;
    }
    ticks
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
