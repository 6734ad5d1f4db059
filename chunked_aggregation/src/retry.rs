use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;

// How often a backoff sleep wakes up to look for cancellation
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Growth of the delay between fetch attempts
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Backoff {
    /// Always wait `initial_delay`
    #[default]
    Fixed,
    /// Add `increment` per retry
    Linear {
        #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
        increment: Duration,
    },
    /// Multiply by `base` per retry
    Exponential { base: f64 },
}

/// Retry policy wrapping partition fetches
///
/// Only fetches are retried. Reducer and combiner failures point at a logic defect
/// rather than a transient fault and always abort the run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryPolicy {
    /// Total attempts per partition, including the first one
    pub max_attempts: u32,
    pub backoff: Backoff,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub initial_delay: Duration,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt, failures surface immediately
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// `max_attempts` attempts with exponential backoff doubling from `initial_delay`
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base: 2.0 },
            initial_delay,
            max_delay,
        }
    }

    /// `max_attempts` attempts with a constant delay
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed,
            initial_delay: delay,
            max_delay: delay,
        }
    }

    /// Returns true if another attempt may follow attempt number `attempt` (1-based)
    #[inline]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let n = retry.saturating_sub(1);
        let delay = match &self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Linear { increment } => {
                self.initial_delay.saturating_add(increment.saturating_mul(n))
            }
            Backoff::Exponential { base } => {
                // bases below 1.0 (and NaN) never shrink the delay
                let factor = base.max(1.0).powi(n.min(i32::MAX as u32) as i32);
                let secs = self.initial_delay.as_secs_f64() * factor;
                if secs.is_finite() && secs >= 0.0 && secs < self.max_delay.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    self.max_delay
                }
            }
        };
        delay.min(self.max_delay.max(self.initial_delay))
    }
}

/// Sleeps for `duration` unless `cancel` fires first
///
/// Returns false if the sleep was cut short by cancellation.
pub(crate) fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    let until = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= until {
            return true;
        }
        std::thread::sleep(CANCEL_POLL.min(until - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delays() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(50));
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(50));
    }

    #[test]
    fn exponential_delays_are_capped() {
        let policy =
            RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn exponential_base_below_one_keeps_initial_delay() {
        for base in [-2.0, 0.5, f64::NAN, f64::NEG_INFINITY] {
            let policy = RetryPolicy {
                max_attempts: 5,
                backoff: Backoff::Exponential { base },
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(8),
            };
            for retry in 1..5 {
                assert_eq!(policy.delay_for(retry), Duration::from_millis(1));
            }
        }
        let huge = RetryPolicy {
            max_attempts: 5,
            backoff: Backoff::Exponential { base: f64::INFINITY },
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
        };
        assert_eq!(huge.delay_for(3), Duration::from_millis(8));
    }

    #[test]
    fn linear_delays() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Backoff::Linear {
                increment: Duration::from_millis(10),
            },
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(22),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(5));
        assert_eq!(policy.delay_for(2), Duration::from_millis(15));
        assert_eq!(policy.delay_for(3), Duration::from_millis(22));
    }

    #[test]
    fn no_retry_by_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.allows_retry(1));
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(!sleep_cancellable(Duration::from_secs(5), &token));
        assert!(start.elapsed() < Duration::from_secs(1));

        assert!(sleep_cancellable(
            Duration::from_millis(1),
            &CancellationToken::new()
        ));
    }
}
