//! # Backoff for re-dispatching kill actions.
//!
//! When a kill action fails to even start (node unreachable), the instance
//! stays `killing` and the kill is re-dispatched after `first × factor^attempt`,
//! capped at `max`. The attempt counter resets once a kill is accepted.
//!
//! ```rust
//! use std::time::Duration;
//! use servicevisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//! };
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(2), Duration::from_secs(4));
//! assert_eq!(backoff.next(20), Duration::from_secs(10));
//! ```

use std::time::Duration;

/// Exponential delay schedule, clamped to `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth factor per attempt (`1.0` = constant).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `factor = 2.0`, `max = 60s`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given 0-indexed retry attempt.
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let p = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
        };
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(4), Duration::from_secs(1));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let p = BackoffPolicy {
            first: Duration::from_secs(30),
            max: Duration::from_secs(5),
            factor: 1.0,
        };
        assert_eq!(p.next(0), Duration::from_secs(5));
    }
}
