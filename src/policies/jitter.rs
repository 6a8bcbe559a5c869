//! # Jitter for monitor re-arm delays.
//!
//! Instances started together would otherwise health-check in lockstep.
//! [`JitterPolicy`] randomizes each re-arm delay around the monitor interval.
//!
//! - [`JitterPolicy::None`] exact interval (default, deterministic)
//! - [`JitterPolicy::Full`] random in `[0, interval]`
//! - [`JitterPolicy::Equal`] `interval/2 + random[0, interval/2]`

use std::time::Duration;

use rand::Rng;

/// Randomization applied to a delay before it is scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the delay as is.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl JitterPolicy {
    /// Returns the jittered delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        match self {
            JitterPolicy::None => delay,
            _ if ms == 0 => Duration::ZERO,
            JitterPolicy::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rand::rng().random_range(0..=ms - half))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_exact() {
        assert_eq!(
            JitterPolicy::None.apply(Duration::from_millis(1500)),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn full_stays_within_interval() {
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(Duration::from_secs(1)) <= Duration::from_secs(1));
        }
    }

    #[test]
    fn equal_keeps_at_least_half() {
        for _ in 0..200 {
            let d = JitterPolicy::Equal.apply(Duration::from_millis(1001));
            assert!(d >= Duration::from_millis(500));
            assert!(d <= Duration::from_millis(1001));
        }
    }

    #[test]
    fn zero_stays_zero() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
