//! Reconnect delay calculator.
//!
//! Every connection attempt asks for [`Backoff::next_delay`]; a successful
//! connection calls [`Backoff::reset`]. The delay doubles per attempt and is
//! capped, so `base <= current <= max` always holds.

use std::time::Duration;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default upper bound for the reconnect delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Growth factor applied after every [`Backoff::next_delay`] call.
const GROWTH_FACTOR: u32 = 2;

/// Stateful, deterministic exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `base` and never exceeding `max`.
    ///
    /// If `max < base`, `max` is raised to `base`.
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Returns the delay to wait before the next attempt and grows the
    /// following one toward the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(GROWTH_FACTOR)
            .map_or(self.max, |grown| grown.min(self.max));
        delay
    }

    /// Return future delays to the base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) will return.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_base() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn delays_are_monotonic_and_capped() {
        let max = Duration::from_secs(60);
        let mut backoff = Backoff::new(Duration::from_millis(500), max);
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let delay = backoff.next_delay();
            assert!(delay >= previous, "{delay:?} < {previous:?}");
            assert!(delay <= max);
            assert!(backoff.current() >= backoff.base());
            assert!(backoff.current() <= backoff.max());
            previous = delay;
        }
        assert_eq!(previous, max);
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = Backoff::default();
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert!(backoff.current() > DEFAULT_BASE_DELAY);
        backoff.reset();
        assert_eq!(backoff.next_delay(), DEFAULT_BASE_DELAY);
    }

    #[test]
    fn max_below_base_is_raised() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(backoff.max(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn huge_delays_saturate_at_max() {
        let mut backoff = Backoff::new(Duration::MAX / 2 + Duration::from_secs(1), Duration::MAX);
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::MAX);
    }
}
