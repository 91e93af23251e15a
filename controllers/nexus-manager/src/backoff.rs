//! # Exponential Backoff
//!
//! Bounded exponential backoff for transient reconciliation failures.
//! Each delay doubles the previous one until the maximum is reached; the
//! maximum then repeats forever, so a Host is never given up on.
//!
//! Default sequence: 1s, 2s, 4s, 8s, ... 256s, 300s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates backoff durations starting at `min` and doubling on every call,
/// capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff (for reset)
    min: Duration,
    /// Backoff returned by the next call
    current: Duration,
    /// Maximum backoff
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given bounds
    ///
    /// # Arguments
    ///
    /// * `min` - First backoff duration (typically 1s)
    /// * `max` - Cap of the sequence (typically 300s)
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.min(max);
        Self { min, current: min, max }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(secs(1), secs(300));

        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
        assert_eq!(backoff.next_backoff(), secs(4));
        assert_eq!(backoff.next_backoff(), secs(8));
        assert_eq!(backoff.next_backoff(), secs(16));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff = ExponentialBackoff::new(secs(1), secs(300));

        for _ in 0..8 {
            backoff.next_backoff();
        }
        assert_eq!(backoff.next_backoff(), secs(256));
        // Next would be 512s, capped at 300s
        assert_eq!(backoff.next_backoff(), secs(300));
        assert_eq!(backoff.next_backoff(), secs(300));
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(secs(1), secs(300));

        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
        assert_eq!(backoff.next_backoff(), secs(4));

        backoff.reset();

        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
    }

    #[test]
    fn test_min_above_max_is_clamped() {
        let mut backoff = ExponentialBackoff::new(secs(600), secs(300));
        assert_eq!(backoff.next_backoff(), secs(300));
    }
}
