//! Resettable backoff policies
//!
//! Grounded on `kube-runtime`'s `utils::{Backoff, ResetTimerBackoff,
//! ResettableBackoffWrapper}` split: a small trait for "an iterator of
//! delays that can be reset", plus one concrete policy matching this
//! runtime's reconnect formula.

use rand::Rng;
use std::time::Duration;

/// An iterator of backoff delays that can be reset back to its initial state.
pub trait Backoff: Iterator<Item = Duration> + Send {
    fn reset(&mut self);
}

/// `delay = min(2^min(retries, cap_exp), max_secs) + jitter(0, 1s)`.
///
/// This is the watcher's reconnect backoff from the spec: capped exponential
/// growth with up to one second of uniform jitter, and a retry counter that
/// resets whenever [`ReconnectBackoff::reset`] is called (the watcher does
/// this on every successfully received event).
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    retries: u32,
    cap_exp: u32,
    max: Duration,
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(max: Duration) -> Self {
        Self {
            retries: 0,
            cap_exp: 5,
            max,
        }
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(32))
    }
}

impl Iterator for ReconnectBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let exp = self.retries.min(self.cap_exp);
        self.retries = self.retries.saturating_add(1);
        let base = Duration::from_secs(1u64 << exp).min(self.max);
        let jitter_ms = rand::rng().random_range(0..1000);
        Some(base + Duration::from_millis(jitter_ms))
    }
}

impl Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.retries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_are_bounded_by_formula() {
        let mut b = ReconnectBackoff::new(Duration::from_secs(32));
        for retries in 0..8u32 {
            let exp = retries.min(5);
            let base = Duration::from_secs(1u64 << exp).min(Duration::from_secs(32));
            let d = b.next().unwrap();
            assert!(d >= base, "retry {retries}: {d:?} < {base:?}");
            assert!(d <= base + Duration::from_secs(1), "retry {retries}: {d:?} > {base:?}+1s");
        }
    }

    #[test]
    fn reset_restarts_growth() {
        let mut b = ReconnectBackoff::new(Duration::from_secs(32));
        for _ in 0..5 {
            b.next();
        }
        b.reset();
        let d = b.next().unwrap();
        assert!(d >= Duration::from_secs(1) && d < Duration::from_secs(2));
    }

    #[test]
    fn caps_at_max_duration() {
        let mut b = ReconnectBackoff::new(Duration::from_secs(32));
        for _ in 0..20 {
            let d = b.next().unwrap();
            assert!(d <= Duration::from_secs(33));
        }
    }
}
