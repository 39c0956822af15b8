//! Retry backoff calculators.
//!
//! Two shapes are used: a Fibonacci sequence for requeueing failed
//! reconciles (grows slowly, suits loops that run for the lifetime of the
//! process) and a bounded exponential sequence with jitter for the one-shot
//! bootstrap path, which must give up after a fixed number of attempts.

use rand::Rng;
use std::time::Duration;

/// Fibonacci requeue backoff in seconds.
///
/// Sequence for the default `new(15, 600)`: 15s, 15s, 30s, 45s, 75s, 120s,
/// 195s, 315s, 510s, 600s (capped). Reset on a successful reconcile.
#[derive(Debug, Clone)]
pub struct RequeueBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl RequeueBackoff {
    /// Creates a backoff starting at `min_seconds`, capped at `max_seconds`.
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Returns the next requeue delay and advances the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = Duration::from_secs(self.current_seconds);
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);
        result
    }

    /// Restarts the sequence after a successful reconcile.
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

/// Bounded exponential backoff with proportional jitter.
///
/// `steps` counts total attempts: the caller makes one attempt, then sleeps
/// for each `Some` delay returned here, so `next_backoff` yields `steps - 1`
/// delays before signalling exhaustion with `None`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    steps: u32,
    duration: Duration,
    factor: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Creates a backoff permitting `steps` total attempts, starting at
    /// `duration` and multiplying by `factor` each step, with each delay
    /// perturbed by up to `jitter` of itself.
    #[must_use]
    pub fn new(steps: u32, duration: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            steps,
            duration,
            factor,
            jitter,
        }
    }

    /// Returns the next delay, or `None` once the attempt budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.steps <= 1 {
            return None;
        }
        self.steps -= 1;

        let mut delay = self.duration.as_secs_f64();
        if self.jitter > 0.0 {
            delay += delay * self.jitter * rand::rng().random::<f64>();
        }
        self.duration = Duration::from_secs_f64(self.duration.as_secs_f64() * self.factor);
        Some(Duration::from_secs_f64(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requeue_backoff_follows_fibonacci_and_caps() {
        let mut backoff = RequeueBackoff::new(15, 600);

        assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(45));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(75));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(120));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(195));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(315));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(510));
        // 510 + 315 exceeds the cap
        assert_eq!(backoff.next_backoff(), Duration::from_secs(600));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(600));
    }

    #[test]
    fn requeue_backoff_resets_after_success() {
        let mut backoff = RequeueBackoff::new(15, 600);
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.next_backoff();

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn exponential_backoff_exhausts_after_step_budget() {
        // 6 attempts means 5 sleeps between them
        let mut backoff = ExponentialBackoff::new(6, Duration::from_secs(1), 2.0, 0.0);
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();

        assert_eq!(delays.len(), 5);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(16));
    }

    #[test]
    fn exponential_backoff_jitter_stays_within_bounds() {
        for _ in 0..50 {
            let mut backoff = ExponentialBackoff::new(2, Duration::from_secs(10), 2.0, 0.1);
            let delay = backoff.next_backoff().unwrap();
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(11));
        }
    }
}
