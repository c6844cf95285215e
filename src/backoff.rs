//! Randomized exponential backoff for the replication fetch loops.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
///
/// Delays grow by `base` per attempt, with each delay drawn uniformly from
/// `init_backoff..(previous * base)` and capped at `max_backoff`.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_copy_implementations)]
pub struct BackoffConfig {
    pub init_backoff: Duration,
    pub max_backoff: Duration,
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            base: 3.0,
        }
    }
}

/// [`Backoff`] can be created from a [`BackoffConfig`].
///
/// Consecutive calls to [`Backoff::next`] yield the delay to wait before the
/// following attempt.
#[derive(Debug)]
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
}

impl Backoff {
    /// Create a new [`Backoff`] with the given [`BackoffConfig`].
    pub fn new(config: &BackoffConfig) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
        }
    }

    /// Returns the delay for the current attempt and advances the internal
    /// state for the next one.
    pub fn next(&mut self) -> Duration {
        let range = self.init_backoff..(self.next_backoff_secs * self.base);
        let sampled = if range.is_empty() {
            self.init_backoff
        } else {
            rand::thread_rng().gen_range(range)
        };

        let next_backoff = self.max_backoff_secs.min(sampled);
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }

    /// Resets the backoff to its initial delay, once the guarded operation
    /// succeeds again.
    pub fn reset(&mut self) {
        self.next_backoff_secs = self.init_backoff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = BackoffConfig {
            init_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            base: 10.0,
        };
        let mut backoff = Backoff::new(&config);

        assert_eq!(backoff.next(), Duration::from_millis(10));

        for _ in 0..10 {
            let delay = backoff.next();
            assert!(delay >= config.init_backoff);
            assert!(delay <= config.max_backoff);
        }
    }

    #[test]
    fn test_backoff_reset() {
        let config = BackoffConfig {
            init_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(10),
            base: 2.0,
        };
        let mut backoff = Backoff::new(&config);

        for _ in 0..5 {
            backoff.next();
        }
        backoff.reset();

        assert_eq!(backoff.next(), Duration::from_millis(10));
    }
}
