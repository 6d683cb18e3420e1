use rand::Rng;
use std::time::Duration;

/// Backoff schedule parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    /// A stream that survives this long resets the schedule to `base`.
    pub reset_after: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(60),
            reset_after: Duration::from_secs(60),
        }
    }
}

/// Bounded exponential backoff with jitter.
///
/// Each delay is drawn uniformly from [nominal/2, nominal]; the nominal
/// value doubles per failure up to the cap.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.base;
        Backoff { config, current }
    }

    /// Next jittered delay, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.current;
        self.current = self
            .current
            .saturating_mul(self.config.factor)
            .min(self.config.cap);

        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        nominal.mul_f64(jitter)
    }

    /// Return the schedule to its base delay.
    pub fn reset(&mut self) {
        self.current = self.config.base;
    }

    pub fn reset_after(&self) -> Duration {
        self.config.reset_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_ms: u64, cap_ms: u64) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(base_ms),
            factor: 2,
            cap: Duration::from_millis(cap_ms),
            reset_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_delays_grow_within_jitter_bounds() {
        let mut backoff = Backoff::new(config(1000, 60_000));

        for expected_ms in [1000u64, 2000, 4000, 8000] {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(expected_ms / 2), "{delay:?}");
            assert!(delay <= Duration::from_millis(expected_ms), "{delay:?}");
        }
    }

    #[test]
    fn test_cap() {
        let mut backoff = Backoff::new(config(1000, 4000));
        for _ in 0..10 {
            backoff.next_delay();
        }
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(4000));
        assert!(delay >= Duration::from_millis(2000));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(config(1000, 60_000));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(1000));
    }
}
