//! Bounded exponential backoff for `Execute`'s retry loop (spec §4.4).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `delay_ms = min(base * multiplier^min(attempt, max_exponent), max_ms)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub multiplier: f64,
    pub max_exponent: u32,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            multiplier: 2.0,
            max_exponent: 5,
            max_ms: 10_000,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry attempt `attempt` (0-indexed: the delay slept *after*
    /// attempt `attempt` fails, before attempt `attempt + 1` runs).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent);
        let delay_ms = (self.base_ms as f64) * self.multiplier.powi(exponent as i32);
        let delay_ms = delay_ms.min(self.max_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let cfg = BackoffConfig::default();
        let mut last = Duration::ZERO;
        for attempt in 0..10 {
            let delay = cfg.delay_for(attempt);
            assert!(delay >= last, "attempt {attempt} regressed: {delay:?} < {last:?}");
            assert!(delay <= Duration::from_millis(cfg.max_ms));
            last = delay;
        }
    }

    #[test]
    fn matches_default_progression() {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.delay_for(0), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(1), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(400));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(800));
        assert_eq!(cfg.delay_for(4), Duration::from_millis(1600));
        assert_eq!(cfg.delay_for(5), Duration::from_millis(3200));
        // max_exponent caps further growth
        assert_eq!(cfg.delay_for(6), Duration::from_millis(3200));
    }

    #[test]
    fn respects_max_ms_cap() {
        let cfg = BackoffConfig {
            base_ms: 100,
            multiplier: 2.0,
            max_exponent: 10,
            max_ms: 5_000,
        };
        assert_eq!(cfg.delay_for(10), Duration::from_millis(5_000));
    }
}
