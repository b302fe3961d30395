use std::thread;
use std::time::Duration;

/// Progressive back-off for a spinning duty cycle: spin first, then yield,
/// then park for exponentially increasing intervals. Any productive cycle
/// resets the progression.
pub struct BackoffIdleStrategy {
    max_spins: u64,
    max_yields: u64,
    min_park_ns: u64,
    max_park_ns: u64,
    spins: u64,
    yields: u64,
    park_ns: u64,
}

impl BackoffIdleStrategy {
    pub fn new(max_spins: u64, max_yields: u64, min_park_ns: u64, max_park_ns: u64) -> BackoffIdleStrategy {
        BackoffIdleStrategy {
            max_spins,
            max_yields,
            min_park_ns,
            max_park_ns,
            spins: 0,
            yields: 0,
            park_ns: min_park_ns,
        }
    }

    /// Defaults: 100 spins, 10 yields, park 10ns to 100us.
    pub fn default_strategy() -> BackoffIdleStrategy {
        BackoffIdleStrategy::new(100, 10, 10, 100_000)
    }

    /// Called once per duty cycle with the amount of work done.
    #[inline]
    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        if self.spins < self.max_spins {
            self.spins += 1;
            std::hint::spin_loop();
        } else if self.yields < self.max_yields {
            self.yields += 1;
            thread::yield_now();
        } else {
            thread::park_timeout(Duration::from_nanos(self.park_ns));
            self.park_ns = (self.park_ns * 2).min(self.max_park_ns);
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park_ns = self.min_park_ns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progression_resets_on_work() {
        let mut strategy = BackoffIdleStrategy::new(2, 2, 10, 1000);

        for _ in 0..10 {
            strategy.idle(0);
        }
        assert_eq!(strategy.park_ns, 640);

        strategy.idle(1);
        assert_eq!(strategy.spins, 0);
        assert_eq!(strategy.yields, 0);
        assert_eq!(strategy.park_ns, 10);
    }

    #[test]
    fn test_park_interval_is_capped() {
        let mut strategy = BackoffIdleStrategy::new(0, 0, 10, 80);

        for _ in 0..10 {
            strategy.idle(0);
        }
        assert_eq!(strategy.park_ns, 80);
    }
}
