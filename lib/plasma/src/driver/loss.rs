use crate::concurrent::logbuffer::gaps::Gap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Produces the delay between detecting a gap and sending the NAK for it.
pub trait DelayGenerator {
    fn delay_ns(&mut self) -> u64;
}

/// Unicast: NAK immediately, there is nobody to suppress against.
pub struct StaticDelayGenerator {
    delay_ns: u64,
}

impl StaticDelayGenerator {
    pub fn new(delay_ns: u64) -> StaticDelayGenerator {
        StaticDelayGenerator { delay_ns }
    }
}

impl DelayGenerator for StaticDelayGenerator {
    #[inline]
    fn delay_ns(&mut self) -> u64 {
        self.delay_ns
    }
}

/// Multicast: randomized backoff `rand * grtt * ln(groupSize)`, capped, so
/// one receiver's NAK suppresses the rest of the group's.
pub struct OptimalMulticastDelayGenerator {
    rng: SmallRng,
    scaled_grtt_ns: f64,
    max_backoff_ns: u64,
}

impl OptimalMulticastDelayGenerator {
    pub fn new(grtt_ns: u64, group_size: u32, max_backoff_ns: u64) -> OptimalMulticastDelayGenerator {
        OptimalMulticastDelayGenerator {
            rng: SmallRng::from_entropy(),
            scaled_grtt_ns: grtt_ns as f64 * f64::from(group_size.max(2)).ln(),
            max_backoff_ns,
        }
    }
}

impl DelayGenerator for OptimalMulticastDelayGenerator {
    #[inline]
    fn delay_ns(&mut self) -> u64 {
        let delay = self.rng.gen::<f64>() * self.scaled_grtt_ns;
        (delay as u64).min(self.max_backoff_ns)
    }
}

/// Tracks the image's current loss and decides when to NAK it. A gap must
/// survive its backoff delay unchanged before the NAK goes out; an
/// unanswered NAK is repeated every retry interval until the gap fills or
/// moves.
pub struct LossDetector {
    delay: Box<dyn DelayGenerator + Send>,
    retry_ns: u64,
    active: Option<(Gap, u64)>,
}

impl LossDetector {
    pub fn new(delay: Box<dyn DelayGenerator + Send>, retry_ns: u64) -> LossDetector {
        LossDetector {
            delay,
            retry_ns,
            active: None,
        }
    }

    /// Feeds the current first gap (or none); returns a gap when a NAK
    /// should be transmitted now.
    pub fn on_scan(&mut self, gap: Option<Gap>, now_ns: u64) -> Option<Gap> {
        let gap = match gap {
            Some(gap) => gap,
            None => {
                self.active = None;
                return None;
            }
        };

        match self.active {
            Some((active, deadline)) if active == gap => {
                if now_ns >= deadline {
                    self.active = Some((gap, now_ns + self.retry_ns));
                    Some(gap)
                } else {
                    None
                }
            }
            _ => {
                // New or changed gap: restart the backoff.
                let deadline = now_ns + self.delay.delay_ns();
                self.active = Some((gap, deadline));

                if now_ns >= deadline {
                    self.active = Some((gap, now_ns + self.retry_ns));
                    Some(gap)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(offset: u32, length: u32) -> Gap {
        Gap {
            term_id: 1,
            offset,
            length,
        }
    }

    #[test]
    fn test_unicast_naks_immediately() {
        let mut detector = LossDetector::new(Box::new(StaticDelayGenerator::new(0)), 1_000);

        assert_eq!(detector.on_scan(Some(gap(0, 64)), 100), Some(gap(0, 64)));
    }

    #[test]
    fn test_nak_repeats_after_retry_interval() {
        let mut detector = LossDetector::new(Box::new(StaticDelayGenerator::new(0)), 1_000);

        assert!(detector.on_scan(Some(gap(0, 64)), 100).is_some());
        assert!(detector.on_scan(Some(gap(0, 64)), 500).is_none());
        assert!(detector.on_scan(Some(gap(0, 64)), 1_100).is_some());
    }

    #[test]
    fn test_filled_gap_clears_state() {
        let mut detector = LossDetector::new(Box::new(StaticDelayGenerator::new(0)), 1_000);

        assert!(detector.on_scan(Some(gap(0, 64)), 100).is_some());
        assert!(detector.on_scan(None, 200).is_none());

        // A new gap after a clean scan NAKs afresh.
        assert!(detector.on_scan(Some(gap(128, 64)), 300).is_some());
    }

    #[test]
    fn test_delayed_nak_waits_out_backoff() {
        let mut detector = LossDetector::new(Box::new(StaticDelayGenerator::new(500)), 1_000);

        assert!(detector.on_scan(Some(gap(0, 64)), 100).is_none());
        assert!(detector.on_scan(Some(gap(0, 64)), 400).is_none());
        assert!(detector.on_scan(Some(gap(0, 64)), 700).is_some());
    }

    #[test]
    fn test_changed_gap_restarts_backoff() {
        let mut detector = LossDetector::new(Box::new(StaticDelayGenerator::new(500)), 1_000);

        assert!(detector.on_scan(Some(gap(0, 64)), 100).is_none());
        // The gap partially fills; the replacement gap gets its own delay.
        assert!(detector.on_scan(Some(gap(32, 32)), 550).is_none());
        assert!(detector.on_scan(Some(gap(32, 32)), 1_100).is_some());
    }

    #[test]
    fn test_multicast_delay_is_capped() {
        let mut generator = OptimalMulticastDelayGenerator::new(10_000_000, 8, 1_000_000);

        for _ in 0..100 {
            assert!(generator.delay_ns() <= 1_000_000);
        }
    }
}
