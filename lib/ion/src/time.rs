use std::time::{Instant, SystemTime};

/// Returns the current unix timestamp in milliseconds.
#[inline]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_millis() as u64
}

/// Monotonic nanosecond clock anchored at construction time. All agent duty
/// cycles and timer wheels measure against the same instance.
#[derive(Copy, Clone)]
pub struct NanoClock {
    start: Instant,
}

impl NanoClock {
    #[inline]
    pub fn new() -> NanoClock {
        NanoClock { start: Instant::now() }
    }

    /// Nanoseconds elapsed since the clock was created.
    #[inline]
    pub fn nanos(&self) -> u64 {
        let elapsed = self.start.elapsed();
        elapsed.as_secs() * 1_000_000_000 + u64::from(elapsed.subsec_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nano_clock_monotonic() {
        let clock = NanoClock::new();
        let first = clock.nanos();
        let second = clock.nanos();
        assert!(second >= first);
    }
}
