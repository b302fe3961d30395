use crate::concurrent::bits::is_power_of_two;
use hashbrown::HashSet;

pub type TimerId = u64;

struct Entry {
    id: TimerId,
    deadline_ns: u64,
    rounds: u64,
}

/// Hashed timer wheel. Scheduling is O(1): a deadline hashes to the slot the
/// wheel will pass at that time, with a rounds counter for deadlines more
/// than one revolution out. Expiry scans only the current slot, bounded by
/// the caller's limit so timer bursts cannot starve the duty cycle.
pub struct TimerWheel {
    tick_ns: u64,
    mask: u64,
    start_ns: u64,
    current_tick: u64,
    slots: Vec<Vec<Entry>>,
    cancelled: HashSet<TimerId>,
    next_id: TimerId,
    active: usize,
    fired: Vec<TimerId>,
}

impl TimerWheel {
    pub fn new(start_ns: u64, tick_ns: u64, slot_count: usize) -> TimerWheel {
        if !is_power_of_two(slot_count as u64) {
            panic!("Slot count must be a power of two, got {}", slot_count);
        }
        if tick_ns == 0 {
            panic!("Tick duration must be non-zero");
        }

        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, Vec::new);

        TimerWheel {
            tick_ns,
            mask: slot_count as u64 - 1,
            start_ns,
            current_tick: 0,
            slots,
            cancelled: HashSet::new(),
            next_id: 1,
            active: 0,
            fired: Vec::new(),
        }
    }

    #[inline]
    pub fn tick_ns(&self) -> u64 {
        self.tick_ns
    }

    #[inline]
    pub fn active_timers(&self) -> usize {
        self.active
    }

    /// Registers a deadline and returns its timer id.
    pub fn schedule(&mut self, deadline_ns: u64) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;

        let deadline_tick = deadline_ns
            .saturating_sub(self.start_ns)
            .checked_div(self.tick_ns)
            .unwrap_or(0)
            .max(self.current_tick);

        let slot = (deadline_tick & self.mask) as usize;
        let rounds = (deadline_tick - self.current_tick) / (self.mask + 1);

        self.slots[slot].push(Entry {
            id,
            deadline_ns,
            rounds,
        });
        self.active += 1;

        id
    }

    /// Cancels a pending timer. Lazily reclaimed when its slot is next
    /// scanned.
    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    /// Fires timers whose deadlines have passed, up to `limit`, invoking the
    /// handler with each timer id. The handler may schedule or cancel freely.
    pub fn expire<F: FnMut(TimerId)>(&mut self, now_ns: u64, limit: usize, mut handler: F) -> usize {
        let mut expired = 0;

        while expired < limit {
            let slot = (self.current_tick & self.mask) as usize;

            let mut fired = std::mem::replace(&mut self.fired, Vec::new());
            fired.clear();

            {
                let cancelled = &mut self.cancelled;
                let active = &mut self.active;
                let budget = limit - expired;

                self.slots[slot].retain(|entry| {
                    if cancelled.remove(&entry.id) {
                        *active -= 1;
                        return false;
                    }
                    if entry.rounds == 0 && entry.deadline_ns <= now_ns && fired.len() < budget {
                        fired.push(entry.id);
                        *active -= 1;
                        return false;
                    }
                    true
                });
            }

            expired += fired.len();
            for id in fired.iter() {
                handler(*id);
            }
            self.fired = fired;

            // Only advance once the wall clock has fully passed this slot's
            // tick, and decrement the round counters left behind.
            let tick_end = self.start_ns + (self.current_tick + 1) * self.tick_ns;
            if now_ns < tick_end {
                break;
            }

            for entry in self.slots[slot].iter_mut() {
                if entry.rounds > 0 {
                    entry.rounds -= 1;
                }
            }

            self.current_tick += 1;
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: u64 = 10_000_000; // 10ms

    #[test]
    fn test_expires_due_timer() {
        let mut wheel = TimerWheel::new(0, TICK, 8);

        let id = wheel.schedule(TICK * 3);

        let mut fired = Vec::new();
        wheel.expire(TICK * 2, 10, |id| fired.push(id));
        assert!(fired.is_empty());

        wheel.expire(TICK * 3, 10, |id| fired.push(id));
        assert_eq!(fired, vec![id]);
        assert_eq!(wheel.active_timers(), 0);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut wheel = TimerWheel::new(0, TICK, 8);

        let id = wheel.schedule(TICK);
        wheel.cancel(id);

        let mut fired = Vec::new();
        wheel.expire(TICK * 10, 10, |id| fired.push(id));
        assert!(fired.is_empty());
        assert_eq!(wheel.active_timers(), 0);
    }

    #[test]
    fn test_deadline_beyond_one_revolution() {
        let mut wheel = TimerWheel::new(0, TICK, 8);

        // 20 ticks out: more than two revolutions of an 8 slot wheel.
        let id = wheel.schedule(TICK * 20);

        let mut fired = Vec::new();
        wheel.expire(TICK * 12, 100, |id| fired.push(id));
        assert!(fired.is_empty(), "fired a revolution early");

        wheel.expire(TICK * 20, 100, |id| fired.push(id));
        assert_eq!(fired, vec![id]);
    }

    #[test]
    fn test_expiry_bounded_by_limit() {
        let mut wheel = TimerWheel::new(0, TICK, 8);

        for _ in 0..5 {
            wheel.schedule(TICK);
        }

        let mut fired = Vec::new();
        let count = wheel.expire(TICK * 2, 2, |id| fired.push(id));
        assert_eq!(count, 2);

        let count = wheel.expire(TICK * 2, 10, |id| fired.push(id));
        assert_eq!(count, 3);
        assert_eq!(fired.len(), 5);
    }

    #[test]
    fn test_handler_may_reschedule() {
        let mut wheel = TimerWheel::new(0, TICK, 8);
        wheel.schedule(TICK);

        let mut rescheduled = Vec::new();
        wheel.expire(TICK, 10, |_| rescheduled.push(()));
        assert_eq!(rescheduled.len(), 1);

        // Schedule the follow-up the way a duty cycle would.
        wheel.schedule(TICK * 4);
        let mut fired = Vec::new();
        wheel.expire(TICK * 4, 10, |id| fired.push(id));
        assert_eq!(fired.len(), 1);
    }

    #[test]
    #[should_panic]
    fn test_non_power_of_two_slots_panics() {
        TimerWheel::new(0, TICK, 10);
    }
}
