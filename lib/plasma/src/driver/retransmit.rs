use crate::concurrent::wheel::{TimerId, TimerWheel};
use hashbrown::HashMap;

#[derive(Copy, Clone, Eq, PartialEq)]
enum State {
    Delayed,
    Lingering,
}

struct Pending {
    length: u32,
    state: State,
    timer: TimerId,
}

/// Sender-side NAK servicing. Each distinct gap runs a small state machine
/// on the timer wheel: DELAYED until its resend fires, then LINGERING for a
/// while so repeats of the same NAK (from receivers that have not yet seen
/// the retransmit) are suppressed instead of amplifying traffic.
pub struct RetransmitHandler {
    wheel: TimerWheel,
    pending: HashMap<(u32, u32), Pending>,
    by_timer: HashMap<TimerId, (u32, u32)>,
    delay_ns: u64,
    linger_ns: u64,
    max_retransmits: usize,
    due: Vec<TimerId>,
}

impl RetransmitHandler {
    pub fn new(
        start_ns: u64,
        tick_ns: u64,
        delay_ns: u64,
        linger_ns: u64,
        max_retransmits: usize,
    ) -> RetransmitHandler {
        RetransmitHandler {
            wheel: TimerWheel::new(start_ns, tick_ns, 256),
            pending: HashMap::new(),
            by_timer: HashMap::new(),
            delay_ns,
            linger_ns,
            max_retransmits,
            due: Vec::new(),
        }
    }

    /// Absorbs one NAK. Duplicate NAKs for an in-flight or lingering gap are
    /// dropped; excess concurrent retransmits are shed.
    pub fn on_nak(&mut self, term_id: u32, term_offset: u32, length: u32, now_ns: u64) {
        let key = (term_id, term_offset);

        if self.pending.contains_key(&key) || self.pending.len() >= self.max_retransmits {
            return;
        }

        let timer = self.wheel.schedule(now_ns + self.delay_ns);
        self.pending.insert(
            key,
            Pending {
                length,
                state: State::Delayed,
                timer,
            },
        );
        self.by_timer.insert(timer, key);
    }

    /// Drives the state machines; `resend` is invoked with
    /// `(term_id, term_offset, length)` for each retransmit due now.
    pub fn process<F: FnMut(u32, u32, u32)>(&mut self, now_ns: u64, mut resend: F) {
        let mut due = std::mem::replace(&mut self.due, Vec::new());
        due.clear();

        self.wheel.expire(now_ns, self.max_retransmits * 2, |timer| due.push(timer));

        for timer in due.iter() {
            let key = match self.by_timer.remove(timer) {
                Some(key) => key,
                None => continue,
            };

            let pending = match self.pending.get_mut(&key) {
                Some(pending) => pending,
                None => continue,
            };

            match pending.state {
                State::Delayed => {
                    resend(key.0, key.1, pending.length);
                    pending.state = State::Lingering;
                    let timer = self.wheel.schedule(now_ns + self.linger_ns);
                    pending.timer = timer;
                    self.by_timer.insert(timer, key);
                }
                State::Lingering => {
                    self.pending.remove(&key);
                }
            }
        }

        self.due = due;
    }

    #[inline]
    pub fn pending_retransmits(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: u64 = 1_000_000; // 1ms

    fn handler(delay_ns: u64) -> RetransmitHandler {
        RetransmitHandler::new(0, TICK, delay_ns, 10 * TICK, 4)
    }

    #[test]
    fn test_immediate_resend() {
        let mut handler = handler(0);

        handler.on_nak(5, 1024, 128, 0);

        let mut resent = Vec::new();
        handler.process(TICK, |term, offset, length| resent.push((term, offset, length)));

        assert_eq!(resent, vec![(5, 1024, 128)]);
    }

    #[test]
    fn test_duplicate_nak_suppressed_while_lingering() {
        let mut handler = handler(0);

        handler.on_nak(5, 1024, 128, 0);

        let mut resent = 0;
        handler.process(TICK, |_, _, _| resent += 1);
        assert_eq!(resent, 1);

        // The same gap NAKed again while lingering: no second resend.
        handler.on_nak(5, 1024, 128, TICK * 2);
        handler.process(TICK * 3, |_, _, _| resent += 1);
        assert_eq!(resent, 1);

        // After the linger expires the entry is gone and a new NAK resends.
        handler.process(TICK * 12, |_, _, _| resent += 1);
        assert_eq!(handler.pending_retransmits(), 0);

        handler.on_nak(5, 1024, 128, TICK * 13);
        handler.process(TICK * 14, |_, _, _| resent += 1);
        assert_eq!(resent, 2);
    }

    #[test]
    fn test_delayed_resend_waits() {
        let mut handler = handler(5 * TICK);

        handler.on_nak(5, 0, 64, 0);

        let mut resent = 0;
        handler.process(TICK * 2, |_, _, _| resent += 1);
        assert_eq!(resent, 0);

        handler.process(TICK * 6, |_, _, _| resent += 1);
        assert_eq!(resent, 1);
    }

    #[test]
    fn test_concurrent_retransmits_bounded() {
        let mut handler = handler(0);

        for offset in 0..8u32 {
            handler.on_nak(5, offset * 64, 64, 0);
        }

        assert_eq!(handler.pending_retransmits(), 4);
    }
}
