use crate::concurrent::logbuffer::descriptor;
use crate::protocol::frame::StatusFrame;
use crate::protocol::uri::ChannelUri;
use hashbrown::HashMap;
use std::net::SocketAddr;

/// Per-publication flow control: folds receiver status messages into the
/// position the sender may transmit up to. Strategies are selected per
/// channel at publication creation time.
pub trait FlowControl {
    /// Absorbs one status message from `receiver`, returning the new limit.
    fn on_status_message(&mut self, sm: &StatusFrame, receiver: SocketAddr, now_ns: u64) -> i64;

    /// Periodic re-evaluation (receiver eviction and the like), returning
    /// the current limit.
    fn on_idle(&mut self, now_ns: u64) -> i64;

    /// True once at least one receiver is being tracked.
    fn has_receivers(&self) -> bool;

    /// The most recently computed limit.
    fn limit(&self) -> i64;
}

/// Selects the strategy for a channel: single-receiver tracking for unicast,
/// min-position tracking across the group for multicast.
pub fn for_channel(
    channel: &ChannelUri,
    initial_term_id: u32,
    position_bits: u32,
    receiver_timeout_ns: u64,
) -> Box<dyn FlowControl + Send> {
    if channel.is_multicast() {
        Box::new(MinMulticastFlowControl::new(
            initial_term_id,
            position_bits,
            receiver_timeout_ns,
        ))
    } else {
        Box::new(UnicastFlowControl::new(initial_term_id, position_bits))
    }
}

fn sm_limit(sm: &StatusFrame, initial_term_id: u32, position_bits: u32) -> i64 {
    descriptor::compute_position(
        sm.consumption_term_id,
        sm.consumption_term_offset,
        position_bits,
        initial_term_id,
    ) + i64::from(sm.receiver_window)
}

/// Unicast: one receiver, the last status message is the whole truth.
pub struct UnicastFlowControl {
    initial_term_id: u32,
    position_bits: u32,
    last_limit: i64,
    connected: bool,
}

impl UnicastFlowControl {
    pub fn new(initial_term_id: u32, position_bits: u32) -> UnicastFlowControl {
        UnicastFlowControl {
            initial_term_id,
            position_bits,
            last_limit: 0,
            connected: false,
        }
    }
}

impl FlowControl for UnicastFlowControl {
    fn on_status_message(&mut self, sm: &StatusFrame, _receiver: SocketAddr, _now_ns: u64) -> i64 {
        self.connected = true;
        self.last_limit = self
            .last_limit
            .max(sm_limit(sm, self.initial_term_id, self.position_bits));
        self.last_limit
    }

    fn on_idle(&mut self, _now_ns: u64) -> i64 {
        self.last_limit
    }

    fn has_receivers(&self) -> bool {
        self.connected
    }

    fn limit(&self) -> i64 {
        self.last_limit
    }
}

struct ReceiverState {
    limit: i64,
    last_sm_ns: u64,
}

/// Multicast: the limit is the minimum over every tracked receiver, so the
/// slowest receiver in the group paces the sender. Receivers silent past the
/// timeout are evicted.
pub struct MinMulticastFlowControl {
    initial_term_id: u32,
    position_bits: u32,
    receiver_timeout_ns: u64,
    receivers: HashMap<SocketAddr, ReceiverState>,
    last_limit: i64,
}

impl MinMulticastFlowControl {
    pub fn new(initial_term_id: u32, position_bits: u32, receiver_timeout_ns: u64) -> MinMulticastFlowControl {
        MinMulticastFlowControl {
            initial_term_id,
            position_bits,
            receiver_timeout_ns,
            receivers: HashMap::new(),
            last_limit: 0,
        }
    }

    fn recompute(&mut self) -> i64 {
        self.last_limit = self
            .receivers
            .values()
            .map(|state| state.limit)
            .min()
            .unwrap_or(self.last_limit);
        self.last_limit
    }
}

impl FlowControl for MinMulticastFlowControl {
    fn on_status_message(&mut self, sm: &StatusFrame, receiver: SocketAddr, now_ns: u64) -> i64 {
        let limit = sm_limit(sm, self.initial_term_id, self.position_bits);

        self.receivers.insert(
            receiver,
            ReceiverState {
                limit,
                last_sm_ns: now_ns,
            },
        );

        self.recompute()
    }

    fn on_idle(&mut self, now_ns: u64) -> i64 {
        let timeout = self.receiver_timeout_ns;
        self.receivers
            .retain(|_, state| now_ns.saturating_sub(state.last_sm_ns) < timeout);
        self.recompute()
    }

    fn has_receivers(&self) -> bool {
        !self.receivers.is_empty()
    }

    fn limit(&self) -> i64 {
        self.last_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BITS: u32 = 16; // 64 KiB terms

    fn sm(term_id: u32, offset: u32, window: u32) -> StatusFrame {
        StatusFrame {
            session_id: 1,
            stream_id: 10,
            consumption_term_id: term_id,
            consumption_term_offset: offset,
            receiver_window: window,
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_unicast_tracks_last_sm() {
        let mut flow = UnicastFlowControl::new(0, BITS);
        assert!(!flow.has_receivers());

        let limit = flow.on_status_message(&sm(0, 1024, 4096), addr(1), 0);
        assert_eq!(limit, 1024 + 4096);
        assert!(flow.has_receivers());

        let limit = flow.on_status_message(&sm(1, 0, 4096), addr(1), 0);
        assert_eq!(limit, 65_536 + 4096);
    }

    #[test]
    fn test_unicast_limit_never_regresses() {
        let mut flow = UnicastFlowControl::new(0, BITS);

        flow.on_status_message(&sm(0, 8192, 4096), addr(1), 0);
        let limit = flow.on_status_message(&sm(0, 0, 4096), addr(1), 0);

        assert_eq!(limit, 8192 + 4096);
    }

    #[test]
    fn test_multicast_takes_min_over_receivers() {
        let mut flow = MinMulticastFlowControl::new(0, BITS, 1_000);

        flow.on_status_message(&sm(0, 8192, 4096), addr(1), 0);
        let limit = flow.on_status_message(&sm(0, 1024, 4096), addr(2), 0);

        assert_eq!(limit, 1024 + 4096);
    }

    #[test]
    fn test_multicast_evicts_silent_receiver() {
        let mut flow = MinMulticastFlowControl::new(0, BITS, 1_000);

        flow.on_status_message(&sm(0, 1024, 4096), addr(1), 0);
        flow.on_status_message(&sm(0, 8192, 4096), addr(2), 500);

        // Receiver 1 goes silent; after eviction the faster receiver governs.
        let limit = flow.on_idle(1_600);
        assert_eq!(limit, 8192 + 4096);
        assert!(flow.has_receivers());

        // Everyone silent: no receivers left, limit holds its last value.
        let limit = flow.on_idle(10_000);
        assert_eq!(limit, 8192 + 4096);
        assert!(!flow.has_receivers());
    }

    #[test]
    fn test_factory_selects_by_mode() {
        let unicast = ChannelUri::parse("udp://127.0.0.1:40123").unwrap();
        let multicast = ChannelUri::parse("udp://224.0.1.1:40456").unwrap();

        assert!(!for_channel(&unicast, 0, BITS, 1_000).has_receivers());
        assert!(!for_channel(&multicast, 0, BITS, 1_000).has_receivers());
    }
}
