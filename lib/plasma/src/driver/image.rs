use crate::concurrent::counters::Position;
use crate::concurrent::logbuffer::{descriptor, rebuilder, LogBuffers, LogMeta};
use crate::concurrent::AtomicBuffer;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Image lifecycle. The Receiver drives ACTIVE to INACTIVE on liveness
/// timeout; the Conductor drives INACTIVE through LINGER to removal and
/// notifies clients.
pub const ACTIVE: u32 = 0;
pub const INACTIVE: u32 = 1;
pub const LINGER: u32 = 2;

/// Driver-side state for one image: a subscription's view of one remote
/// session. The Receiver rebuilds the log from datagrams; client
/// subscribers poll the same files, advancing the subscriber position the
/// Receiver advertises back to the source in status messages.
pub struct PublicationImage {
    correlation_id: i64,
    subscription_id: i64,
    session_id: u32,
    stream_id: u32,
    transport_id: usize,
    control_address: SocketAddr,
    log: LogBuffers,
    hwm_position: Position,
    rebuild_position: Position,
    subscriber_position: Position,
    status: AtomicU32,
    last_packet_ns: AtomicU64,
    initial_term_id: u32,
    term_length: u32,
    position_bits: u32,
}

impl PublicationImage {
    pub fn new(
        correlation_id: i64,
        subscription_id: i64,
        session_id: u32,
        stream_id: u32,
        transport_id: usize,
        control_address: SocketAddr,
        log: LogBuffers,
        hwm_position: Position,
        rebuild_position: Position,
        subscriber_position: Position,
        join_position: i64,
        now_ns: u64,
    ) -> PublicationImage {
        let meta = log.meta();
        let term_length = meta.term_length();

        hwm_position.set_ordered(join_position);
        rebuild_position.set_ordered(join_position);
        subscriber_position.set_ordered(join_position);

        PublicationImage {
            correlation_id,
            subscription_id,
            session_id,
            stream_id,
            transport_id,
            control_address,
            initial_term_id: meta.initial_term_id(),
            term_length,
            position_bits: descriptor::position_bits_to_shift(term_length),
            log,
            hwm_position,
            rebuild_position,
            subscriber_position,
            status: AtomicU32::new(ACTIVE),
            last_packet_ns: AtomicU64::new(now_ns),
        }
    }

    #[inline]
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    #[inline]
    pub fn subscription_id(&self) -> i64 {
        self.subscription_id
    }

    #[inline]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    #[inline]
    pub fn transport_id(&self) -> usize {
        self.transport_id
    }

    #[inline]
    pub fn control_address(&self) -> SocketAddr {
        self.control_address
    }

    #[inline]
    pub fn log(&self) -> &LogBuffers {
        &self.log
    }

    #[inline]
    pub fn meta(&self) -> LogMeta {
        self.log.meta()
    }

    #[inline]
    pub fn term(&self, index: usize) -> AtomicBuffer {
        self.log.term(index)
    }

    #[inline]
    pub fn initial_term_id(&self) -> u32 {
        self.initial_term_id
    }

    #[inline]
    pub fn term_length(&self) -> u32 {
        self.term_length
    }

    #[inline]
    pub fn position_bits(&self) -> u32 {
        self.position_bits
    }

    #[inline]
    pub fn subscriber_position_id(&self) -> usize {
        self.subscriber_position.id()
    }

    #[inline]
    pub fn hwm_position(&self) -> i64 {
        self.hwm_position.get()
    }

    #[inline]
    pub fn rebuild_position(&self) -> i64 {
        self.rebuild_position.get()
    }

    #[inline]
    pub fn subscriber_position(&self) -> i64 {
        self.subscriber_position.get()
    }

    #[inline]
    pub fn status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_status(&self, status: u32) {
        self.status.store(status, Ordering::Release)
    }

    #[inline]
    pub fn last_packet_ns(&self) -> u64 {
        self.last_packet_ns.load(Ordering::Acquire)
    }

    #[inline]
    pub fn on_packet(&self, now_ns: u64) {
        self.last_packet_ns.store(now_ns, Ordering::Release)
    }

    /// Inserts a datagram's frames at their wire position and advances the
    /// rebuild and high-water marks. Duplicate frames are dropped inside the
    /// rebuilder, which is what makes NAK-driven retransmits idempotent.
    pub fn insert_packet(&self, term_id: u32, term_offset: u32, packet: &[u8], now_ns: u64) {
        let index = descriptor::index_by_term(self.initial_term_id, term_id);
        let term = self.term(index);

        let end_offset = rebuilder::insert(&term, term_offset, packet);
        self.on_packet(now_ns);

        let packet_end =
            descriptor::compute_position(term_id, end_offset, self.position_bits, self.initial_term_id);
        if packet_end > self.hwm_position.get() {
            self.hwm_position.set_ordered(packet_end);
        }

        self.advance_rebuild();
    }

    /// Extends the high-water mark from a sender heartbeat so tail loss is
    /// still NAKable.
    pub fn on_heartbeat(&self, term_id: u32, term_offset: u32, now_ns: u64) {
        self.on_packet(now_ns);

        let position =
            descriptor::compute_position(term_id, term_offset, self.position_bits, self.initial_term_id);
        if position > self.hwm_position.get() {
            self.hwm_position.set_ordered(position);
        }
    }

    /// Walks the contiguous frontier forward from the current rebuild
    /// position, rotating across term boundaries and flagging a term it
    /// leaves behind for background cleaning.
    fn advance_rebuild(&self) {
        let mut rebuild = self.rebuild_position.get();

        loop {
            let term_id = descriptor::term_id_from_position(rebuild, self.position_bits, self.initial_term_id);
            let offset = descriptor::term_offset_from_position(rebuild, self.position_bits);
            let index = descriptor::index_by_term(self.initial_term_id, term_id);

            let end = rebuilder::contiguous_end(&self.term(index), offset, self.term_length);
            rebuild += i64::from(end - offset);

            if end < self.term_length {
                break;
            }

            // Crossed into the next term; the one left behind is dirty.
            self.meta().set_status(index, descriptor::NEEDS_CLEANING);
        }

        self.rebuild_position.set_ordered(rebuild);
    }

    /// The rebuild point and the scan limit for the loss detector: gaps are
    /// only meaningful in `[rebuild, hwm)`, clamped to the rebuild term.
    pub fn gap_scan_window(&self) -> Option<(u32, u32, usize, u32)> {
        let rebuild = self.rebuild_position.get();
        let hwm = self.hwm_position.get();

        if hwm <= rebuild {
            return None;
        }

        let term_id = descriptor::term_id_from_position(rebuild, self.position_bits, self.initial_term_id);
        let offset = descriptor::term_offset_from_position(rebuild, self.position_bits);
        let index = descriptor::index_by_term(self.initial_term_id, term_id);

        let hwm_term_id = descriptor::term_id_from_position(hwm, self.position_bits, self.initial_term_id);
        let limit = if hwm_term_id == term_id {
            descriptor::term_offset_from_position(hwm, self.position_bits)
        } else {
            self.term_length
        };

        Some((term_id, offset, index, limit))
    }
}
