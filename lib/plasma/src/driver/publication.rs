use crate::concurrent::counters::Position;
use crate::concurrent::logbuffer::{descriptor, LogBuffers, LogMeta};
use crate::concurrent::AtomicBuffer;
use crate::protocol::uri::ChannelUri;

/// Driver-side state for one publication. The log is appended to by client
/// publishers mapping the same files, scanned by the Sender from
/// `sender_position`, and its dirty terms are reclaimed by the Conductor.
/// Shared between Conductor and Sender behind an `Arc`; every mutable field
/// is a position counter with ordered semantics.
pub struct DriverPublication {
    registration_id: i64,
    client_id: i64,
    session_id: u32,
    stream_id: u32,
    channel: ChannelUri,
    log: LogBuffers,
    sender_position: Position,
    limit_position: Position,
    initial_term_id: u32,
    term_length: u32,
    position_bits: u32,
    mtu: u32,
}

impl DriverPublication {
    pub fn new(
        registration_id: i64,
        client_id: i64,
        session_id: u32,
        stream_id: u32,
        channel: ChannelUri,
        log: LogBuffers,
        sender_position: Position,
        limit_position: Position,
    ) -> DriverPublication {
        let meta = log.meta();
        let term_length = meta.term_length();

        DriverPublication {
            registration_id,
            client_id,
            session_id,
            stream_id,
            channel,
            initial_term_id: meta.initial_term_id(),
            term_length,
            position_bits: descriptor::position_bits_to_shift(term_length),
            mtu: meta.mtu(),
            log,
            sender_position,
            limit_position,
        }
    }

    #[inline]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    #[inline]
    pub fn client_id(&self) -> i64 {
        self.client_id
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
    pub fn channel(&self) -> &ChannelUri {
        &self.channel
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
    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    #[inline]
    pub fn sender_position(&self) -> i64 {
        self.sender_position.get()
    }

    #[inline]
    pub fn update_sender_position(&self, position: i64) {
        self.sender_position.set_ordered(position)
    }

    #[inline]
    pub fn update_publisher_limit(&self, limit: i64) {
        self.limit_position.set_ordered(limit)
    }

    #[inline]
    pub fn limit_counter_id(&self) -> usize {
        self.limit_position.id()
    }

    /// The term id and offset the sender position currently maps to.
    #[inline]
    pub fn sender_term(&self) -> (u32, u32, usize) {
        let position = self.sender_position();
        let term_id = descriptor::term_id_from_position(position, self.position_bits, self.initial_term_id);
        let offset = descriptor::term_offset_from_position(position, self.position_bits);
        (term_id, offset, descriptor::index_by_term(self.initial_term_id, term_id))
    }
}
