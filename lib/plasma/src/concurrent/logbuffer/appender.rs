use crate::concurrent::bits::align;
use crate::concurrent::logbuffer::{descriptor, frames, LogBuffers, LogMeta};
use crate::concurrent::AtomicBuffer;
use crate::protocol::frame::{self, flags, FrameHeader, FrameType};

/// Outcome of one append attempt against a log.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Appended {
    /// Committed; the value is the new tail position of the log.
    At(i64),
    /// The claim tripped the end of the term and the log rotated (or another
    /// producer rotated it first). Retry immediately.
    Rotated,
    /// Rotation is blocked on a partition still awaiting cleaning. Back off
    /// and retry once the driver has caught up.
    Backed,
}

/// Producer view over a log: claims space with a fetch-and-add on the active
/// partition's raw tail and commits each frame header-last. Larger messages
/// are fragmented into MTU-sized frames claimed as one contiguous block, so
/// a message never interleaves with a competing producer and never straddles
/// a term boundary.
pub struct LogAppender {
    terms: [AtomicBuffer; descriptor::PARTITION_COUNT],
    meta: LogMeta,
    term_length: u32,
    max_payload: u32,
    max_message: u32,
    position_bits: u32,
    initial_term_id: u32,
    session_id: u32,
    stream_id: u32,
}

impl LogAppender {
    pub fn new(log: &LogBuffers, session_id: u32, stream_id: u32) -> LogAppender {
        let meta = log.meta();
        let term_length = meta.term_length();

        LogAppender {
            terms: [log.term(0), log.term(1), log.term(2)],
            meta,
            term_length,
            max_payload: meta.mtu() - frame::HEADER_LENGTH as u32,
            max_message: term_length / 8,
            position_bits: descriptor::position_bits_to_shift(term_length),
            initial_term_id: meta.initial_term_id(),
            session_id,
            stream_id,
        }
    }

    /// Largest message this appender accepts, all fragments included.
    #[inline]
    pub fn max_message_length(&self) -> usize {
        self.max_message as usize
    }

    /// Bytes the claim will consume for a message of `length`, headers and
    /// per-frame alignment included.
    fn required_length(&self, length: usize) -> usize {
        let full_frames = length / self.max_payload as usize;
        let remainder = length % self.max_payload as usize;

        let mut required = full_frames * align(frame::HEADER_LENGTH + self.max_payload as usize, frame::FRAME_ALIGNMENT);
        if remainder > 0 || length == 0 {
            required += align(frame::HEADER_LENGTH + remainder, frame::FRAME_ALIGNMENT);
        }
        required
    }

    pub fn append(&self, payload: &[u8]) -> Appended {
        if payload.len() > self.max_message as usize {
            panic!(
                "Message length {} exceeds maximum {}",
                payload.len(),
                self.max_message
            );
        }

        let required = self.required_length(payload.len()) as u64;

        let active = self.meta.active_index();
        let raw_tail = self.meta.get_and_add_raw_tail(active, required);
        let term_id = descriptor::raw_tail_term_id(raw_tail);
        let tail = raw_tail as u32;

        if u64::from(tail) + required > u64::from(self.term_length) {
            return self.trip(active, term_id, tail);
        }

        let term = &self.terms[active];
        self.write_frames(term, term_id, tail, payload);

        Appended::At(descriptor::compute_position(
            term_id,
            tail + required as u32,
            self.position_bits,
            self.initial_term_id,
        ))
    }

    /// End-of-term handling: the claimant that crossed the boundary first
    /// pads out the term, then everyone races one CAS to rotate; losers
    /// simply observe the new active partition on retry.
    fn trip(&self, active: usize, term_id: u32, tail: u32) -> Appended {
        if tail < self.term_length {
            self.write_padding(&self.terms[active], term_id, tail);
        }

        let next = (active + 1) % descriptor::PARTITION_COUNT;
        if self.meta.status(next) != descriptor::CLEAN {
            return Appended::Backed;
        }

        // Reset the next partition's tail only while it still holds the
        // stale generation; a CAS failure means another producer rotated
        // first and claims may already be in flight there.
        let old_raw = self.meta.raw_tail(next);
        if descriptor::raw_tail_term_id(old_raw) != term_id.wrapping_add(1) {
            self.meta.cas_raw_tail(
                next,
                old_raw,
                descriptor::pack_raw_tail(term_id.wrapping_add(1), 0),
            );
        }

        if self.meta.cas_active_index(active, next) {
            // The outgoing term is dirty once consumers drain past it; flag
            // it for the driver's background zeroing.
            self.meta.set_status(active, descriptor::NEEDS_CLEANING);
        }

        Appended::Rotated
    }

    fn write_padding(&self, term: &AtomicBuffer, term_id: u32, tail: u32) {
        let pad_length = self.term_length - tail;

        let header = FrameHeader {
            frame_length: pad_length,
            flags: flags::PADDING,
            frame_type: FrameType::Pad,
            term_offset: tail,
            session_id: self.session_id,
            stream_id: self.stream_id,
            term_id,
        };
        header
            .encode_sans_length(term.bytes_mut(tail as usize, frame::BASE_HEADER_LENGTH))
            .expect("Pad header encode failed");

        frames::set_length_ordered(term, tail as usize, pad_length);
    }

    fn write_frames(&self, term: &AtomicBuffer, term_id: u32, tail: u32, payload: &[u8]) {
        let max_payload = self.max_payload as usize;
        let fragments = if payload.len() <= max_payload {
            1
        } else {
            (payload.len() + max_payload - 1) / max_payload
        };

        let mut offset = tail as usize;

        for index in 0..fragments {
            let chunk = &payload[index * max_payload..payload.len().min((index + 1) * max_payload)];
            let frame_length = (frame::HEADER_LENGTH + chunk.len()) as u32;

            let mut frame_flags = 0u8;
            if index == 0 {
                frame_flags |= flags::BEGIN;
            }
            if index == fragments - 1 {
                frame_flags |= flags::END;
            }

            let header = FrameHeader {
                frame_length,
                flags: frame_flags,
                frame_type: FrameType::Data,
                term_offset: offset as u32,
                session_id: self.session_id,
                stream_id: self.stream_id,
                term_id,
            };
            header
                .encode_sans_length(term.bytes_mut(offset, frame::BASE_HEADER_LENGTH))
                .expect("Frame header encode failed");

            term.put_bytes(offset + frame::HEADER_LENGTH, chunk);
            frames::set_length_ordered(term, offset, frame_length);

            offset += align(frame_length as usize, frame::FRAME_ALIGNMENT);
        }
    }
}
