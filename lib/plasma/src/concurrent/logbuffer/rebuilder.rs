use crate::concurrent::bits::align;
use crate::concurrent::logbuffer::frames;
use crate::concurrent::AtomicBuffer;
use crate::protocol::frame;
use byteorder::{BigEndian, ByteOrder};

/// Receiver-side insertion of a datagram's frames into an image term at
/// their wire offsets. Each frame is committed header-last so the client's
/// poll loop only ever observes whole frames, and frames already present are
/// left untouched, which is what makes retransmits idempotent.
///
/// Returns the term offset one past the final inserted frame.
pub fn insert(term: &AtomicBuffer, term_offset: u32, packet: &[u8]) -> u32 {
    let mut packet_offset = 0usize;

    while packet_offset + frame::BASE_HEADER_LENGTH <= packet.len() {
        let frame_length = BigEndian::read_u32(&packet[packet_offset..]) as usize;
        if frame_length == 0 || packet_offset + frame_length > packet.len() {
            break;
        }

        let target = term_offset as usize + packet_offset;

        if frames::length_volatile(term, target) == 0 {
            term.put_bytes(target + 4, &packet[packet_offset + 4..packet_offset + frame_length]);
            frames::set_length_ordered(term, target, frame_length as u32);
        }

        packet_offset += align(frame_length, frame::FRAME_ALIGNMENT);
    }

    term_offset + packet_offset as u32
}

/// Walks committed frames from `offset` and returns how far the contiguous
/// prefix now extends; the receiver advances its rebuild position with this
/// after every insert.
pub fn contiguous_end(term: &AtomicBuffer, mut offset: u32, term_length: u32) -> u32 {
    while offset < term_length {
        let frame_length = frames::length_volatile(term, offset as usize);
        if frame_length == 0 {
            break;
        }
        offset += align(frame_length as usize, frame::FRAME_ALIGNMENT) as u32;
    }

    offset
}
