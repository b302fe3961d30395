use crate::concurrent::AtomicBuffer;
use crate::protocol::frame;

/// Atomic accessors for frame words inside a term. Values are big-endian in
/// memory exactly as on the wire; the length word is the commit point, so it
/// is read with acquire and written with release semantics.

#[inline]
pub fn length_volatile(term: &AtomicBuffer, offset: usize) -> u32 {
    u32::from_be(term.get_u32_volatile(offset + frame::LENGTH_OFFSET))
}

#[inline]
pub fn set_length_ordered(term: &AtomicBuffer, offset: usize, length: u32) {
    term.put_u32_ordered(offset + frame::LENGTH_OFFSET, length.to_be())
}

#[inline]
pub fn frame_type(term: &AtomicBuffer, offset: usize) -> u16 {
    let bytes = term.bytes(offset + frame::TYPE_OFFSET, 2);
    u16::from_be_bytes([bytes[0], bytes[1]])
}

#[inline]
pub fn is_padding(term: &AtomicBuffer, offset: usize) -> bool {
    frame_type(term, offset) == frame::FrameType::Pad as u16
}

#[inline]
pub fn flags(term: &AtomicBuffer, offset: usize) -> u8 {
    term.bytes(offset + frame::FLAGS_OFFSET, 1)[0]
}
