use crate::concurrent::bits::{is_power_of_two, CACHE_LINE_LENGTH};
use crate::concurrent::AtomicBuffer;

pub const PARTITION_COUNT: usize = 3;

pub const TERM_MIN_LENGTH: u32 = 64 * 1024;
pub const TERM_MAX_LENGTH: u32 = 1024 * 1024 * 1024;

/// Per-partition state block within the meta file: the raw tail word and the
/// status word, padded apart so the producer's FAA traffic does not contend
/// with the cleaner's status flips.
pub const STATE_BLOCK_LENGTH: usize = CACHE_LINE_LENGTH * 2;
pub const RAW_TAIL_OFFSET: usize = 0;
pub const STATUS_OFFSET: usize = CACHE_LINE_LENGTH;

pub const ACTIVE_INDEX_OFFSET: usize = PARTITION_COUNT * STATE_BLOCK_LENGTH;
pub const INITIAL_TERM_ID_OFFSET: usize = ACTIVE_INDEX_OFFSET + 4;
pub const TERM_LENGTH_OFFSET: usize = ACTIVE_INDEX_OFFSET + 8;
pub const MTU_OFFSET: usize = ACTIVE_INDEX_OFFSET + 12;

pub const META_FILE_LENGTH: usize = 4096;

/// Partition status values.
pub const CLEAN: u32 = 0;
pub const NEEDS_CLEANING: u32 = 1;

pub fn check_term_length(term_length: u32) -> Result<(), String> {
    if !is_power_of_two(u64::from(term_length)) {
        return Err(format!("Term length must be a power of two, got {}", term_length));
    }
    if term_length < TERM_MIN_LENGTH || term_length > TERM_MAX_LENGTH {
        return Err(format!(
            "Term length must be between {} and {}, got {}",
            TERM_MIN_LENGTH, TERM_MAX_LENGTH, term_length
        ));
    }
    Ok(())
}

/// The raw tail packs the term id in the upper half and the tail offset in
/// the lower, so one fetch-and-add both claims space and pins the claim to a
/// term generation.
#[inline]
pub const fn pack_raw_tail(term_id: u32, tail: u32) -> u64 {
    ((term_id as u64) << 32) | tail as u64
}

#[inline]
pub const fn raw_tail_term_id(raw_tail: u64) -> u32 {
    (raw_tail >> 32) as u32
}

/// Tail offset clamped to the term length; racing claimants can push the raw
/// value past the end.
#[inline]
pub fn raw_tail_offset(raw_tail: u64, term_length: u32) -> u32 {
    (raw_tail as u32).min(term_length)
}

#[inline]
pub fn position_bits_to_shift(term_length: u32) -> u32 {
    term_length.trailing_zeros()
}

/// A position is a 64 bit monotonic byte count:
/// `(termId - initialTermId) * termLength + termOffset`.
#[inline]
pub fn compute_position(term_id: u32, term_offset: u32, bits: u32, initial_term_id: u32) -> i64 {
    ((i64::from(term_id.wrapping_sub(initial_term_id) as i32)) << bits) + i64::from(term_offset)
}

#[inline]
pub fn term_id_from_position(position: i64, bits: u32, initial_term_id: u32) -> u32 {
    initial_term_id.wrapping_add((position >> bits) as u32)
}

#[inline]
pub fn term_offset_from_position(position: i64, bits: u32) -> u32 {
    (position & ((1i64 << bits) - 1)) as u32
}

/// Partition index holding a given term.
#[inline]
pub fn index_by_term(initial_term_id: u32, term_id: u32) -> usize {
    (term_id.wrapping_sub(initial_term_id) as usize) % PARTITION_COUNT
}

/// Flyweight over the meta file: partition states plus the log descriptor
/// fields (active index, initial term id, geometry).
#[derive(Copy, Clone)]
pub struct LogMeta {
    buffer: AtomicBuffer,
}

impl LogMeta {
    #[inline]
    pub fn new(buffer: AtomicBuffer) -> LogMeta {
        LogMeta { buffer }
    }

    /// Lays down the initial state for a fresh log: partition 0 active at
    /// the initial term id, everything clean.
    pub fn init(&self, initial_term_id: u32, term_length: u32, mtu: u32) {
        self.buffer.put_u32(INITIAL_TERM_ID_OFFSET, initial_term_id);
        self.buffer.put_u32(TERM_LENGTH_OFFSET, term_length);
        self.buffer.put_u32(MTU_OFFSET, mtu);

        for index in 0..PARTITION_COUNT {
            self.set_status(index, CLEAN);
        }

        self.set_raw_tail(0, pack_raw_tail(initial_term_id, 0));
        self.buffer.put_u32_ordered(ACTIVE_INDEX_OFFSET, 0);
    }

    #[inline]
    fn state_offset(index: usize) -> usize {
        index * STATE_BLOCK_LENGTH
    }

    #[inline]
    pub fn active_index(&self) -> usize {
        self.buffer.get_u32_volatile(ACTIVE_INDEX_OFFSET) as usize
    }

    #[inline]
    pub fn cas_active_index(&self, expected: usize, update: usize) -> bool {
        self.buffer
            .compare_and_set_u32(ACTIVE_INDEX_OFFSET, expected as u32, update as u32)
    }

    #[inline]
    pub fn initial_term_id(&self) -> u32 {
        self.buffer.get_u32(INITIAL_TERM_ID_OFFSET)
    }

    #[inline]
    pub fn term_length(&self) -> u32 {
        self.buffer.get_u32(TERM_LENGTH_OFFSET)
    }

    #[inline]
    pub fn mtu(&self) -> u32 {
        self.buffer.get_u32(MTU_OFFSET)
    }

    #[inline]
    pub fn raw_tail(&self, index: usize) -> u64 {
        self.buffer
            .get_u64_volatile(Self::state_offset(index) + RAW_TAIL_OFFSET)
    }

    #[inline]
    pub fn set_raw_tail(&self, index: usize, raw_tail: u64) {
        self.buffer
            .put_u64_ordered(Self::state_offset(index) + RAW_TAIL_OFFSET, raw_tail)
    }

    #[inline]
    pub fn get_and_add_raw_tail(&self, index: usize, delta: u64) -> u64 {
        self.buffer
            .get_and_add_u64(Self::state_offset(index) + RAW_TAIL_OFFSET, delta)
    }

    #[inline]
    pub fn cas_raw_tail(&self, index: usize, expected: u64, update: u64) -> bool {
        self.buffer
            .compare_and_set_u64(Self::state_offset(index) + RAW_TAIL_OFFSET, expected, update)
    }

    #[inline]
    pub fn status(&self, index: usize) -> u32 {
        self.buffer
            .get_u32_volatile(Self::state_offset(index) + STATUS_OFFSET)
    }

    #[inline]
    pub fn set_status(&self, index: usize, status: u32) {
        self.buffer
            .put_u32_ordered(Self::state_offset(index) + STATUS_OFFSET, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_tail_packing() {
        let raw = pack_raw_tail(0x1234, 0x5678);
        assert_eq!(raw_tail_term_id(raw), 0x1234);
        assert_eq!(raw_tail_offset(raw, u32::max_value()), 0x5678);
    }

    #[test]
    fn test_raw_tail_offset_clamps_overflow() {
        let raw = pack_raw_tail(5, 70_000);
        assert_eq!(raw_tail_offset(raw, 65_536), 65_536);
    }

    #[test]
    fn test_position_round_trip() {
        let bits = position_bits_to_shift(65_536);
        let position = compute_position(12, 1024, bits, 10);

        assert_eq!(position, 2 * 65_536 + 1024);
        assert_eq!(term_id_from_position(position, bits, 10), 12);
        assert_eq!(term_offset_from_position(position, bits), 1024);
    }

    #[test]
    fn test_index_by_term_cycles() {
        assert_eq!(index_by_term(10, 10), 0);
        assert_eq!(index_by_term(10, 11), 1);
        assert_eq!(index_by_term(10, 12), 2);
        assert_eq!(index_by_term(10, 13), 0);
    }

    #[test]
    fn test_meta_init() {
        let mut backing = vec![0u8; META_FILE_LENGTH];
        let meta = LogMeta::new(AtomicBuffer::wrap(&mut backing));

        meta.init(100, 65_536, 4096);

        assert_eq!(meta.active_index(), 0);
        assert_eq!(meta.initial_term_id(), 100);
        assert_eq!(meta.term_length(), 65_536);
        assert_eq!(meta.mtu(), 4096);
        assert_eq!(meta.raw_tail(0), pack_raw_tail(100, 0));
        assert_eq!(meta.status(0), CLEAN);
        assert_eq!(meta.status(1), CLEAN);
        assert_eq!(meta.status(2), CLEAN);
    }

    #[test]
    fn test_check_term_length() {
        assert!(check_term_length(64 * 1024).is_ok());
        assert!(check_term_length(16 * 1024 * 1024).is_ok());
        assert!(check_term_length(1000).is_err());
        assert!(check_term_length(32 * 1024).is_err());
    }
}
