use crate::concurrent::bits::{align, is_power_of_two, CACHE_LINE_LENGTH};
use crate::concurrent::AtomicBuffer;

/// Layout of the ring's trailer region. Each counter sits on its own pair of
/// cache lines so producers hammering the tail do not invalidate the
/// consumer's head line.
pub mod descriptor {
    use super::CACHE_LINE_LENGTH;

    pub const TAIL_COUNTER_OFFSET: usize = 0;
    pub const HEAD_CACHE_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 2;
    pub const HEAD_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 4;
    pub const CORRELATION_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 6;
    pub const CONSUMER_HEARTBEAT_OFFSET: usize = CACHE_LINE_LENGTH * 8;
    pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 10;
}

/// Record framing within the ring: a length word, a message type word, then
/// the payload. The length word is committed last with release semantics.
pub mod record {
    pub const LENGTH_OFFSET: usize = 0;
    pub const TYPE_OFFSET: usize = 4;
    pub const HEADER_LENGTH: usize = 8;
    pub const ALIGNMENT: usize = 8;

    /// Message type marking a record that only pads out the end of the ring.
    pub const PADDING_MSG_TYPE: i32 = -1;
}

/// Many-producer single-consumer ring carrying client commands to the driver
/// Conductor. Producers race a CAS on the tail to claim space; the consumer
/// dispatches committed records and zeroes them behind itself for the next
/// lap.
pub struct ManyToOneRingBuffer {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: usize,
    tail_index: usize,
    head_cache_index: usize,
    head_index: usize,
    correlation_index: usize,
    heartbeat_index: usize,
}

impl ManyToOneRingBuffer {
    /// Largest message the ring will accept.
    pub fn max_msg_length(&self) -> usize {
        self.capacity / 8
    }

    pub fn new(buffer: AtomicBuffer) -> ManyToOneRingBuffer {
        let capacity = buffer.capacity() - descriptor::TRAILER_LENGTH;

        if !is_power_of_two(capacity as u64) {
            panic!("Ring capacity must be a power of two, got {}", capacity);
        }

        ManyToOneRingBuffer {
            buffer,
            capacity,
            mask: capacity - 1,
            tail_index: capacity + descriptor::TAIL_COUNTER_OFFSET,
            head_cache_index: capacity + descriptor::HEAD_CACHE_COUNTER_OFFSET,
            head_index: capacity + descriptor::HEAD_COUNTER_OFFSET,
            correlation_index: capacity + descriptor::CORRELATION_COUNTER_OFFSET,
            heartbeat_index: capacity + descriptor::CONSUMER_HEARTBEAT_OFFSET,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Producer side: writes one message. Returns false when the ring has no
    /// room, in which case the caller backs off and retries.
    pub fn write(&self, msg_type: i32, src: &[u8]) -> bool {
        if src.len() > self.max_msg_length() {
            panic!(
                "Message length {} exceeds ring maximum {}",
                src.len(),
                self.max_msg_length()
            );
        }

        let record_length = src.len() + record::HEADER_LENGTH;
        let required = align(record_length, record::ALIGNMENT);

        let (record_index, padding) = match self.claim(required) {
            Some(claimed) => claimed,
            None => return false,
        };

        if padding > 0 {
            // Terminal padding record; the message itself wraps to the start.
            self.buffer
                .put_i32(record_index + record::TYPE_OFFSET, record::PADDING_MSG_TYPE);
            self.buffer.put_i32_ordered(record_index, padding as i32);
        }

        let index = if padding > 0 { 0 } else { record_index };
        self.buffer.put_i32(index + record::TYPE_OFFSET, msg_type);
        self.buffer.put_bytes(index + record::HEADER_LENGTH, src);
        self.buffer.put_i32_ordered(index, record_length as i32);

        true
    }

    /// Claims `required` bytes at the tail, plus terminal padding when the
    /// record would straddle the end of the ring. Returns the claimed index
    /// and the padding length.
    fn claim(&self, required: usize) -> Option<(usize, usize)> {
        loop {
            let head = self.buffer.get_i64_volatile(self.head_cache_index);
            let tail = self.buffer.get_i64_volatile(self.tail_index);

            let tail_idx = (tail as usize) & self.mask;
            let to_end = self.capacity - tail_idx;
            let padding = if required > to_end { to_end } else { 0 };
            let needed = (required + padding) as i64;

            if needed > self.capacity as i64 - (tail - head) {
                let fresh_head = self.buffer.get_i64_volatile(self.head_index);
                if needed > self.capacity as i64 - (tail - fresh_head) {
                    return None;
                }
                self.buffer.put_i64_ordered(self.head_cache_index, fresh_head);
                continue;
            }

            if self
                .buffer
                .compare_and_set_i64(self.tail_index, tail, tail + needed)
            {
                return Some((tail_idx, padding));
            }
        }
    }

    /// Consumer side: dispatches up to `message_limit` committed records and
    /// frees their space. The handler receives the message type and payload.
    pub fn read<F: FnMut(i32, &[u8])>(&self, mut handler: F, message_limit: usize) -> usize {
        let head = self.buffer.get_i64(self.head_index);
        let head_idx = (head as usize) & self.mask;

        let mut bytes_consumed = 0usize;
        let mut messages = 0usize;

        while messages < message_limit && bytes_consumed < self.capacity {
            let record_idx = (head_idx + bytes_consumed) & self.mask;
            let record_length = self.buffer.get_i32_volatile(record_idx);

            if record_length <= 0 {
                break;
            }

            bytes_consumed += align(record_length as usize, record::ALIGNMENT);

            let msg_type = self.buffer.get_i32(record_idx + record::TYPE_OFFSET);
            if msg_type == record::PADDING_MSG_TYPE {
                continue;
            }

            handler(
                msg_type,
                self.buffer.bytes(
                    record_idx + record::HEADER_LENGTH,
                    record_length as usize - record::HEADER_LENGTH,
                ),
            );
            messages += 1;
        }

        if bytes_consumed > 0 {
            self.free_region(head_idx, bytes_consumed);
            self.buffer
                .put_i64_ordered(self.head_index, head + bytes_consumed as i64);
        }

        messages
    }

    /// Zeroes a consumed region, handling the wrap at the end of the ring.
    fn free_region(&self, from_idx: usize, length: usize) {
        if from_idx + length <= self.capacity {
            self.buffer.set_memory(from_idx, length, 0);
        } else {
            let first = self.capacity - from_idx;
            self.buffer.set_memory(from_idx, first, 0);
            self.buffer.set_memory(0, length - first, 0);
        }
    }

    /// Draws the next correlation id from the shared counter. Unique across
    /// every producer mapping this ring.
    #[inline]
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer.get_and_add_i64(self.correlation_index, 1)
    }

    /// Consumer heartbeat, stamped by the driver Conductor each duty cycle
    /// and watched by clients for driver liveness.
    #[inline]
    pub fn consumer_heartbeat_time(&self) -> i64 {
        self.buffer.get_i64_volatile(self.heartbeat_index)
    }

    #[inline]
    pub fn update_consumer_heartbeat_time(&self, now_ms: i64) {
        self.buffer.put_i64_ordered(self.heartbeat_index, now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> (Vec<u8>, ManyToOneRingBuffer) {
        let mut backing = vec![0u8; capacity + descriptor::TRAILER_LENGTH];
        let buffer = AtomicBuffer::wrap(&mut backing);
        (backing, ManyToOneRingBuffer::new(buffer))
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_backing, ring) = ring(1024);

        assert!(ring.write(7, b"hello"));

        let mut received = Vec::new();
        let count = ring.read(|msg_type, payload| received.push((msg_type, payload.to_vec())), 10);

        assert_eq!(count, 1);
        assert_eq!(received, vec![(7, b"hello".to_vec())]);
    }

    #[test]
    fn test_read_frees_space() {
        let (_backing, ring) = ring(1024);

        // Cycle through several laps worth of records.
        for i in 0..1000i32 {
            assert!(ring.write(1, &i.to_be_bytes()), "write {} rejected", i);
            let consumed = ring.read(|_, _| {}, 10);
            assert_eq!(consumed, 1);
        }
    }

    #[test]
    fn test_fills_up_without_consumer() {
        let (_backing, ring) = ring(1024);

        let payload = [0u8; 56];
        let mut accepted = 0;
        while ring.write(1, &payload) {
            accepted += 1;
            assert!(accepted < 100, "ring never filled");
        }

        // 64 byte records in a 1 KiB ring.
        assert_eq!(accepted, 16);
    }

    #[test]
    fn test_wrap_inserts_padding() {
        let (_backing, ring) = ring(1024);

        // Offset the tail so a later record straddles the end.
        let chunk = [0u8; 88]; // 96 byte records
        for _ in 0..10 {
            assert!(ring.write(1, &chunk));
            ring.read(|_, _| {}, 1);
        }

        // Tail sits at 960; a 96 byte record needs terminal padding.
        assert!(ring.write(2, &chunk));

        let mut types = Vec::new();
        ring.read(|msg_type, payload| types.push((msg_type, payload.len())), 10);
        assert_eq!(types, vec![(2, 88)]);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let (_backing, ring) = ring(1024);

        let first = ring.next_correlation_id();
        let second = ring.next_correlation_id();
        assert_ne!(first, second);
    }

    #[test]
    fn test_consumer_heartbeat() {
        let (_backing, ring) = ring(1024);

        ring.update_consumer_heartbeat_time(123_456);
        assert_eq!(ring.consumer_heartbeat_time(), 123_456);
    }
}
