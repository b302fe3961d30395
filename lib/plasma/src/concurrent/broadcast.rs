use crate::concurrent::bits::{align, is_power_of_two, CACHE_LINE_LENGTH};
use crate::concurrent::AtomicBuffer;

/// Trailer layout for the broadcast buffer. The tail-intent counter is
/// advanced before a record is written and the tail counter after, so a
/// receiver can detect when the transmitter has overwritten the region it was
/// reading.
pub mod descriptor {
    use super::CACHE_LINE_LENGTH;

    pub const TAIL_INTENT_COUNTER_OFFSET: usize = 0;
    pub const TAIL_COUNTER_OFFSET: usize = 8;
    pub const LATEST_COUNTER_OFFSET: usize = 16;
    pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 2;
}

pub mod record {
    pub const LENGTH_OFFSET: usize = 0;
    pub const TYPE_OFFSET: usize = 4;
    pub const HEADER_LENGTH: usize = 8;
    pub const ALIGNMENT: usize = 8;

    pub const PADDING_MSG_TYPE: i32 = -1;
}

/// Single-producer side of the to-clients broadcast. Transmission never
/// blocks on consumers: a receiver that falls more than a buffer length
/// behind is lapped and loses records.
pub struct BroadcastTransmitter {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: usize,
    tail_intent_index: usize,
    tail_index: usize,
    latest_index: usize,
}

impl BroadcastTransmitter {
    pub fn new(buffer: AtomicBuffer) -> BroadcastTransmitter {
        let capacity = buffer.capacity() - descriptor::TRAILER_LENGTH;

        if !is_power_of_two(capacity as u64) {
            panic!("Broadcast capacity must be a power of two, got {}", capacity);
        }

        BroadcastTransmitter {
            buffer,
            capacity,
            mask: capacity - 1,
            tail_intent_index: capacity + descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_index: capacity + descriptor::TAIL_COUNTER_OFFSET,
            latest_index: capacity + descriptor::LATEST_COUNTER_OFFSET,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_msg_length(&self) -> usize {
        self.capacity / 8
    }

    pub fn transmit(&self, msg_type: i32, src: &[u8]) {
        if src.len() > self.max_msg_length() {
            panic!(
                "Message length {} exceeds broadcast maximum {}",
                src.len(),
                self.max_msg_length()
            );
        }

        let record_length = src.len() + record::HEADER_LENGTH;
        let aligned = align(record_length, record::ALIGNMENT);

        let tail = self.buffer.get_i64(self.tail_index);
        let mut record_idx = (tail as usize) & self.mask;
        let to_end = self.capacity - record_idx;

        let mut new_tail = tail + aligned as i64;

        if aligned > to_end {
            // Pad out the end of the buffer; the record wraps to the start.
            new_tail += to_end as i64;
            self.buffer.put_i64_ordered(self.tail_intent_index, new_tail);

            self.buffer
                .put_i32(record_idx + record::TYPE_OFFSET, record::PADDING_MSG_TYPE);
            self.buffer.put_i32(record_idx, to_end as i32);
            record_idx = 0;
        } else {
            self.buffer.put_i64_ordered(self.tail_intent_index, new_tail);
        }

        self.buffer.put_i32(record_idx, record_length as i32);
        self.buffer.put_i32(record_idx + record::TYPE_OFFSET, msg_type);
        self.buffer.put_bytes(record_idx + record::HEADER_LENGTH, src);

        self.buffer.put_i64(self.latest_index, tail);
        self.buffer.put_i64_ordered(self.tail_index, new_tail);
    }
}

/// One consumer's cursor over the broadcast stream. Polled via
/// `receive_next`; after copying a message out, `validate` confirms the
/// transmitter did not lap the cursor mid-read.
pub struct BroadcastReceiver {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: usize,
    tail_intent_index: usize,
    tail_index: usize,
    latest_index: usize,
    record_offset: usize,
    cursor: i64,
    next_record: i64,
    lapped_count: u64,
}

impl BroadcastReceiver {
    pub fn new(buffer: AtomicBuffer) -> BroadcastReceiver {
        let capacity = buffer.capacity() - descriptor::TRAILER_LENGTH;

        if !is_power_of_two(capacity as u64) {
            panic!("Broadcast capacity must be a power of two, got {}", capacity);
        }

        let latest_index = capacity + descriptor::LATEST_COUNTER_OFFSET;
        let cursor = buffer.get_i64(latest_index);

        BroadcastReceiver {
            buffer,
            capacity,
            mask: capacity - 1,
            tail_intent_index: capacity + descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_index: capacity + descriptor::TAIL_COUNTER_OFFSET,
            latest_index,
            record_offset: (cursor as usize) & (capacity - 1),
            cursor,
            next_record: cursor,
            lapped_count: 0,
        }
    }

    /// Number of times the transmitter has lapped this receiver. Each lap is
    /// at least a buffer's worth of lost records.
    #[inline]
    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Advances to the next record if one is available. On a detected lap the
    /// cursor resets to the latest record and the lap is counted.
    pub fn receive_next(&mut self) -> bool {
        let tail = self.buffer.get_i64_volatile(self.tail_index);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        if !self.validate_at(cursor) {
            self.lapped_count += 1;
            cursor = self.buffer.get_i64(self.latest_index);
        }

        let mut record_offset = (cursor as usize) & self.mask;
        let mut length = self.buffer.get_i32(record_offset);

        if self.buffer.get_i32(record_offset + record::TYPE_OFFSET) == record::PADDING_MSG_TYPE {
            cursor += length as i64;
            record_offset = 0;
            length = self.buffer.get_i32(0);
        }

        self.cursor = cursor;
        self.next_record = cursor + align(length as usize, record::ALIGNMENT) as i64;
        self.record_offset = record_offset;

        true
    }

    #[inline]
    pub fn msg_type(&self) -> i32 {
        self.buffer.get_i32(self.record_offset + record::TYPE_OFFSET)
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.buffer.get_i32(self.record_offset) as usize - record::HEADER_LENGTH
    }

    #[inline]
    pub fn copy_msg(&self, dst: &mut [u8]) {
        self.buffer
            .get_bytes(self.record_offset + record::HEADER_LENGTH, dst);
    }

    /// True while the record most recently returned by `receive_next` has not
    /// been overwritten by the transmitter.
    #[inline]
    pub fn validate(&self) -> bool {
        self.validate_at(self.cursor)
    }

    #[inline]
    fn validate_at(&self, cursor: i64) -> bool {
        let tail_intent = self.buffer.get_i64_volatile(self.tail_intent_index);
        cursor + self.capacity as i64 > tail_intent
    }
}

/// Receiver wrapper that copies each message into a scratch buffer before
/// dispatch, re-validating afterwards so a lapped read is dropped instead of
/// dispatched torn.
pub struct CopyBroadcastReceiver {
    receiver: BroadcastReceiver,
    scratch: Vec<u8>,
}

impl CopyBroadcastReceiver {
    pub fn new(receiver: BroadcastReceiver) -> CopyBroadcastReceiver {
        CopyBroadcastReceiver {
            receiver,
            scratch: vec![0u8; 4096],
        }
    }

    /// Dispatches at most one message. Returns the number dispatched.
    pub fn receive<F: FnMut(i32, &[u8])>(&mut self, mut handler: F) -> usize {
        if !self.receiver.receive_next() {
            return 0;
        }

        let length = self.receiver.length();
        if length > self.scratch.len() {
            self.scratch.resize(length, 0);
        }

        let msg_type = self.receiver.msg_type();
        self.receiver.copy_msg(&mut self.scratch[..length]);

        if !self.receiver.validate() {
            // Lapped mid-copy; the message is torn, drop it.
            return 0;
        }

        handler(msg_type, &self.scratch[..length]);
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(capacity: usize) -> (Vec<u8>, BroadcastTransmitter, BroadcastReceiver) {
        let mut backing = vec![0u8; capacity + descriptor::TRAILER_LENGTH];
        let buffer = AtomicBuffer::wrap(&mut backing);
        (
            backing,
            BroadcastTransmitter::new(buffer),
            BroadcastReceiver::new(buffer),
        )
    }

    #[test]
    fn test_transmit_receive() {
        let (_backing, tx, mut rx) = pair(1024);

        tx.transmit(5, b"event");

        assert!(rx.receive_next());
        assert_eq!(rx.msg_type(), 5);

        let mut msg = vec![0u8; rx.length()];
        rx.copy_msg(&mut msg);
        assert_eq!(&msg, b"event");
        assert!(rx.validate());
        assert!(!rx.receive_next());
    }

    #[test]
    fn test_receives_in_order() {
        let (_backing, tx, mut rx) = pair(1024);

        for i in 0..10u32 {
            tx.transmit(1, &i.to_be_bytes());
        }

        for i in 0..10u32 {
            assert!(rx.receive_next());
            let mut msg = [0u8; 4];
            rx.copy_msg(&mut msg);
            assert_eq!(u32::from_be_bytes(msg), i);
        }
    }

    #[test]
    fn test_wraps_with_padding() {
        let (_backing, tx, mut rx) = pair(1024);

        // 96 byte records force a terminal pad after ten transmissions.
        let payload = [7u8; 88];
        for _ in 0..11 {
            tx.transmit(2, &payload);
        }

        let mut received = 0;
        while rx.receive_next() {
            assert_eq!(rx.msg_type(), 2);
            received += 1;
        }

        // The receiver joined from the latest counter at construction time,
        // so everything transmitted after that is visible.
        assert!(received > 0);
    }

    #[test]
    fn test_lapped_receiver_resets() {
        let (_backing, tx, mut rx) = pair(1024);

        tx.transmit(1, b"first");
        assert!(rx.receive_next());

        // Push multiple laps past the receiver's cursor.
        let payload = [0u8; 120];
        for _ in 0..32 {
            tx.transmit(2, &payload);
        }

        assert!(rx.receive_next());
        assert_eq!(rx.lapped_count(), 1);
        assert_eq!(rx.msg_type(), 2);
    }

    #[test]
    fn test_copy_receiver_dispatches() {
        let mut backing = vec![0u8; 1024 + descriptor::TRAILER_LENGTH];
        let buffer = AtomicBuffer::wrap(&mut backing);
        let tx = BroadcastTransmitter::new(buffer);
        let mut rx = CopyBroadcastReceiver::new(BroadcastReceiver::new(buffer));

        tx.transmit(9, b"copied");

        let mut seen = Vec::new();
        let count = rx.receive(|msg_type, payload| seen.push((msg_type, payload.to_vec())));

        assert_eq!(count, 1);
        assert_eq!(seen, vec![(9, b"copied".to_vec())]);
    }
}
