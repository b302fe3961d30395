use crate::concurrent::AtomicBuffer;

/// Values file layout: one cache-line sized slot per counter id.
pub const COUNTER_LENGTH: usize = 64;

/// Labels file layout: a fixed-size record per counter id holding a length
/// prefixed UTF-8 label. A negative length marks a freed slot.
pub const LABEL_LENGTH: usize = 128;
pub const MAX_LABEL_LENGTH: usize = LABEL_LENGTH - 4;

const UNREGISTERED: i32 = -1;

/// Allocates position and diagnostic counters out of the shared labels and
/// values files. Slots are recycled through a free list once released, the
/// same discipline the driver applies to every other slab.
pub struct CountersManager {
    labels: AtomicBuffer,
    values: AtomicBuffer,
    free_list: Vec<usize>,
    high_water: usize,
    capacity: usize,
}

impl CountersManager {
    pub fn new(labels: AtomicBuffer, values: AtomicBuffer) -> CountersManager {
        let capacity = (labels.capacity() / LABEL_LENGTH).min(values.capacity() / COUNTER_LENGTH);

        CountersManager {
            labels,
            values,
            free_list: Vec::new(),
            high_water: 0,
            capacity,
        }
    }

    /// Allocates a counter slot and writes its label. Returns `None` when the
    /// counter files are exhausted.
    pub fn allocate(&mut self, label: &str) -> Option<usize> {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                if self.high_water == self.capacity {
                    return None;
                }
                let id = self.high_water;
                self.high_water += 1;
                id
            }
        };

        let label_bytes = label.as_bytes();
        let length = label_bytes.len().min(MAX_LABEL_LENGTH);
        let offset = id * LABEL_LENGTH;

        self.labels.put_bytes(offset + 4, &label_bytes[..length]);
        self.labels.put_i32_ordered(offset, length as i32);
        self.values.put_i64_ordered(id * COUNTER_LENGTH, 0);

        Some(id)
    }

    /// Releases a counter slot for reuse. The value is reset and the label
    /// marked unregistered.
    pub fn free(&mut self, id: usize) {
        let offset = id * LABEL_LENGTH;
        self.labels.put_i32_ordered(offset, UNREGISTERED);
        self.values.put_i64_ordered(id * COUNTER_LENGTH, 0);
        self.free_list.push(id);
    }

    /// Visits every live counter with its id and label.
    pub fn for_each<F: FnMut(usize, &str)>(&self, mut handler: F) {
        for id in 0..self.high_water {
            let offset = id * LABEL_LENGTH;
            let length = self.labels.get_i32_volatile(offset);

            if length >= 0 {
                let bytes = self.labels.bytes(offset + 4, length as usize);
                if let Ok(label) = std::str::from_utf8(bytes) {
                    handler(id, label);
                }
            }
        }
    }

    /// A handle onto the value slot for `id`.
    #[inline]
    pub fn position(&self, id: usize) -> Position {
        Position {
            buffer: self.values,
            offset: id * COUNTER_LENGTH,
            id,
        }
    }
}

/// A 64 bit position indicator backed by one slot of the values file.
/// Writers publish with release semantics; readers observe with acquire, so
/// positions can safely coordinate progress across processes.
#[derive(Copy, Clone)]
pub struct Position {
    buffer: AtomicBuffer,
    offset: usize,
    id: usize,
}

impl Position {
    /// Handle onto an arbitrary slot of a mapped values file; used by clients
    /// that learn counter ids from driver responses.
    #[inline]
    pub fn attach(values: AtomicBuffer, id: usize) -> Position {
        Position {
            buffer: values,
            offset: id * COUNTER_LENGTH,
            id,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.buffer.get_i64_volatile(self.offset)
    }

    #[inline]
    pub fn set_ordered(&self, value: i64) {
        self.buffer.put_i64_ordered(self.offset, value)
    }

    #[inline]
    pub fn add_ordered(&self, delta: i64) {
        self.buffer.get_and_add_i64(self.offset, delta);
    }
}
