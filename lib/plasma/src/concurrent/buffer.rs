use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Flyweight view over a raw byte region shared between threads or processes.
/// Plain accessors compile to ordinary loads and stores; `_volatile` reads
/// carry acquire semantics and `_ordered` writes carry release semantics, the
/// pairing every producer/consumer protocol in this crate is built on.
///
/// The backing memory is owned elsewhere (a `MappedFile` or a test vector)
/// and must outlive every view. Word accessors require naturally aligned
/// indices.
#[derive(Copy, Clone)]
pub struct AtomicBuffer {
    ptr: *mut u8,
    capacity: usize,
}

unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

impl AtomicBuffer {
    #[inline]
    pub fn new(ptr: *mut u8, capacity: usize) -> AtomicBuffer {
        AtomicBuffer { ptr, capacity }
    }

    /// Views a mutable slice as an atomic buffer. The caller keeps the slice
    /// alive for as long as the view is used.
    #[inline]
    pub fn wrap(slice: &mut [u8]) -> AtomicBuffer {
        AtomicBuffer {
            ptr: slice.as_mut_ptr(),
            capacity: slice.len(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A sub-range of this buffer as its own view.
    #[inline]
    pub fn view(&self, offset: usize, length: usize) -> AtomicBuffer {
        self.check(offset, length);
        AtomicBuffer {
            ptr: unsafe { self.ptr.add(offset) },
            capacity: length,
        }
    }

    #[inline]
    fn check(&self, index: usize, length: usize) {
        if index + length > self.capacity {
            panic!(
                "Buffer access out of bounds: index {} length {} capacity {}",
                index, length, self.capacity
            );
        }
    }

    #[inline]
    fn atomic_u32(&self, index: usize) -> &AtomicU32 {
        self.check(index, 4);
        debug_assert!(index % 4 == 0, "Unaligned u32 access");
        unsafe { &*(self.ptr.add(index) as *const AtomicU32) }
    }

    #[inline]
    fn atomic_u64(&self, index: usize) -> &AtomicU64 {
        self.check(index, 8);
        debug_assert!(index % 8 == 0, "Unaligned u64 access");
        unsafe { &*(self.ptr.add(index) as *const AtomicU64) }
    }

    #[inline]
    fn atomic_i64(&self, index: usize) -> &AtomicI64 {
        self.check(index, 8);
        debug_assert!(index % 8 == 0, "Unaligned i64 access");
        unsafe { &*(self.ptr.add(index) as *const AtomicI64) }
    }

    #[inline]
    pub fn get_u32(&self, index: usize) -> u32 {
        self.atomic_u32(index).load(Ordering::Relaxed)
    }

    #[inline]
    pub fn put_u32(&self, index: usize, value: u32) {
        self.atomic_u32(index).store(value, Ordering::Relaxed)
    }

    #[inline]
    pub fn get_u32_volatile(&self, index: usize) -> u32 {
        self.atomic_u32(index).load(Ordering::Acquire)
    }

    #[inline]
    pub fn put_u32_ordered(&self, index: usize, value: u32) {
        self.atomic_u32(index).store(value, Ordering::Release)
    }

    #[inline]
    pub fn compare_and_set_u32(&self, index: usize, expected: u32, update: u32) -> bool {
        self.atomic_u32(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn get_u64(&self, index: usize) -> u64 {
        self.atomic_u64(index).load(Ordering::Relaxed)
    }

    #[inline]
    pub fn put_u64(&self, index: usize, value: u64) {
        self.atomic_u64(index).store(value, Ordering::Relaxed)
    }

    #[inline]
    pub fn get_u64_volatile(&self, index: usize) -> u64 {
        self.atomic_u64(index).load(Ordering::Acquire)
    }

    #[inline]
    pub fn put_u64_ordered(&self, index: usize, value: u64) {
        self.atomic_u64(index).store(value, Ordering::Release)
    }

    #[inline]
    pub fn get_and_add_u64(&self, index: usize, delta: u64) -> u64 {
        self.atomic_u64(index).fetch_add(delta, Ordering::AcqRel)
    }

    #[inline]
    pub fn compare_and_set_u64(&self, index: usize, expected: u64, update: u64) -> bool {
        self.atomic_u64(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn get_i64(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Relaxed)
    }

    #[inline]
    pub fn put_i64(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value, Ordering::Relaxed)
    }

    #[inline]
    pub fn get_i64_volatile(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Acquire)
    }

    #[inline]
    pub fn put_i64_ordered(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value, Ordering::Release)
    }

    #[inline]
    pub fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        self.atomic_i64(index).fetch_add(delta, Ordering::AcqRel)
    }

    #[inline]
    pub fn compare_and_set_i64(&self, index: usize, expected: i64, update: i64) -> bool {
        self.atomic_i64(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn get_i32(&self, index: usize) -> i32 {
        self.get_u32(index) as i32
    }

    #[inline]
    pub fn put_i32(&self, index: usize, value: i32) {
        self.put_u32(index, value as u32)
    }

    #[inline]
    pub fn get_i32_volatile(&self, index: usize) -> i32 {
        self.get_u32_volatile(index) as i32
    }

    #[inline]
    pub fn put_i32_ordered(&self, index: usize, value: i32) {
        self.put_u32_ordered(index, value as u32)
    }

    #[inline]
    pub fn put_bytes(&self, index: usize, src: &[u8]) {
        self.check(index, src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(index), src.len()) }
    }

    #[inline]
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        self.check(index, dst.len());
        unsafe { ptr::copy_nonoverlapping(self.ptr.add(index), dst.as_mut_ptr(), dst.len()) }
    }

    /// Fills a range with a byte value.
    #[inline]
    pub fn set_memory(&self, index: usize, length: usize, value: u8) {
        self.check(index, length);
        unsafe { ptr::write_bytes(self.ptr.add(index), value, length) }
    }

    /// Borrows a range as a plain byte slice. Only valid for regions the
    /// caller knows are not being concurrently mutated (committed frames,
    /// exclusively claimed records).
    #[inline]
    pub fn bytes(&self, index: usize, length: usize) -> &[u8] {
        self.check(index, length);
        unsafe { std::slice::from_raw_parts(self.ptr.add(index), length) }
    }

    /// Borrows a range as a mutable byte slice under the same discipline as
    /// `bytes`.
    #[inline]
    pub fn bytes_mut(&self, index: usize, length: usize) -> &mut [u8] {
        self.check(index, length);
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(index), length) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_round_trip() {
        let mut backing = vec![0u8; 64];
        let buffer = AtomicBuffer::wrap(&mut backing);

        buffer.put_u32(0, 0xdead_beef);
        assert_eq!(buffer.get_u32(0), 0xdead_beef);

        buffer.put_i64(8, -42);
        assert_eq!(buffer.get_i64(8), -42);
    }

    #[test]
    fn test_ordered_round_trip() {
        let mut backing = vec![0u8; 64];
        let buffer = AtomicBuffer::wrap(&mut backing);

        buffer.put_u64_ordered(16, 7);
        assert_eq!(buffer.get_u64_volatile(16), 7);
    }

    #[test]
    fn test_get_and_add() {
        let mut backing = vec![0u8; 64];
        let buffer = AtomicBuffer::wrap(&mut backing);

        assert_eq!(buffer.get_and_add_u64(0, 10), 0);
        assert_eq!(buffer.get_and_add_u64(0, 5), 10);
        assert_eq!(buffer.get_u64(0), 15);
    }

    #[test]
    fn test_compare_and_set() {
        let mut backing = vec![0u8; 64];
        let buffer = AtomicBuffer::wrap(&mut backing);

        buffer.put_u32(0, 1);
        assert!(buffer.compare_and_set_u32(0, 1, 2));
        assert!(!buffer.compare_and_set_u32(0, 1, 3));
        assert_eq!(buffer.get_u32(0), 2);
    }

    #[test]
    fn test_byte_copies() {
        let mut backing = vec![0u8; 64];
        let buffer = AtomicBuffer::wrap(&mut backing);

        buffer.put_bytes(4, b"plasma");
        let mut out = [0u8; 6];
        buffer.get_bytes(4, &mut out);
        assert_eq!(&out, b"plasma");
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_panics() {
        let mut backing = vec![0u8; 8];
        let buffer = AtomicBuffer::wrap(&mut backing);
        buffer.get_u64(4);
    }

    #[test]
    fn test_view() {
        let mut backing = vec![0u8; 64];
        let buffer = AtomicBuffer::wrap(&mut backing);

        let view = buffer.view(32, 32);
        view.put_u32(0, 9);
        assert_eq!(buffer.get_u32(32), 9);
    }
}
