pub mod bits;
pub mod broadcast;
pub mod buffer;
pub mod counters;
pub mod idle;
pub mod logbuffer;
pub mod mapped;
pub mod ringbuffer;
pub mod spsc;
pub mod wheel;

pub use self::buffer::AtomicBuffer;
pub use self::mapped::MappedFile;
