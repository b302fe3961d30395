use std::io;

pub mod control;
pub mod frame;
pub mod uri;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Decode failures. Malformed input on the data plane is dropped with a
/// counter increment rather than propagated across agent boundaries.
#[derive(Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// The buffer ended before the advertised structure did.
    TooShort,
    /// Frame type field holds no known value.
    UnknownFrameType(u16),
    /// Version field holds an unsupported value.
    UnsupportedVersion(u8),
    /// A structurally invalid field, e.g. a length that contradicts the
    /// enclosing buffer.
    Malformed,
}

impl From<io::Error> for ProtocolError {
    #[inline]
    fn from(_: io::Error) -> Self {
        ProtocolError::TooShort
    }
}
