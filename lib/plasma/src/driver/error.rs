use ion::properties::PropertyError;
use std::fmt;
use std::io;

pub type DriverResult<T> = Result<T, DriverError>;

/// Startup-fatal failures. Anything that goes wrong after launch is handled
/// at an agent's duty-cycle perimeter and never surfaces here.
#[derive(Debug)]
pub enum DriverError {
    /// Directory creation, file mapping or socket binding failed.
    Io(io::Error),
    /// A property could not be parsed.
    Property(PropertyError),
    /// Structurally invalid configuration (bad sizes, bad combinations).
    Config(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriverError::Io(err) => write!(f, "io error: {}", err),
            DriverError::Property(err) => write!(f, "property error: {}", err),
            DriverError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<io::Error> for DriverError {
    #[inline]
    fn from(err: io::Error) -> Self {
        DriverError::Io(err)
    }
}

impl From<PropertyError> for DriverError {
    #[inline]
    fn from(err: PropertyError) -> Self {
        DriverError::Property(err)
    }
}
