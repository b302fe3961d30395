pub mod conductor;
pub mod proxy;

use crate::protocol::control::ErrorResponseMessage;
use std::fmt;

pub type ClientResult<T> = Result<T, ClientError>;

/// Client-side failures talking to the driver.
#[derive(Debug)]
pub enum ClientError {
    /// The driver's heartbeat went stale or a response never arrived within
    /// the driver timeout.
    DriverTimeout,
    /// The to-driver ring is full; retry after backing off.
    BackPressure,
    /// The driver rejected the request.
    Rejected(ErrorResponseMessage),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClientError::DriverTimeout => write!(f, "media driver is unresponsive"),
            ClientError::BackPressure => write!(f, "to-driver ring is full"),
            ClientError::Rejected(response) => {
                write!(f, "driver rejected request: {:?} {}", response.code, response.message)
            }
        }
    }
}

impl std::error::Error for ClientError {}
