use crate::protocol::{ProtocolError, ProtocolResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Message types on the to-driver command ring.
pub mod command {
    pub const ADD_PUBLICATION: i32 = 0x01;
    pub const REMOVE_PUBLICATION: i32 = 0x02;
    pub const ADD_SUBSCRIPTION: i32 = 0x04;
    pub const REMOVE_SUBSCRIPTION: i32 = 0x05;
    pub const CLIENT_KEEPALIVE: i32 = 0x0b;
}

/// Message types on the to-clients broadcast.
pub mod response {
    pub const ON_NEW_PUBLICATION: i32 = 0x11;
    pub const ON_NEW_CONNECTED_SUBSCRIPTION: i32 = 0x12;
    pub const ON_OPERATION_SUCCEEDED: i32 = 0x13;
    pub const ON_ERROR_RESPONSE: i32 = 0x14;
    pub const ON_INACTIVE_CONNECTION: i32 = 0x15;
}

/// Error codes carried by `ERROR_RESPONSE`, always paired with the offending
/// correlation id so the client can route the failure to its pending request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum ErrorCode {
    GenericError = 0x00,
    PublicationChannelAlreadyExists = 0x01,
    InvalidDestinationInPublication = 0x02,
    PublicationChannelUnknown = 0x03,
}

impl ErrorCode {
    #[inline]
    pub fn from_u32(value: u32) -> ErrorCode {
        match value {
            0x01 => ErrorCode::PublicationChannelAlreadyExists,
            0x02 => ErrorCode::InvalidDestinationInPublication,
            0x03 => ErrorCode::PublicationChannelUnknown,
            _ => ErrorCode::GenericError,
        }
    }
}

fn write_string(dst: &mut Vec<u8>, value: &str) {
    dst.write_u32::<BigEndian>(value.len() as u32).expect("vec write");
    dst.extend_from_slice(value.as_bytes());
}

fn read_string(buffer: &mut &[u8]) -> ProtocolResult<String> {
    let length = buffer.read_u32::<BigEndian>()? as usize;

    if buffer.len() < length {
        return Err(ProtocolError::TooShort);
    }

    let (head, tail) = buffer.split_at(length);
    let value = std::str::from_utf8(head).map_err(|_| ProtocolError::Malformed)?;
    *buffer = tail;

    Ok(value.to_string())
}

/// ADD_PUBLICATION / ADD_SUBSCRIPTION: a channel and stream registration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChannelMessage {
    pub client_id: i64,
    pub correlation_id: i64,
    pub stream_id: u32,
    pub channel: String,
}

impl ChannelMessage {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<ChannelMessage> {
        Ok(ChannelMessage {
            client_id: buffer.read_i64::<BigEndian>()?,
            correlation_id: buffer.read_i64::<BigEndian>()?,
            stream_id: buffer.read_u32::<BigEndian>()?,
            channel: read_string(&mut buffer)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(24 + self.channel.len());
        dst.write_i64::<BigEndian>(self.client_id).expect("vec write");
        dst.write_i64::<BigEndian>(self.correlation_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.stream_id).expect("vec write");
        write_string(&mut dst, &self.channel);
        dst
    }
}

/// REMOVE_PUBLICATION / REMOVE_SUBSCRIPTION: releases an earlier registration
/// by its registration (original correlation) id.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RemoveMessage {
    pub client_id: i64,
    pub correlation_id: i64,
    pub registration_id: i64,
}

impl RemoveMessage {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<RemoveMessage> {
        Ok(RemoveMessage {
            client_id: buffer.read_i64::<BigEndian>()?,
            correlation_id: buffer.read_i64::<BigEndian>()?,
            registration_id: buffer.read_i64::<BigEndian>()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(24);
        dst.write_i64::<BigEndian>(self.client_id).expect("vec write");
        dst.write_i64::<BigEndian>(self.correlation_id).expect("vec write");
        dst.write_i64::<BigEndian>(self.registration_id).expect("vec write");
        dst
    }
}

/// CLIENT_KEEPALIVE and any other correlation-only message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CorrelatedMessage {
    pub client_id: i64,
    pub correlation_id: i64,
}

impl CorrelatedMessage {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<CorrelatedMessage> {
        Ok(CorrelatedMessage {
            client_id: buffer.read_i64::<BigEndian>()?,
            correlation_id: buffer.read_i64::<BigEndian>()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(16);
        dst.write_i64::<BigEndian>(self.client_id).expect("vec write");
        dst.write_i64::<BigEndian>(self.correlation_id).expect("vec write");
        dst
    }
}

/// ON_NEW_PUBLICATION: the driver's answer to ADD_PUBLICATION, carrying
/// everything a client needs to map the log and respect flow control.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewPublicationMessage {
    pub correlation_id: i64,
    pub session_id: u32,
    pub stream_id: u32,
    pub initial_term_id: u32,
    pub limit_counter_id: i32,
    pub log_dir: String,
}

impl NewPublicationMessage {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<NewPublicationMessage> {
        Ok(NewPublicationMessage {
            correlation_id: buffer.read_i64::<BigEndian>()?,
            session_id: buffer.read_u32::<BigEndian>()?,
            stream_id: buffer.read_u32::<BigEndian>()?,
            initial_term_id: buffer.read_u32::<BigEndian>()?,
            limit_counter_id: buffer.read_i32::<BigEndian>()?,
            log_dir: read_string(&mut buffer)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(28 + self.log_dir.len());
        dst.write_i64::<BigEndian>(self.correlation_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.session_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.stream_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.initial_term_id).expect("vec write");
        dst.write_i32::<BigEndian>(self.limit_counter_id).expect("vec write");
        write_string(&mut dst, &self.log_dir);
        dst
    }
}

/// ON_NEW_CONNECTED_SUBSCRIPTION: a new image is readable. Fanned out to all
/// listeners as a connection event as well as correlated to the subscriber.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewConnectionMessage {
    pub correlation_id: i64,
    pub session_id: u32,
    pub stream_id: u32,
    pub initial_term_id: u32,
    pub subscriber_position_id: i32,
    pub log_dir: String,
    pub source: String,
}

impl NewConnectionMessage {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<NewConnectionMessage> {
        Ok(NewConnectionMessage {
            correlation_id: buffer.read_i64::<BigEndian>()?,
            session_id: buffer.read_u32::<BigEndian>()?,
            stream_id: buffer.read_u32::<BigEndian>()?,
            initial_term_id: buffer.read_u32::<BigEndian>()?,
            subscriber_position_id: buffer.read_i32::<BigEndian>()?,
            log_dir: read_string(&mut buffer)?,
            source: read_string(&mut buffer)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(36 + self.log_dir.len() + self.source.len());
        dst.write_i64::<BigEndian>(self.correlation_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.session_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.stream_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.initial_term_id).expect("vec write");
        dst.write_i32::<BigEndian>(self.subscriber_position_id).expect("vec write");
        write_string(&mut dst, &self.log_dir);
        write_string(&mut dst, &self.source);
        dst
    }
}

/// ON_INACTIVE_CONNECTION: an image timed out or its source went away.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InactiveConnectionMessage {
    pub correlation_id: i64,
    pub session_id: u32,
    pub stream_id: u32,
}

impl InactiveConnectionMessage {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<InactiveConnectionMessage> {
        Ok(InactiveConnectionMessage {
            correlation_id: buffer.read_i64::<BigEndian>()?,
            session_id: buffer.read_u32::<BigEndian>()?,
            stream_id: buffer.read_u32::<BigEndian>()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(16);
        dst.write_i64::<BigEndian>(self.correlation_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.session_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.stream_id).expect("vec write");
        dst
    }
}

/// ON_OPERATION_SUCCEEDED: positive acknowledgement with no payload beyond
/// the correlation id.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OperationSucceededMessage {
    pub correlation_id: i64,
}

impl OperationSucceededMessage {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<OperationSucceededMessage> {
        Ok(OperationSucceededMessage {
            correlation_id: buffer.read_i64::<BigEndian>()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(8);
        dst.write_i64::<BigEndian>(self.correlation_id).expect("vec write");
        dst
    }
}

/// ON_ERROR_RESPONSE: failure answer for exactly one request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ErrorResponseMessage {
    pub offending_correlation_id: i64,
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorResponseMessage {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<ErrorResponseMessage> {
        Ok(ErrorResponseMessage {
            offending_correlation_id: buffer.read_i64::<BigEndian>()?,
            code: ErrorCode::from_u32(buffer.read_u32::<BigEndian>()?),
            message: read_string(&mut buffer)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(16 + self.message.len());
        dst.write_i64::<BigEndian>(self.offending_correlation_id).expect("vec write");
        dst.write_u32::<BigEndian>(self.code as u32).expect("vec write");
        write_string(&mut dst, &self.message);
        dst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_message_round_trip() {
        let msg = ChannelMessage {
            client_id: 9,
            correlation_id: 42,
            stream_id: 10,
            channel: "udp://localhost:40123".to_string(),
        };

        assert_eq!(ChannelMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_remove_message_round_trip() {
        let msg = RemoveMessage {
            client_id: 9,
            correlation_id: 43,
            registration_id: 42,
        };

        assert_eq!(RemoveMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_new_publication_round_trip() {
        let msg = NewPublicationMessage {
            correlation_id: 42,
            session_id: 0x01020304,
            stream_id: 10,
            initial_term_id: 77,
            limit_counter_id: 3,
            log_dir: "/dev/shm/plasma/publications/udp_localhost_40123/1-10".to_string(),
        };

        assert_eq!(NewPublicationMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_new_connection_round_trip() {
        let msg = NewConnectionMessage {
            correlation_id: 77,
            session_id: 5,
            stream_id: 10,
            initial_term_id: 3,
            subscriber_position_id: 6,
            log_dir: "/dev/shm/plasma/subscriptions/udp_localhost_40123/5-10".to_string(),
            source: "127.0.0.1:40123".to_string(),
        };

        assert_eq!(NewConnectionMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_error_response_round_trip() {
        let msg = ErrorResponseMessage {
            offending_correlation_id: 42,
            code: ErrorCode::PublicationChannelAlreadyExists,
            message: "publication already exists".to_string(),
        };

        assert_eq!(ErrorResponseMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_decode_err_truncated() {
        let msg = ChannelMessage {
            client_id: 1,
            correlation_id: 2,
            stream_id: 3,
            channel: "udp://localhost:40123".to_string(),
        };

        let encoded = msg.encode();
        assert_eq!(
            ChannelMessage::decode(&encoded[..encoded.len() - 4]),
            Err(ProtocolError::TooShort)
        );
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ErrorCode::from_u32(1), ErrorCode::PublicationChannelAlreadyExists);
        assert_eq!(ErrorCode::from_u32(99), ErrorCode::GenericError);
    }
}
