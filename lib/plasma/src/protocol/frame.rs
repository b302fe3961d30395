use crate::protocol::{ProtocolError, ProtocolResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Every frame in a term and on the wire starts and ends on this alignment;
/// end-of-term slack is covered by a PAD frame.
pub const FRAME_ALIGNMENT: usize = 32;

/// Length of the data frame header, reserved value included. The payload
/// begins immediately after.
pub const HEADER_LENGTH: usize = 32;

/// Length of the type-independent header prefix.
pub const BASE_HEADER_LENGTH: usize = 24;

pub const NAK_FRAME_LENGTH: usize = 32;
pub const SM_FRAME_LENGTH: usize = 36;
pub const SETUP_FRAME_LENGTH: usize = 40;

pub const CURRENT_VERSION: u8 = 0;

/// Field offsets within the common header.
pub const LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const TERM_OFFSET_OFFSET: usize = 8;
pub const SESSION_ID_OFFSET: usize = 12;
pub const STREAM_ID_OFFSET: usize = 16;
pub const TERM_ID_OFFSET: usize = 20;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum FrameType {
    Pad = 0x00,
    Data = 0x01,
    Nak = 0x02,
    StatusMessage = 0x03,
    Setup = 0x05,
}

impl FrameType {
    #[inline]
    pub fn from_u16(value: u16) -> ProtocolResult<FrameType> {
        match value {
            0x00 => Ok(FrameType::Pad),
            0x01 => Ok(FrameType::Data),
            0x02 => Ok(FrameType::Nak),
            0x03 => Ok(FrameType::StatusMessage),
            0x05 => Ok(FrameType::Setup),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

pub mod flags {
    /// First fragment of a message.
    pub const BEGIN: u8 = 0x80;
    /// Last fragment of a message.
    pub const END: u8 = 0x40;
    pub const UNFRAGMENTED: u8 = BEGIN | END;
    /// Set on PAD frames.
    pub const PADDING: u8 = 0x20;
}

/// The type-independent leading fields of every frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub frame_length: u32,
    pub flags: u8,
    pub frame_type: FrameType,
    pub term_offset: u32,
    pub session_id: u32,
    pub stream_id: u32,
    pub term_id: u32,
}

impl FrameHeader {
    pub fn decode(mut buffer: &[u8]) -> ProtocolResult<FrameHeader> {
        let frame_length = buffer.read_u32::<BigEndian>()?;
        let version = buffer.read_u8()?;
        let flags = buffer.read_u8()?;
        let frame_type = FrameType::from_u16(buffer.read_u16::<BigEndian>()?)?;

        if version != CURRENT_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        Ok(FrameHeader {
            frame_length,
            flags,
            frame_type,
            term_offset: buffer.read_u32::<BigEndian>()?,
            session_id: buffer.read_u32::<BigEndian>()?,
            stream_id: buffer.read_u32::<BigEndian>()?,
            term_id: buffer.read_u32::<BigEndian>()?,
        })
    }

    pub fn encode(&self, mut buffer: &mut [u8]) -> ProtocolResult<()> {
        buffer.write_u32::<BigEndian>(self.frame_length)?;
        buffer.write_u8(CURRENT_VERSION)?;
        buffer.write_u8(self.flags)?;
        buffer.write_u16::<BigEndian>(self.frame_type as u16)?;
        buffer.write_u32::<BigEndian>(self.term_offset)?;
        buffer.write_u32::<BigEndian>(self.session_id)?;
        buffer.write_u32::<BigEndian>(self.stream_id)?;
        buffer.write_u32::<BigEndian>(self.term_id)?;
        Ok(())
    }

    /// Encodes every field except the frame length, which log writers commit
    /// last with release semantics.
    pub fn encode_sans_length(&self, buffer: &mut [u8]) -> ProtocolResult<()> {
        if buffer.len() < BASE_HEADER_LENGTH {
            return Err(ProtocolError::TooShort);
        }

        let mut tail = &mut buffer[VERSION_OFFSET..];
        tail.write_u8(CURRENT_VERSION)?;
        tail.write_u8(self.flags)?;
        tail.write_u16::<BigEndian>(self.frame_type as u16)?;
        tail.write_u32::<BigEndian>(self.term_offset)?;
        tail.write_u32::<BigEndian>(self.session_id)?;
        tail.write_u32::<BigEndian>(self.stream_id)?;
        tail.write_u32::<BigEndian>(self.term_id)?;
        Ok(())
    }
}

/// NAK: names one gap of missing bytes within a term.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NakFrame {
    pub session_id: u32,
    pub stream_id: u32,
    pub term_id: u32,
    pub gap_offset: u32,
    pub gap_length: u32,
}

impl NakFrame {
    pub fn decode(header: &FrameHeader, buffer: &[u8]) -> ProtocolResult<NakFrame> {
        if buffer.len() < NAK_FRAME_LENGTH {
            return Err(ProtocolError::TooShort);
        }

        let mut tail = &buffer[BASE_HEADER_LENGTH..];

        Ok(NakFrame {
            session_id: header.session_id,
            stream_id: header.stream_id,
            term_id: header.term_id,
            gap_offset: tail.read_u32::<BigEndian>()?,
            gap_length: tail.read_u32::<BigEndian>()?,
        })
    }

    pub fn encode(&self, buffer: &mut [u8]) -> ProtocolResult<()> {
        if buffer.len() < NAK_FRAME_LENGTH {
            return Err(ProtocolError::TooShort);
        }

        let header = FrameHeader {
            frame_length: NAK_FRAME_LENGTH as u32,
            flags: 0,
            frame_type: FrameType::Nak,
            term_offset: 0,
            session_id: self.session_id,
            stream_id: self.stream_id,
            term_id: self.term_id,
        };
        header.encode(&mut buffer[..BASE_HEADER_LENGTH])?;

        let mut tail = &mut buffer[BASE_HEADER_LENGTH..];
        tail.write_u32::<BigEndian>(self.gap_offset)?;
        tail.write_u32::<BigEndian>(self.gap_length)?;
        Ok(())
    }
}

/// Status message: advertises a receiver's consumption point and window.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StatusFrame {
    pub session_id: u32,
    pub stream_id: u32,
    pub consumption_term_id: u32,
    pub consumption_term_offset: u32,
    pub receiver_window: u32,
}

impl StatusFrame {
    pub fn decode(header: &FrameHeader, buffer: &[u8]) -> ProtocolResult<StatusFrame> {
        if buffer.len() < SM_FRAME_LENGTH {
            return Err(ProtocolError::TooShort);
        }

        let mut tail = &buffer[BASE_HEADER_LENGTH..];

        Ok(StatusFrame {
            session_id: header.session_id,
            stream_id: header.stream_id,
            consumption_term_id: tail.read_u32::<BigEndian>()?,
            consumption_term_offset: tail.read_u32::<BigEndian>()?,
            receiver_window: tail.read_u32::<BigEndian>()?,
        })
    }

    pub fn encode(&self, buffer: &mut [u8]) -> ProtocolResult<()> {
        if buffer.len() < SM_FRAME_LENGTH {
            return Err(ProtocolError::TooShort);
        }

        let header = FrameHeader {
            frame_length: SM_FRAME_LENGTH as u32,
            flags: 0,
            frame_type: FrameType::StatusMessage,
            term_offset: self.consumption_term_offset,
            session_id: self.session_id,
            stream_id: self.stream_id,
            term_id: self.consumption_term_id,
        };
        header.encode(&mut buffer[..BASE_HEADER_LENGTH])?;

        let mut tail = &mut buffer[BASE_HEADER_LENGTH..];
        tail.write_u32::<BigEndian>(self.consumption_term_id)?;
        tail.write_u32::<BigEndian>(self.consumption_term_offset)?;
        tail.write_u32::<BigEndian>(self.receiver_window)?;
        Ok(())
    }
}

/// Setup: announces a publication's term geometry to receivers. The common
/// header's term offset carries the sender's current tail, which is where a
/// newly created image joins the stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SetupFrame {
    pub session_id: u32,
    pub stream_id: u32,
    pub term_offset: u32,
    pub initial_term_id: u32,
    pub active_term_id: u32,
    pub term_length: u32,
    pub mtu_length: u32,
}

impl SetupFrame {
    pub fn decode(header: &FrameHeader, buffer: &[u8]) -> ProtocolResult<SetupFrame> {
        if buffer.len() < SETUP_FRAME_LENGTH {
            return Err(ProtocolError::TooShort);
        }

        let mut tail = &buffer[BASE_HEADER_LENGTH..];

        Ok(SetupFrame {
            session_id: header.session_id,
            stream_id: header.stream_id,
            term_offset: header.term_offset,
            initial_term_id: tail.read_u32::<BigEndian>()?,
            active_term_id: tail.read_u32::<BigEndian>()?,
            term_length: tail.read_u32::<BigEndian>()?,
            mtu_length: tail.read_u32::<BigEndian>()?,
        })
    }

    pub fn encode(&self, buffer: &mut [u8]) -> ProtocolResult<()> {
        if buffer.len() < SETUP_FRAME_LENGTH {
            return Err(ProtocolError::TooShort);
        }

        let header = FrameHeader {
            frame_length: SETUP_FRAME_LENGTH as u32,
            flags: 0,
            frame_type: FrameType::Setup,
            term_offset: self.term_offset,
            session_id: self.session_id,
            stream_id: self.stream_id,
            term_id: self.active_term_id,
        };
        header.encode(&mut buffer[..BASE_HEADER_LENGTH])?;

        let mut tail = &mut buffer[BASE_HEADER_LENGTH..];
        tail.write_u32::<BigEndian>(self.initial_term_id)?;
        tail.write_u32::<BigEndian>(self.active_term_id)?;
        tail.write_u32::<BigEndian>(self.term_length)?;
        tail.write_u32::<BigEndian>(self.mtu_length)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = FrameHeader {
            frame_length: 96,
            flags: flags::UNFRAGMENTED,
            frame_type: FrameType::Data,
            term_offset: 64,
            session_id: 0xaabbccdd,
            stream_id: 10,
            term_id: 3,
        };

        let mut buffer = [0u8; BASE_HEADER_LENGTH];
        header.encode(&mut buffer).unwrap();

        assert_eq!(FrameHeader::decode(&buffer).unwrap(), header);
    }

    #[test]
    fn test_header_is_big_endian() {
        let header = FrameHeader {
            frame_length: 0x0102_0304,
            flags: 0,
            frame_type: FrameType::Data,
            term_offset: 0,
            session_id: 0,
            stream_id: 0,
            term_id: 0,
        };

        let mut buffer = [0u8; BASE_HEADER_LENGTH];
        header.encode(&mut buffer).unwrap();

        assert_eq!(&buffer[..4], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_err_short_buffer() {
        assert_eq!(FrameHeader::decode(&[0u8; 10]), Err(ProtocolError::TooShort));
    }

    #[test]
    fn test_decode_err_unknown_type() {
        let mut buffer = [0u8; BASE_HEADER_LENGTH];
        buffer[TYPE_OFFSET] = 0xff;
        buffer[TYPE_OFFSET + 1] = 0xff;

        assert_eq!(
            FrameHeader::decode(&buffer),
            Err(ProtocolError::UnknownFrameType(0xffff))
        );
    }

    #[test]
    fn test_decode_err_bad_version() {
        let header = FrameHeader {
            frame_length: 32,
            flags: 0,
            frame_type: FrameType::Data,
            term_offset: 0,
            session_id: 0,
            stream_id: 0,
            term_id: 0,
        };

        let mut buffer = [0u8; BASE_HEADER_LENGTH];
        header.encode(&mut buffer).unwrap();
        buffer[VERSION_OFFSET] = 9;

        assert_eq!(
            FrameHeader::decode(&buffer),
            Err(ProtocolError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_nak_round_trip() {
        let nak = NakFrame {
            session_id: 1,
            stream_id: 2,
            term_id: 3,
            gap_offset: 4096,
            gap_length: 128,
        };

        let mut buffer = [0u8; NAK_FRAME_LENGTH];
        nak.encode(&mut buffer).unwrap();

        let header = FrameHeader::decode(&buffer).unwrap();
        assert_eq!(header.frame_type, FrameType::Nak);
        assert_eq!(NakFrame::decode(&header, &buffer).unwrap(), nak);
    }

    #[test]
    fn test_status_round_trip() {
        let sm = StatusFrame {
            session_id: 1,
            stream_id: 2,
            consumption_term_id: 7,
            consumption_term_offset: 1024,
            receiver_window: 65536,
        };

        let mut buffer = [0u8; SM_FRAME_LENGTH];
        sm.encode(&mut buffer).unwrap();

        let header = FrameHeader::decode(&buffer).unwrap();
        assert_eq!(header.frame_type, FrameType::StatusMessage);
        assert_eq!(StatusFrame::decode(&header, &buffer).unwrap(), sm);
    }

    #[test]
    fn test_setup_round_trip() {
        let setup = SetupFrame {
            session_id: 1,
            stream_id: 2,
            term_offset: 2048,
            initial_term_id: 100,
            active_term_id: 101,
            term_length: 65536,
            mtu_length: 4096,
        };

        let mut buffer = [0u8; SETUP_FRAME_LENGTH];
        setup.encode(&mut buffer).unwrap();

        let header = FrameHeader::decode(&buffer).unwrap();
        assert_eq!(header.frame_type, FrameType::Setup);
        assert_eq!(SetupFrame::decode(&header, &buffer).unwrap(), setup);
    }
}
