use std::collections::HashSet;

/// Diagnostic event taxonomy. Each code maps to one bit of a 64 bit tag set
/// so hot paths can test `tags & code.tag() != 0` before formatting anything.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum EventCode {
    FrameIn = 0,
    FrameOut = 1,
    CmdIn = 2,
    CmdOut = 3,
    SetupIn = 4,
    SetupOut = 5,
    NakIn = 6,
    NakOut = 7,
    SmIn = 8,
    SmOut = 9,
    HeartbeatOut = 10,
    MalformedFrame = 11,
    PublicationCreated = 12,
    PublicationRemoved = 13,
    ImageCreated = 14,
    ImageRemoved = 15,
}

impl EventCode {
    const ALL: [EventCode; 16] = [
        EventCode::FrameIn,
        EventCode::FrameOut,
        EventCode::CmdIn,
        EventCode::CmdOut,
        EventCode::SetupIn,
        EventCode::SetupOut,
        EventCode::NakIn,
        EventCode::NakOut,
        EventCode::SmIn,
        EventCode::SmOut,
        EventCode::HeartbeatOut,
        EventCode::MalformedFrame,
        EventCode::PublicationCreated,
        EventCode::PublicationRemoved,
        EventCode::ImageCreated,
        EventCode::ImageRemoved,
    ];

    /// The configuration token naming this code.
    pub fn token(self) -> &'static str {
        match self {
            EventCode::FrameIn => "FRAME_IN",
            EventCode::FrameOut => "FRAME_OUT",
            EventCode::CmdIn => "CMD_IN",
            EventCode::CmdOut => "CMD_OUT",
            EventCode::SetupIn => "SETUP_IN",
            EventCode::SetupOut => "SETUP_OUT",
            EventCode::NakIn => "NAK_IN",
            EventCode::NakOut => "NAK_OUT",
            EventCode::SmIn => "SM_IN",
            EventCode::SmOut => "SM_OUT",
            EventCode::HeartbeatOut => "HEARTBEAT_OUT",
            EventCode::MalformedFrame => "MALFORMED_FRAME",
            EventCode::PublicationCreated => "PUBLICATION_CREATED",
            EventCode::PublicationRemoved => "PUBLICATION_REMOVED",
            EventCode::ImageCreated => "IMAGE_CREATED",
            EventCode::ImageRemoved => "IMAGE_REMOVED",
        }
    }

    fn from_token(token: &str) -> Option<EventCode> {
        Self::ALL.iter().copied().find(|code| code.token() == token)
    }

    /// The bit this code occupies in the tag set.
    #[inline]
    pub fn tag(self) -> u64 {
        1u64 << (self as u8)
    }
}

/// Parses the comma separated event code list from configuration. `all`
/// enables every code, an empty value or `null` enables none, and any
/// unrecognized token disables all codes and reports the offender on
/// standard error.
pub fn enabled_event_codes(value: &str) -> HashSet<EventCode> {
    let value = value.trim();

    if value.is_empty() || value == "null" {
        return HashSet::new();
    }

    if value == "all" {
        return EventCode::ALL.iter().copied().collect();
    }

    let mut codes = HashSet::new();

    for token in value.split(',') {
        let token = token.trim();
        match EventCode::from_token(token) {
            Some(code) => {
                codes.insert(code);
            }
            None => {
                eprintln!("Unknown event code: {}", token);
                return HashSet::new();
            }
        }
    }

    codes
}

/// Folds an enabled set into the 64 bit tag mask used for fast filtering.
#[inline]
pub fn tag_mask(codes: &HashSet<EventCode>) -> u64 {
    codes.iter().fold(0, |mask, code| mask | code.tag())
}
