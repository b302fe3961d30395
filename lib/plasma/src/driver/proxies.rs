use crate::driver::flow::FlowControl;
use crate::driver::image::PublicationImage;
use crate::driver::publication::DriverPublication;
use crate::driver::udp::UdpTransport;
use std::net::SocketAddr;
use std::sync::Arc;

/// Conductor to Sender commands.
pub enum SenderCommand {
    AddPublication {
        publication: Arc<DriverPublication>,
        transport: UdpTransport,
        flow: Box<dyn FlowControl + Send>,
    },
    RemovePublication {
        registration_id: i64,
    },
}

/// Conductor to Receiver commands.
pub enum ReceiverCommand {
    RegisterTransport {
        transport_id: usize,
        transport: UdpTransport,
    },
    CloseTransport {
        transport_id: usize,
    },
    AddSubscription {
        transport_id: usize,
        stream_id: u32,
    },
    RemoveSubscription {
        transport_id: usize,
        stream_id: u32,
    },
    /// A requested image's buffers are allocated and ready to rebuild into.
    NewImageReady {
        image: Arc<PublicationImage>,
    },
}

/// Receiver to Conductor events.
pub enum ConductorEvent {
    /// A setup frame arrived for a subscribed stream with no image yet; the
    /// Conductor allocates the log and counters.
    CreateImage {
        transport_id: usize,
        session_id: u32,
        stream_id: u32,
        initial_term_id: u32,
        active_term_id: u32,
        term_offset: u32,
        term_length: u32,
        mtu: u32,
        control_address: SocketAddr,
    },
    /// An image saw no traffic for the liveness timeout and went inactive.
    ImageInactive {
        correlation_id: i64,
    },
}
