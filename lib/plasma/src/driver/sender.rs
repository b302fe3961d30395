use crate::concurrent::counters::Position;
use crate::concurrent::logbuffer::{descriptor, scanner};
use crate::concurrent::spsc::OneToOneQueue;
use crate::driver::agent::Agent;
use crate::driver::context::DriverContext;
use crate::driver::flow::FlowControl;
use crate::driver::proxies::SenderCommand;
use crate::driver::publication::DriverPublication;
use crate::driver::retransmit::RetransmitHandler;
use crate::driver::udp::UdpTransport;
use crate::protocol::frame::{self, FrameHeader, FrameType, NakFrame, SetupFrame, StatusFrame};
use ion::events::EventCode;
use ion::logging::{self, Logger};
use ion::time::NanoClock;
use mio::{Events, Poll, Token};
use std::sync::Arc;
use std::time::Duration;

/// Diagnostic counters owned by the Sender.
#[derive(Copy, Clone)]
pub struct SenderStats {
    pub short_sends: Position,
    pub heartbeats_sent: Position,
    pub naks_received: Position,
    pub sms_received: Position,
}

struct PublicationEntry {
    publication: Arc<DriverPublication>,
    transport: UdpTransport,
    flow: Box<dyn FlowControl + Send>,
    retransmit: RetransmitHandler,
    last_setup_ns: u64,
    last_activity_ns: u64,
}

/// The Sender agent: owns every outbound socket, transmits new data within
/// the flow-control window, services retransmit requests and keeps
/// unconnected or idle publications alive with SETUP and heartbeat frames.
/// Inbound status messages and NAKs arrive on the same sockets and are
/// absorbed here.
pub struct Sender {
    commands: Arc<OneToOneQueue<SenderCommand>>,
    publications: Vec<Option<PublicationEntry>>,
    poll: Poll,
    events: Events,
    ready: Vec<usize>,
    rcv_buf: Vec<u8>,
    clock: NanoClock,
    setup_interval_ns: u64,
    heartbeat_interval_ns: u64,
    initial_window: u32,
    retransmit_linger_ns: u64,
    max_retransmits: usize,
    event_tags: u64,
    stats: SenderStats,
    log: Logger,
}

impl Sender {
    pub fn new(
        context: &DriverContext,
        commands: Arc<OneToOneQueue<SenderCommand>>,
        clock: NanoClock,
        stats: SenderStats,
        log: Logger,
    ) -> std::io::Result<Sender> {
        Ok(Sender {
            commands,
            publications: Vec::new(),
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            ready: Vec::new(),
            rcv_buf: vec![0u8; context.rcv_buffer_size],
            clock,
            setup_interval_ns: context.setup_interval_ns,
            heartbeat_interval_ns: context.heartbeat_interval_ns,
            initial_window: context.initial_window,
            retransmit_linger_ns: context.retransmit_linger_ns,
            max_retransmits: context.max_retransmits,
            event_tags: context.event_tags,
            stats,
            log,
        })
    }

    fn drain_commands(&mut self, now_ns: u64) -> usize {
        let mut work = 0;

        loop {
            match self.commands.poll() {
                Some(SenderCommand::AddPublication {
                    publication,
                    mut transport,
                    flow,
                }) => {
                    let index = match self.publications.iter().position(Option::is_none) {
                        Some(index) => index,
                        None => {
                            self.publications.push(None);
                            self.publications.len() - 1
                        }
                    };

                    if let Err(err) = transport.register(self.poll.registry(), Token(index)) {
                        logging::error!(self.log, "transport registration failed";
                                        "context" => "add_publication",
                                        "session_id" => publication.session_id(),
                                        "error" => %err);
                        continue;
                    }

                    logging::debug!(self.log, "publication added";
                                    "context" => "add_publication",
                                    "session_id" => publication.session_id(),
                                    "stream_id" => publication.stream_id());

                    self.publications[index] = Some(PublicationEntry {
                        retransmit: RetransmitHandler::new(
                            now_ns,
                            1_000_000,
                            0,
                            self.retransmit_linger_ns,
                            self.max_retransmits,
                        ),
                        publication,
                        transport,
                        flow,
                        last_setup_ns: 0,
                        last_activity_ns: now_ns,
                    });
                    work += 1;
                }
                Some(SenderCommand::RemovePublication { registration_id }) => {
                    for slot in self.publications.iter_mut() {
                        let matches = slot
                            .as_ref()
                            .map(|entry| entry.publication.registration_id() == registration_id)
                            .unwrap_or(false);

                        if matches {
                            if let Some(mut entry) = slot.take() {
                                let _ = entry.transport.deregister(self.poll.registry());
                                logging::debug!(self.log, "publication removed";
                                                "context" => "remove_publication",
                                                "session_id" => entry.publication.session_id());
                            }
                        }
                    }
                    work += 1;
                }
                None => break,
            }
        }

        work
    }

    /// Zero-timeout poll for inbound SMs and NAKs on the send sockets.
    fn poll_feedback(&mut self, now_ns: u64) -> usize {
        if self
            .poll
            .poll(&mut self.events, Some(Duration::from_millis(0)))
            .is_err()
        {
            return 0;
        }

        self.ready.clear();
        for event in self.events.iter() {
            self.ready.push(event.token().0);
        }

        let mut work = 0;
        let ready = std::mem::replace(&mut self.ready, Vec::new());
        for index in ready.iter() {
            work += self.service_inbound(*index, now_ns);
        }
        self.ready = ready;

        work
    }

    fn service_inbound(&mut self, index: usize, now_ns: u64) -> usize {
        let entry = match self.publications.get_mut(index).and_then(Option::as_mut) {
            Some(entry) => entry,
            None => return 0,
        };

        let mut work = 0;

        while let Ok(Some((length, from))) = entry.transport.recv(&mut self.rcv_buf) {
            let datagram = &self.rcv_buf[..length];
            let header = match FrameHeader::decode(datagram) {
                Ok(header) => header,
                Err(_) => continue,
            };

            if header.session_id != entry.publication.session_id()
                || header.stream_id != entry.publication.stream_id()
            {
                continue;
            }

            match header.frame_type {
                FrameType::StatusMessage => {
                    if let Ok(sm) = StatusFrame::decode(&header, datagram) {
                        let limit = entry.flow.on_status_message(&sm, from, now_ns);
                        entry.publication.update_publisher_limit(limit);
                        self.stats.sms_received.add_ordered(1);
                        work += 1;
                    }
                }
                FrameType::Nak => {
                    if let Ok(nak) = NakFrame::decode(&header, datagram) {
                        entry
                            .retransmit
                            .on_nak(nak.term_id, nak.gap_offset, nak.gap_length, now_ns);
                        self.stats.naks_received.add_ordered(1);
                        work += 1;
                    }
                }
                _ => {}
            }
        }

        work
    }

    fn publication_duty(&mut self, index: usize, now_ns: u64) -> usize {
        let entry = match self.publications.get_mut(index).and_then(Option::as_mut) {
            Some(entry) => entry,
            None => return 0,
        };

        let mut work = 0;
        let publication = &entry.publication;
        let position = publication.sender_position();

        // Announce geometry until the first receiver reports in.
        if !entry.flow.has_receivers() {
            if now_ns.saturating_sub(entry.last_setup_ns) >= self.setup_interval_ns {
                let (term_id, offset, _) = publication.sender_term();
                let setup = SetupFrame {
                    session_id: publication.session_id(),
                    stream_id: publication.stream_id(),
                    term_offset: offset,
                    initial_term_id: publication.initial_term_id(),
                    active_term_id: term_id,
                    term_length: publication.term_length(),
                    mtu_length: publication.mtu(),
                };

                let mut buffer = [0u8; frame::SETUP_FRAME_LENGTH];
                if setup.encode(&mut buffer).is_ok() {
                    let _ = entry.transport.send(&buffer);
                    entry.last_setup_ns = now_ns;
                    work += 1;
                }
            }

            // Publishers may buffer ahead one window while unconnected; the
            // sender itself holds off until a receiver is known.
            publication.update_publisher_limit(position + i64::from(self.initial_window));
            return work;
        }

        let limit = entry.flow.on_idle(now_ns);
        publication.update_publisher_limit(limit);

        // New data within the window, at most an MTU per cycle.
        let window = limit - position;
        if window > 0 {
            let (_, offset, term_index) = publication.sender_term();
            let term = publication.term(term_index);
            let max_bytes = (window as u64).min(u64::from(publication.mtu())) as u32;
            let available = scanner::available(&term, offset, max_bytes, publication.term_length());

            if available > 0 {
                let sent = entry
                    .transport
                    .send(term.bytes(offset as usize, available as usize))
                    .unwrap_or(0);

                if sent > 0 {
                    if self.event_tags & EventCode::FrameOut.tag() != 0 {
                        logging::trace!(self.log, "frame out";
                                        "context" => "event",
                                        "session_id" => publication.session_id(),
                                        "length" => available);
                    }
                    publication.update_sender_position(position + i64::from(available));
                    entry.last_activity_ns = now_ns;
                    work += 1;
                } else {
                    self.stats.short_sends.add_ordered(1);
                }
            }
        }

        // Service retransmits at lower priority than new data.
        let transport = &entry.transport;
        let initial_term_id = publication.initial_term_id();
        let term_length = publication.term_length();
        let mtu = publication.mtu();
        let log = publication.log();
        entry.retransmit.process(now_ns, |term_id, term_offset, gap_length| {
            let term_index = descriptor::index_by_term(initial_term_id, term_id);
            let term = log.term(term_index);
            let max_bytes = gap_length.min(mtu);
            let available = scanner::available(&term, term_offset, max_bytes, term_length);

            if available > 0 {
                let _ = transport.send(term.bytes(term_offset as usize, available as usize));
            }
        });

        // Heartbeat through idle periods so receivers hold the image live.
        if now_ns.saturating_sub(entry.last_activity_ns) >= self.heartbeat_interval_ns {
            let (term_id, offset, _) = publication.sender_term();
            let heartbeat = FrameHeader {
                frame_length: 0,
                flags: 0,
                frame_type: FrameType::Data,
                term_offset: offset,
                session_id: publication.session_id(),
                stream_id: publication.stream_id(),
                term_id,
            };

            let mut buffer = [0u8; frame::BASE_HEADER_LENGTH];
            if heartbeat.encode(&mut buffer).is_ok() {
                let _ = entry.transport.send(&buffer);
                entry.last_activity_ns = now_ns;
                self.stats.heartbeats_sent.add_ordered(1);
                work += 1;
            }
        }

        work
    }
}

impl Agent for Sender {
    fn role(&self) -> &'static str {
        "sender"
    }

    fn do_work(&mut self) -> usize {
        let now_ns = self.clock.nanos();

        let mut work = self.drain_commands(now_ns);
        work += self.poll_feedback(now_ns);

        for index in 0..self.publications.len() {
            work += self.publication_duty(index, now_ns);
        }

        work
    }
}
