use crate::concurrent::counters::Position;
use crate::concurrent::logbuffer::{descriptor, gaps};
use crate::concurrent::spsc::OneToOneQueue;
use crate::driver::agent::Agent;
use crate::driver::context::DriverContext;
use crate::driver::image::{self, PublicationImage};
use crate::driver::loss::{LossDetector, OptimalMulticastDelayGenerator, StaticDelayGenerator};
use crate::driver::proxies::{ConductorEvent, ReceiverCommand};
use crate::driver::udp::UdpTransport;
use crate::protocol::frame::{FrameHeader, FrameType, NakFrame, SetupFrame, StatusFrame, NAK_FRAME_LENGTH, SM_FRAME_LENGTH};
use hashbrown::HashMap;
use indexmap::IndexMap;
use ion::events::EventCode;
use ion::logging::{self, Logger};
use ion::time::NanoClock;
use mio::{Events, Poll, Token};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Diagnostic counters owned by the Receiver.
#[derive(Copy, Clone)]
pub struct ReceiverStats {
    pub naks_sent: Position,
    pub sms_sent: Position,
    pub invalid_frames: Position,
}

const EARLY_PACKET_LIMIT: usize = 32;

type ImageKey = (usize, u32, u32); // (transport, session, stream)

struct ImageEntry {
    image: Arc<PublicationImage>,
    loss: LossDetector,
    last_sm_ns: u64,
    last_sm_position: i64,
}

/// Datagrams that raced ahead of image creation, replayed once the
/// Conductor hands the buffers back.
struct PendingImage {
    early: Vec<(u32, u32, Vec<u8>)>,
}

/// The Receiver agent: owns every inbound socket, demultiplexes datagrams to
/// images, rebuilds image logs, runs the loss detector and answers the
/// source with status messages. New flows are surfaced to the Conductor,
/// which allocates buffers and hands the image back.
pub struct Receiver {
    commands: Arc<OneToOneQueue<ReceiverCommand>>,
    conductor: Arc<OneToOneQueue<ConductorEvent>>,
    poll: Poll,
    events: Events,
    ready: Vec<usize>,
    transports: Vec<Option<UdpTransport>>,
    interest: HashMap<(usize, u32), usize>,
    images: IndexMap<ImageKey, ImageEntry>,
    pending: HashMap<ImageKey, PendingImage>,
    sweep: Vec<ImageKey>,
    rcv_buf: Vec<u8>,
    clock: NanoClock,
    event_tags: u64,
    sm_timeout_ns: u64,
    image_liveness_timeout_ns: u64,
    initial_window: u32,
    nak_grtt_ns: u64,
    nak_group_size: u32,
    nak_max_backoff_ns: u64,
    nak_retry_ns: u64,
    stats: ReceiverStats,
    log: Logger,
}

impl Receiver {
    pub fn new(
        context: &DriverContext,
        commands: Arc<OneToOneQueue<ReceiverCommand>>,
        conductor: Arc<OneToOneQueue<ConductorEvent>>,
        clock: NanoClock,
        stats: ReceiverStats,
        log: Logger,
    ) -> std::io::Result<Receiver> {
        Ok(Receiver {
            commands,
            conductor,
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            ready: Vec::new(),
            transports: Vec::new(),
            interest: HashMap::new(),
            images: IndexMap::new(),
            pending: HashMap::new(),
            sweep: Vec::new(),
            rcv_buf: vec![0u8; context.rcv_buffer_size],
            clock,
            event_tags: context.event_tags,
            sm_timeout_ns: context.sm_timeout_ns,
            image_liveness_timeout_ns: context.image_liveness_timeout_ns,
            initial_window: context.initial_window,
            nak_grtt_ns: context.nak_grtt_ns,
            nak_group_size: context.nak_group_size,
            nak_max_backoff_ns: context.nak_max_backoff_ns,
            nak_retry_ns: context.nak_retry_ns,
            stats,
            log,
        })
    }

    fn drain_commands(&mut self, now_ns: u64) -> usize {
        let mut work = 0;

        loop {
            match self.commands.poll() {
                Some(ReceiverCommand::RegisterTransport {
                    transport_id,
                    mut transport,
                }) => {
                    if let Err(err) = transport.register(self.poll.registry(), Token(transport_id)) {
                        logging::error!(self.log, "transport registration failed";
                                        "context" => "register_transport",
                                        "transport_id" => transport_id,
                                        "error" => %err);
                        continue;
                    }

                    if self.transports.len() <= transport_id {
                        self.transports.resize_with(transport_id + 1, || None);
                    }
                    self.transports[transport_id] = Some(transport);
                    work += 1;
                }
                Some(ReceiverCommand::CloseTransport { transport_id }) => {
                    if let Some(Some(mut transport)) = self.transports.get_mut(transport_id).map(Option::take) {
                        let _ = transport.deregister(self.poll.registry());
                    }
                    self.images.retain(|key, _| key.0 != transport_id);
                    self.pending.retain(|key, _| key.0 != transport_id);
                    work += 1;
                }
                Some(ReceiverCommand::AddSubscription {
                    transport_id,
                    stream_id,
                }) => {
                    *self.interest.entry((transport_id, stream_id)).or_insert(0) += 1;
                    work += 1;
                }
                Some(ReceiverCommand::RemoveSubscription {
                    transport_id,
                    stream_id,
                }) => {
                    let empty = match self.interest.get_mut(&(transport_id, stream_id)) {
                        Some(count) => {
                            *count = count.saturating_sub(1);
                            *count == 0
                        }
                        None => false,
                    };

                    if empty {
                        self.interest.remove(&(transport_id, stream_id));

                        // Drop the stream's images and let the Conductor run
                        // the client-visible teardown.
                        let conductor = &self.conductor;
                        self.images.retain(|key, entry| {
                            if key.0 == transport_id && key.2 == stream_id {
                                entry.image.set_status(image::INACTIVE);
                                let _ = conductor.offer(ConductorEvent::ImageInactive {
                                    correlation_id: entry.image.correlation_id(),
                                });
                                false
                            } else {
                                true
                            }
                        });
                        self.pending.retain(|key, _| !(key.0 == transport_id && key.2 == stream_id));
                    }
                    work += 1;
                }
                Some(ReceiverCommand::NewImageReady { image }) => {
                    work += self.on_image_ready(image, now_ns);
                }
                None => break,
            }
        }

        work
    }

    fn on_image_ready(&mut self, image: Arc<PublicationImage>, now_ns: u64) -> usize {
        let key = (image.transport_id(), image.session_id(), image.stream_id());

        let multicast = self
            .transports
            .get(key.0)
            .and_then(Option::as_ref)
            .map(UdpTransport::is_multicast)
            .unwrap_or(false);

        let loss = if multicast {
            LossDetector::new(
                Box::new(OptimalMulticastDelayGenerator::new(
                    self.nak_grtt_ns,
                    self.nak_group_size,
                    self.nak_max_backoff_ns,
                )),
                self.nak_retry_ns,
            )
        } else {
            LossDetector::new(Box::new(StaticDelayGenerator::new(0)), self.nak_retry_ns)
        };

        let mut entry = ImageEntry {
            last_sm_ns: now_ns.saturating_sub(self.sm_timeout_ns),
            last_sm_position: 0,
            image,
            loss,
        };

        // Replay datagrams that raced ahead of the control plane.
        if let Some(pending) = self.pending.remove(&key) {
            for (term_id, term_offset, packet) in pending.early {
                entry.image.insert_packet(term_id, term_offset, &packet, now_ns);
            }
        }

        logging::debug!(self.log, "image ready";
                        "context" => "new_image",
                        "session_id" => entry.image.session_id(),
                        "stream_id" => entry.image.stream_id());

        self.images.insert(key, entry);
        1
    }

    fn poll_sockets(&mut self, now_ns: u64) -> usize {
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
        for transport_id in ready.iter() {
            work += self.service_transport(*transport_id, now_ns);
        }
        self.ready = ready;

        work
    }

    fn service_transport(&mut self, transport_id: usize, now_ns: u64) -> usize {
        let mut work = 0;

        loop {
            let received = {
                let transport = match self.transports.get(transport_id).and_then(Option::as_ref) {
                    Some(transport) => transport,
                    None => return work,
                };
                transport.recv(&mut self.rcv_buf)
            };

            match received {
                Ok(Some((length, from))) => {
                    let datagram = std::mem::replace(&mut self.rcv_buf, Vec::new());
                    self.dispatch(transport_id, &datagram[..length], from, now_ns);
                    self.rcv_buf = datagram;
                    work += 1;
                }
                _ => break,
            }
        }

        work
    }

    fn dispatch(&mut self, transport_id: usize, datagram: &[u8], from: SocketAddr, now_ns: u64) {
        if self.event_tags & EventCode::FrameIn.tag() != 0 {
            logging::trace!(self.log, "frame in";
                            "context" => "event",
                            "transport_id" => transport_id,
                            "length" => datagram.len(),
                            "source" => %from);
        }

        let header = match FrameHeader::decode(datagram) {
            Ok(header) => header,
            Err(_) => {
                self.stats.invalid_frames.add_ordered(1);
                return;
            }
        };

        let key = (transport_id, header.session_id, header.stream_id);

        match header.frame_type {
            FrameType::Setup => {
                if let Ok(setup) = SetupFrame::decode(&header, datagram) {
                    self.on_setup(key, &setup, from, now_ns);
                } else {
                    self.stats.invalid_frames.add_ordered(1);
                }
            }
            FrameType::Data | FrameType::Pad => {
                if let Some(entry) = self.images.get_mut(&key) {
                    if header.frame_length == 0 {
                        entry.image.on_heartbeat(header.term_id, header.term_offset, now_ns);
                    } else {
                        entry
                            .image
                            .insert_packet(header.term_id, header.term_offset, datagram, now_ns);
                    }
                } else if let Some(pending) = self.pending.get_mut(&key) {
                    if pending.early.len() < EARLY_PACKET_LIMIT && header.frame_length > 0 {
                        pending
                            .early
                            .push((header.term_id, header.term_offset, datagram.to_vec()));
                    }
                }
            }
            // Outbound concepts at a subscriber; a peer sending them here is
            // confused, not fatal.
            FrameType::Nak | FrameType::StatusMessage => {}
        }
    }

    fn on_setup(&mut self, key: ImageKey, setup: &SetupFrame, from: SocketAddr, now_ns: u64) {
        if let Some(entry) = self.images.get_mut(&key) {
            entry.image.on_packet(now_ns);
            return;
        }

        if !self.interest.contains_key(&(key.0, key.2)) || self.pending.contains_key(&key) {
            return;
        }

        self.pending.insert(key, PendingImage { early: Vec::new() });

        let _ = self.conductor.offer(ConductorEvent::CreateImage {
            transport_id: key.0,
            session_id: setup.session_id,
            stream_id: setup.stream_id,
            initial_term_id: setup.initial_term_id,
            active_term_id: setup.active_term_id,
            term_offset: setup.term_offset,
            term_length: setup.term_length,
            mtu: setup.mtu_length,
            control_address: from,
        });

        logging::debug!(self.log, "image requested";
                        "context" => "setup",
                        "session_id" => setup.session_id,
                        "stream_id" => setup.stream_id,
                        "source" => %from);
    }

    /// Per-image housekeeping: loss detection, status message cadence and
    /// liveness.
    fn image_duty(&mut self, now_ns: u64) -> usize {
        let mut work = 0;

        self.sweep.clear();
        self.sweep.extend(self.images.keys().copied());
        let sweep = std::mem::replace(&mut self.sweep, Vec::new());

        for key in sweep.iter() {
            work += self.single_image_duty(*key, now_ns);
        }

        self.sweep = sweep;
        work
    }

    fn single_image_duty(&mut self, key: ImageKey, now_ns: u64) -> usize {
        let entry = match self.images.get_mut(&key) {
            Some(entry) => entry,
            None => return 0,
        };

        let mut work = 0;

        // Liveness: silence past the timeout retires the image.
        if now_ns.saturating_sub(entry.image.last_packet_ns()) >= self.image_liveness_timeout_ns {
            entry.image.set_status(image::INACTIVE);
            let _ = self.conductor.offer(ConductorEvent::ImageInactive {
                correlation_id: entry.image.correlation_id(),
            });

            logging::debug!(self.log, "image went inactive";
                            "context" => "liveness",
                            "session_id" => entry.image.session_id(),
                            "stream_id" => entry.image.stream_id());

            self.images.swap_remove(&key);
            return 1;
        }

        // Loss detection over [rebuild, hwm).
        let nak = match entry.image.gap_scan_window() {
            Some((term_id, rebuild_offset, term_index, limit)) => {
                let term = entry.image.term(term_index);
                let gap = gaps::scan_for_gap(&term, term_id, rebuild_offset, limit);
                entry.loss.on_scan(gap, now_ns)
            }
            None => entry.loss.on_scan(None, now_ns),
        };

        if let Some(gap) = nak {
            let nak_frame = NakFrame {
                session_id: entry.image.session_id(),
                stream_id: entry.image.stream_id(),
                term_id: gap.term_id,
                gap_offset: gap.offset,
                gap_length: gap.length,
            };

            let mut buffer = [0u8; NAK_FRAME_LENGTH];
            if nak_frame.encode(&mut buffer).is_ok() {
                if let Some(transport) = self.transports.get(key.0).and_then(Option::as_ref) {
                    let _ = transport.send_to(&buffer, entry.image.control_address());
                    self.stats.naks_sent.add_ordered(1);
                    work += 1;
                }
            }
        }

        // Status messages: by timeout, or early once a quarter window has
        // been consumed since the last one.
        let consumption = entry.image.subscriber_position();
        let due_by_time = now_ns.saturating_sub(entry.last_sm_ns) >= self.sm_timeout_ns;
        let due_by_bytes =
            consumption - entry.last_sm_position >= i64::from(self.initial_window / 4);

        if due_by_time || due_by_bytes {
            let bits = entry.image.position_bits();
            let sm = StatusFrame {
                session_id: entry.image.session_id(),
                stream_id: entry.image.stream_id(),
                consumption_term_id: descriptor::term_id_from_position(
                    consumption,
                    bits,
                    entry.image.initial_term_id(),
                ),
                consumption_term_offset: descriptor::term_offset_from_position(consumption, bits),
                receiver_window: self.initial_window,
            };

            let mut buffer = [0u8; SM_FRAME_LENGTH];
            if sm.encode(&mut buffer).is_ok() {
                if let Some(transport) = self.transports.get(key.0).and_then(Option::as_ref) {
                    let _ = transport.send_to(&buffer, entry.image.control_address());
                    entry.last_sm_ns = now_ns;
                    entry.last_sm_position = consumption;
                    self.stats.sms_sent.add_ordered(1);
                    work += 1;
                }
            }
        }

        work
    }
}

impl Agent for Receiver {
    fn role(&self) -> &'static str {
        "receiver"
    }

    fn do_work(&mut self) -> usize {
        let now_ns = self.clock.nanos();

        let mut work = self.drain_commands(now_ns);
        work += self.poll_sockets(now_ns);
        work += self.image_duty(now_ns);

        work
    }
}
