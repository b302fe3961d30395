use crate::concurrent::broadcast::BroadcastTransmitter;
use crate::concurrent::counters::CountersManager;
use crate::concurrent::logbuffer::{descriptor, LogBuffers};
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::concurrent::spsc::OneToOneQueue;
use crate::concurrent::wheel::{TimerId, TimerWheel};
use crate::driver::agent::Agent;
use crate::driver::context::DriverContext;
use crate::driver::flow;
use crate::driver::image::{self, PublicationImage};
use crate::driver::proxies::{ConductorEvent, ReceiverCommand, SenderCommand};
use crate::driver::publication::DriverPublication;
use crate::driver::udp::UdpTransport;
use crate::protocol::control::{
    command, response, ChannelMessage, CorrelatedMessage, ErrorCode, ErrorResponseMessage,
    InactiveConnectionMessage, NewConnectionMessage, NewPublicationMessage,
    OperationSucceededMessage, RemoveMessage,
};
use crate::protocol::uri::ChannelUri;
use hashbrown::HashMap;
use ion::events::EventCode;
use ion::logging::{self, Logger};
use ion::time::{timestamp_millis, NanoClock};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Bytes of dirty term zeroed per duty cycle, so cleanup cannot starve the
/// command loop.
const CLEAN_BYTES_PER_CYCLE: u32 = 256 * 1024;
const COMMAND_LIMIT: usize = 10;
const TIMER_LIMIT: usize = 16;

enum TimerTask {
    ClientLivenessSweep,
    TermCleanupSweep,
    PublicationLinger(i64),
    ImageLinger(i64),
}

struct PublicationRecord {
    publication: Arc<DriverPublication>,
    channel_key: (String, u32),
    sender_counter_id: usize,
    limit_counter_id: usize,
    lingering: bool,
}

struct SubscriptionRecord {
    client_id: i64,
    stream_id: u32,
    endpoint_key: String,
    transport_id: usize,
}

struct EndpointRecord {
    transport_id: usize,
    refcount: usize,
}

struct ImageRecord {
    image: Arc<PublicationImage>,
    hwm_counter_id: usize,
    rebuild_counter_id: usize,
    subscriber_counter_id: usize,
    lingering: bool,
}

enum CleanTarget {
    Publication(Arc<DriverPublication>),
    Image(Arc<PublicationImage>),
}

struct CleanJob {
    target: CleanTarget,
    partition: usize,
    progress: u32,
}

/// The Conductor agent: the driver's control plane. Consumes client
/// commands from the to-driver ring, owns every registry (publications,
/// subscriptions, images, clients), schedules lifecycle work on the timer
/// wheel, zeroes dirty terms in the background and answers clients over the
/// to-clients broadcast.
pub struct DriverConductor {
    context: DriverContext,
    ring: ManyToOneRingBuffer,
    broadcast: BroadcastTransmitter,
    counters: CountersManager,
    wheel: TimerWheel,
    tasks: HashMap<TimerId, TimerTask>,
    sender: Arc<OneToOneQueue<SenderCommand>>,
    receiver: Arc<OneToOneQueue<ReceiverCommand>>,
    events: Arc<OneToOneQueue<ConductorEvent>>,
    publications: HashMap<i64, PublicationRecord>,
    pub_index: HashMap<(String, u32), i64>,
    subscriptions: HashMap<i64, SubscriptionRecord>,
    endpoints: HashMap<String, EndpointRecord>,
    images: HashMap<i64, ImageRecord>,
    clients: HashMap<i64, u64>,
    clean_jobs: Vec<CleanJob>,
    next_transport_id: usize,
    rng: SmallRng,
    clock: NanoClock,
    commands: Vec<(i32, Vec<u8>)>,
    expired: Vec<TimerId>,
    log: Logger,
}

impl DriverConductor {
    pub fn new(
        context: DriverContext,
        ring: ManyToOneRingBuffer,
        broadcast: BroadcastTransmitter,
        counters: CountersManager,
        sender: Arc<OneToOneQueue<SenderCommand>>,
        receiver: Arc<OneToOneQueue<ReceiverCommand>>,
        events: Arc<OneToOneQueue<ConductorEvent>>,
        clock: NanoClock,
        log: Logger,
    ) -> DriverConductor {
        let mut wheel = TimerWheel::new(
            clock.nanos(),
            context.timer_tick_ns,
            context.timer_wheel_slots,
        );
        let mut tasks = HashMap::new();

        // Standing sweeps; each reschedules itself when it fires.
        let now_ns = clock.nanos();
        let id = wheel.schedule(now_ns + context.client_liveness_timeout_ns / 2);
        tasks.insert(id, TimerTask::ClientLivenessSweep);
        let id = wheel.schedule(now_ns + context.timer_tick_ns * 4);
        tasks.insert(id, TimerTask::TermCleanupSweep);

        DriverConductor {
            context,
            ring,
            broadcast,
            counters,
            wheel,
            tasks,
            sender,
            receiver,
            events,
            publications: HashMap::new(),
            pub_index: HashMap::new(),
            subscriptions: HashMap::new(),
            endpoints: HashMap::new(),
            images: HashMap::new(),
            clients: HashMap::new(),
            clean_jobs: Vec::new(),
            next_transport_id: 0,
            rng: SmallRng::from_entropy(),
            clock,
            commands: Vec::new(),
            expired: Vec::new(),
            log,
        }
    }

    fn error_response(&self, correlation_id: i64, code: ErrorCode, message: String) {
        logging::debug!(self.log, "command rejected";
                        "context" => "error_response",
                        "correlation_id" => correlation_id,
                        "code" => ?code,
                        "message" => %message);

        let response = ErrorResponseMessage {
            offending_correlation_id: correlation_id,
            code,
            message,
        };
        self.broadcast
            .transmit(response::ON_ERROR_RESPONSE, &response.encode());
    }

    fn operation_succeeded(&self, correlation_id: i64) {
        let response = OperationSucceededMessage { correlation_id };
        self.broadcast
            .transmit(response::ON_OPERATION_SUCCEEDED, &response.encode());
    }

    fn drain_commands(&mut self, now_ns: u64) -> usize {
        let mut commands = std::mem::replace(&mut self.commands, Vec::new());
        commands.clear();

        let count = self
            .ring
            .read(|msg_type, data| commands.push((msg_type, data.to_vec())), COMMAND_LIMIT);

        for (msg_type, data) in commands.iter() {
            self.on_command(*msg_type, data, now_ns);
        }

        self.commands = commands;
        count
    }

    fn on_command(&mut self, msg_type: i32, data: &[u8], now_ns: u64) {
        if self.context.event_tags & EventCode::CmdIn.tag() != 0 {
            logging::trace!(self.log, "command in";
                            "context" => "event",
                            "msg_type" => msg_type,
                            "length" => data.len());
        }

        match msg_type {
            command::ADD_PUBLICATION => match ChannelMessage::decode(data) {
                Ok(msg) => self.on_add_publication(msg, now_ns),
                Err(err) => {
                    logging::warn!(self.log, "malformed command"; "context" => "add_publication", "error" => ?err)
                }
            },
            command::REMOVE_PUBLICATION => match RemoveMessage::decode(data) {
                Ok(msg) => self.on_remove_publication(msg, now_ns),
                Err(err) => {
                    logging::warn!(self.log, "malformed command"; "context" => "remove_publication", "error" => ?err)
                }
            },
            command::ADD_SUBSCRIPTION => match ChannelMessage::decode(data) {
                Ok(msg) => self.on_add_subscription(msg, now_ns),
                Err(err) => {
                    logging::warn!(self.log, "malformed command"; "context" => "add_subscription", "error" => ?err)
                }
            },
            command::REMOVE_SUBSCRIPTION => match RemoveMessage::decode(data) {
                Ok(msg) => self.on_remove_subscription(msg, now_ns),
                Err(err) => {
                    logging::warn!(self.log, "malformed command"; "context" => "remove_subscription", "error" => ?err)
                }
            },
            command::CLIENT_KEEPALIVE => {
                if let Ok(msg) = CorrelatedMessage::decode(data) {
                    self.clients.insert(msg.client_id, now_ns);
                }
            }
            other => {
                logging::warn!(self.log, "unknown command type"; "context" => "dispatch", "msg_type" => other)
            }
        }
    }

    fn on_add_publication(&mut self, msg: ChannelMessage, now_ns: u64) {
        self.clients.insert(msg.client_id, now_ns);

        let channel = match ChannelUri::parse(&msg.channel) {
            Ok(channel) => channel,
            Err(err) => {
                self.error_response(
                    msg.correlation_id,
                    ErrorCode::InvalidDestinationInPublication,
                    format!("invalid channel {}: {:?}", msg.channel, err),
                );
                return;
            }
        };

        let channel_key = (channel.canonical(), msg.stream_id);
        if self.pub_index.contains_key(&channel_key) {
            self.error_response(
                msg.correlation_id,
                ErrorCode::PublicationChannelAlreadyExists,
                format!("publication already exists: {} stream {}", msg.channel, msg.stream_id),
            );
            return;
        }

        let transport = match UdpTransport::publisher(&channel) {
            Ok(transport) => transport,
            Err(err) => {
                self.error_response(
                    msg.correlation_id,
                    ErrorCode::GenericError,
                    format!("socket error for {}: {}", msg.channel, err),
                );
                return;
            }
        };

        let session_id: u32 = self.rng.gen();
        let initial_term_id: u32 = self.rng.gen();

        let dir = self
            .context
            .publications_dir()
            .join(&channel_key.0)
            .join(format!("{}-{}", session_id, msg.stream_id));

        let mut log_buffers = match LogBuffers::create(
            &dir,
            self.context.term_length,
            initial_term_id,
            self.context.mtu_length,
        ) {
            Ok(log_buffers) => log_buffers,
            Err(err) => {
                self.error_response(
                    msg.correlation_id,
                    ErrorCode::GenericError,
                    format!("log allocation failed: {}", err),
                );
                return;
            }
        };
        log_buffers.set_delete_on_drop(self.context.dirs_delete_on_exit);

        let sender_counter = self
            .counters
            .allocate(&format!("snd-pos: {} {}-{}", msg.channel, session_id, msg.stream_id));
        let limit_counter = self
            .counters
            .allocate(&format!("pub-lmt: {} {}-{}", msg.channel, session_id, msg.stream_id));

        let (sender_counter, limit_counter) = match (sender_counter, limit_counter) {
            (Some(s), Some(l)) => (s, l),
            _ => {
                self.error_response(
                    msg.correlation_id,
                    ErrorCode::GenericError,
                    "counters exhausted".to_string(),
                );
                return;
            }
        };

        let publication = Arc::new(DriverPublication::new(
            msg.correlation_id,
            msg.client_id,
            session_id,
            msg.stream_id,
            channel.clone(),
            log_buffers,
            self.counters.position(sender_counter),
            self.counters.position(limit_counter),
        ));

        let flow = flow::for_channel(
            &channel,
            initial_term_id,
            descriptor::position_bits_to_shift(self.context.term_length),
            self.context.flow_receiver_timeout_ns,
        );

        if self
            .sender
            .offer(SenderCommand::AddPublication {
                publication: Arc::clone(&publication),
                transport,
                flow,
            })
            .is_err()
        {
            self.counters.free(sender_counter);
            self.counters.free(limit_counter);
            self.error_response(
                msg.correlation_id,
                ErrorCode::GenericError,
                "driver command queue full".to_string(),
            );
            return;
        }

        let log_dir = dir.to_string_lossy().to_string();

        self.pub_index.insert(channel_key.clone(), msg.correlation_id);
        self.publications.insert(
            msg.correlation_id,
            PublicationRecord {
                publication,
                channel_key,
                sender_counter_id: sender_counter,
                limit_counter_id: limit_counter,
                lingering: false,
            },
        );

        logging::info!(self.log, "publication created";
                       "context" => "add_publication",
                       "channel" => %msg.channel,
                       "session_id" => session_id,
                       "stream_id" => msg.stream_id,
                       "correlation_id" => msg.correlation_id);

        let response = NewPublicationMessage {
            correlation_id: msg.correlation_id,
            session_id,
            stream_id: msg.stream_id,
            initial_term_id,
            limit_counter_id: limit_counter as i32,
            log_dir,
        };
        self.broadcast
            .transmit(response::ON_NEW_PUBLICATION, &response.encode());
    }

    fn on_remove_publication(&mut self, msg: RemoveMessage, now_ns: u64) {
        self.clients.insert(msg.client_id, now_ns);

        let known = self
            .publications
            .get(&msg.registration_id)
            .map(|record| !record.lingering && record.publication.client_id() == msg.client_id)
            .unwrap_or(false);

        if !known {
            self.error_response(
                msg.correlation_id,
                ErrorCode::PublicationChannelUnknown,
                format!("unknown publication: {}", msg.registration_id),
            );
            return;
        }

        self.begin_publication_linger(msg.registration_id, now_ns);
        self.operation_succeeded(msg.correlation_id);
    }

    /// Starts graceful teardown: the Sender keeps draining until the linger
    /// deadline so in-flight NAKs can still be honoured.
    fn begin_publication_linger(&mut self, registration_id: i64, now_ns: u64) {
        if let Some(record) = self.publications.get_mut(&registration_id) {
            record.lingering = true;
            self.pub_index.remove(&record.channel_key);

            let id = self.wheel.schedule(now_ns + self.context.publication_linger_ns);
            self.tasks.insert(id, TimerTask::PublicationLinger(registration_id));

            logging::info!(self.log, "publication lingering";
                           "context" => "remove_publication",
                           "correlation_id" => registration_id);
        }
    }

    fn on_add_subscription(&mut self, msg: ChannelMessage, now_ns: u64) {
        self.clients.insert(msg.client_id, now_ns);

        let channel = match ChannelUri::parse(&msg.channel) {
            Ok(channel) => channel,
            Err(err) => {
                self.error_response(
                    msg.correlation_id,
                    ErrorCode::InvalidDestinationInPublication,
                    format!("invalid channel {}: {:?}", msg.channel, err),
                );
                return;
            }
        };

        let endpoint_key = channel.canonical();

        let transport_id = match self.endpoints.get_mut(&endpoint_key) {
            Some(endpoint) => {
                endpoint.refcount += 1;
                endpoint.transport_id
            }
            None => {
                let transport =
                    match UdpTransport::subscriber(&channel, self.context.multicast_interface) {
                        Ok(transport) => transport,
                        Err(err) => {
                            self.error_response(
                                msg.correlation_id,
                                ErrorCode::GenericError,
                                format!("bind failed for {}: {}", msg.channel, err),
                            );
                            return;
                        }
                    };

                let transport_id = self.next_transport_id;
                self.next_transport_id += 1;

                if self
                    .receiver
                    .offer(ReceiverCommand::RegisterTransport {
                        transport_id,
                        transport,
                    })
                    .is_err()
                {
                    self.error_response(
                        msg.correlation_id,
                        ErrorCode::GenericError,
                        "driver command queue full".to_string(),
                    );
                    return;
                }

                self.endpoints.insert(
                    endpoint_key.clone(),
                    EndpointRecord {
                        transport_id,
                        refcount: 1,
                    },
                );
                transport_id
            }
        };

        let _ = self.receiver.offer(ReceiverCommand::AddSubscription {
            transport_id,
            stream_id: msg.stream_id,
        });

        self.subscriptions.insert(
            msg.correlation_id,
            SubscriptionRecord {
                client_id: msg.client_id,
                stream_id: msg.stream_id,
                endpoint_key,
                transport_id,
            },
        );

        logging::info!(self.log, "subscription created";
                       "context" => "add_subscription",
                       "channel" => %msg.channel,
                       "stream_id" => msg.stream_id,
                       "correlation_id" => msg.correlation_id);

        self.operation_succeeded(msg.correlation_id);
    }

    fn on_remove_subscription(&mut self, msg: RemoveMessage, now_ns: u64) {
        self.clients.insert(msg.client_id, now_ns);

        let known = self
            .subscriptions
            .get(&msg.registration_id)
            .map(|record| record.client_id == msg.client_id)
            .unwrap_or(false);

        if !known {
            self.error_response(
                msg.correlation_id,
                ErrorCode::GenericError,
                format!("unknown subscription: {}", msg.registration_id),
            );
            return;
        }

        self.drop_subscription(msg.registration_id);
        self.operation_succeeded(msg.correlation_id);
    }

    fn drop_subscription(&mut self, registration_id: i64) {
        let record = match self.subscriptions.remove(&registration_id) {
            Some(record) => record,
            None => return,
        };

        let _ = self.receiver.offer(ReceiverCommand::RemoveSubscription {
            transport_id: record.transport_id,
            stream_id: record.stream_id,
        });

        let release = match self.endpoints.get_mut(&record.endpoint_key) {
            Some(endpoint) => {
                endpoint.refcount -= 1;
                endpoint.refcount == 0
            }
            None => false,
        };

        if release {
            self.endpoints.remove(&record.endpoint_key);
            let _ = self.receiver.offer(ReceiverCommand::CloseTransport {
                transport_id: record.transport_id,
            });
        }

        logging::info!(self.log, "subscription removed";
                       "context" => "remove_subscription",
                       "correlation_id" => registration_id);
    }

    fn drain_events(&mut self, now_ns: u64) -> usize {
        let mut work = 0;

        loop {
            match self.events.poll() {
                Some(ConductorEvent::CreateImage {
                    transport_id,
                    session_id,
                    stream_id,
                    initial_term_id,
                    active_term_id,
                    term_offset,
                    term_length,
                    mtu,
                    control_address,
                }) => {
                    self.on_create_image(
                        transport_id,
                        session_id,
                        stream_id,
                        initial_term_id,
                        active_term_id,
                        term_offset,
                        term_length,
                        mtu,
                        control_address,
                        now_ns,
                    );
                    work += 1;
                }
                Some(ConductorEvent::ImageInactive { correlation_id }) => {
                    self.on_image_inactive(correlation_id, now_ns);
                    work += 1;
                }
                None => break,
            }
        }

        work
    }

    fn on_create_image(
        &mut self,
        transport_id: usize,
        session_id: u32,
        stream_id: u32,
        initial_term_id: u32,
        active_term_id: u32,
        term_offset: u32,
        term_length: u32,
        mtu: u32,
        control_address: std::net::SocketAddr,
        now_ns: u64,
    ) {
        // The subscription may have raced away while the event was in
        // flight.
        let subscription = self
            .subscriptions
            .iter()
            .find(|(_, record)| record.transport_id == transport_id && record.stream_id == stream_id)
            .map(|(id, record)| (*id, record.endpoint_key.clone()));

        let (subscription_id, endpoint_key) = match subscription {
            Some(found) => found,
            None => return,
        };

        if descriptor::check_term_length(term_length).is_err() {
            logging::warn!(self.log, "setup with invalid term length";
                           "context" => "create_image",
                           "term_length" => term_length);
            return;
        }

        let correlation_id = self.ring.next_correlation_id();

        let dir = self
            .context
            .subscriptions_dir()
            .join(&endpoint_key)
            .join(format!("{}-{}", session_id, stream_id));

        let mut log_buffers = match LogBuffers::create(&dir, term_length, initial_term_id, mtu) {
            Ok(log_buffers) => log_buffers,
            Err(err) => {
                logging::error!(self.log, "image log allocation failed";
                                "context" => "create_image",
                                "error" => %err);
                return;
            }
        };
        log_buffers.set_delete_on_drop(self.context.dirs_delete_on_exit);

        let hwm = self
            .counters
            .allocate(&format!("rcv-hwm: {} {}-{}", endpoint_key, session_id, stream_id));
        let rebuild = self
            .counters
            .allocate(&format!("rcv-pos: {} {}-{}", endpoint_key, session_id, stream_id));
        let subscriber = self
            .counters
            .allocate(&format!("sub-pos: {} {}-{}", endpoint_key, session_id, stream_id));

        let (hwm, rebuild, subscriber) = match (hwm, rebuild, subscriber) {
            (Some(h), Some(r), Some(s)) => (h, r, s),
            _ => {
                logging::error!(self.log, "counters exhausted";
                                "context" => "create_image");
                return;
            }
        };

        let join_position = descriptor::compute_position(
            active_term_id,
            term_offset,
            descriptor::position_bits_to_shift(term_length),
            initial_term_id,
        );

        let image = Arc::new(PublicationImage::new(
            correlation_id,
            subscription_id,
            session_id,
            stream_id,
            transport_id,
            control_address,
            log_buffers,
            self.counters.position(hwm),
            self.counters.position(rebuild),
            self.counters.position(subscriber),
            join_position,
            now_ns,
        ));

        if self
            .receiver
            .offer(ReceiverCommand::NewImageReady {
                image: Arc::clone(&image),
            })
            .is_err()
        {
            self.counters.free(hwm);
            self.counters.free(rebuild);
            self.counters.free(subscriber);
            return;
        }

        let log_dir = dir.to_string_lossy().to_string();

        self.images.insert(
            correlation_id,
            ImageRecord {
                image,
                hwm_counter_id: hwm,
                rebuild_counter_id: rebuild,
                subscriber_counter_id: subscriber,
                lingering: false,
            },
        );

        logging::info!(self.log, "image created";
                       "context" => "create_image",
                       "session_id" => session_id,
                       "stream_id" => stream_id,
                       "source" => %control_address,
                       "correlation_id" => correlation_id);

        let response = NewConnectionMessage {
            correlation_id: subscription_id,
            session_id,
            stream_id,
            initial_term_id,
            subscriber_position_id: subscriber as i32,
            log_dir,
            source: control_address.to_string(),
        };
        self.broadcast
            .transmit(response::ON_NEW_CONNECTED_SUBSCRIPTION, &response.encode());
    }

    fn on_image_inactive(&mut self, correlation_id: i64, now_ns: u64) {
        let (subscription_id, session_id, stream_id) = match self.images.get_mut(&correlation_id) {
            Some(record) if !record.lingering => {
                record.lingering = true;
                record.image.set_status(image::LINGER);
                (
                    record.image.subscription_id(),
                    record.image.session_id(),
                    record.image.stream_id(),
                )
            }
            _ => return,
        };

        let id = self.wheel.schedule(now_ns + self.context.image_liveness_timeout_ns / 2);
        self.tasks.insert(id, TimerTask::ImageLinger(correlation_id));

        logging::info!(self.log, "image inactive";
                       "context" => "image_lifecycle",
                       "correlation_id" => correlation_id,
                       "session_id" => session_id);

        let response = InactiveConnectionMessage {
            correlation_id: subscription_id,
            session_id,
            stream_id,
        };
        self.broadcast
            .transmit(response::ON_INACTIVE_CONNECTION, &response.encode());
    }

    fn expire_timers(&mut self, now_ns: u64) -> usize {
        let mut expired = std::mem::replace(&mut self.expired, Vec::new());
        expired.clear();

        self.wheel.expire(now_ns, TIMER_LIMIT, |id| expired.push(id));

        let count = expired.len();
        for id in expired.iter() {
            match self.tasks.remove(id) {
                Some(TimerTask::ClientLivenessSweep) => self.on_client_liveness_sweep(now_ns),
                Some(TimerTask::TermCleanupSweep) => self.on_term_cleanup_sweep(now_ns),
                Some(TimerTask::PublicationLinger(registration_id)) => {
                    self.on_publication_linger_expired(registration_id)
                }
                Some(TimerTask::ImageLinger(correlation_id)) => {
                    self.on_image_linger_expired(correlation_id)
                }
                None => {}
            }
        }

        self.expired = expired;
        count
    }

    /// Reaps every resource belonging to clients that stopped sending
    /// keepalives.
    fn on_client_liveness_sweep(&mut self, now_ns: u64) {
        let timeout = self.context.client_liveness_timeout_ns;
        let mut dead: Vec<i64> = Vec::new();

        self.clients.retain(|client_id, last_seen| {
            if now_ns.saturating_sub(*last_seen) >= timeout {
                dead.push(*client_id);
                false
            } else {
                true
            }
        });

        for client_id in dead {
            logging::info!(self.log, "client timed out";
                           "context" => "client_liveness",
                           "client_id" => client_id);

            let publications: Vec<i64> = self
                .publications
                .iter()
                .filter(|(_, record)| {
                    record.publication.client_id() == client_id && !record.lingering
                })
                .map(|(id, _)| *id)
                .collect();
            for registration_id in publications {
                self.begin_publication_linger(registration_id, now_ns);
            }

            let subscriptions: Vec<i64> = self
                .subscriptions
                .iter()
                .filter(|(_, record)| record.client_id == client_id)
                .map(|(id, _)| *id)
                .collect();
            for registration_id in subscriptions {
                self.drop_subscription(registration_id);
            }
        }

        let id = self.wheel.schedule(now_ns + timeout / 2);
        self.tasks.insert(id, TimerTask::ClientLivenessSweep);
    }

    fn on_publication_linger_expired(&mut self, registration_id: i64) {
        if let Some(record) = self.publications.remove(&registration_id) {
            let _ = self.sender.offer(SenderCommand::RemovePublication { registration_id });
            self.counters.free(record.sender_counter_id);
            self.counters.free(record.limit_counter_id);

            logging::info!(self.log, "publication removed";
                           "context" => "remove_publication",
                           "correlation_id" => registration_id);
        }
    }

    fn on_image_linger_expired(&mut self, correlation_id: i64) {
        if let Some(record) = self.images.remove(&correlation_id) {
            self.counters.free(record.hwm_counter_id);
            self.counters.free(record.rebuild_counter_id);
            self.counters.free(record.subscriber_counter_id);

            logging::info!(self.log, "image removed";
                           "context" => "image_lifecycle",
                           "correlation_id" => correlation_id);
        }
    }

    /// Finds dirty partitions whose consumers have moved on and queues them
    /// for zeroing.
    fn on_term_cleanup_sweep(&mut self, now_ns: u64) {
        for record in self.publications.values() {
            let publication = &record.publication;
            let meta = publication.meta();
            let active = meta.active_index();
            let (_, _, sender_index) = publication.sender_term();

            for partition in 0..descriptor::PARTITION_COUNT {
                if meta.status(partition) == descriptor::NEEDS_CLEANING
                    && partition != active
                    && partition != sender_index
                    && !self.job_queued(partition, |target| match target {
                        CleanTarget::Publication(p) => Arc::ptr_eq(p, publication),
                        _ => false,
                    })
                {
                    self.clean_jobs.push(CleanJob {
                        target: CleanTarget::Publication(Arc::clone(publication)),
                        partition,
                        progress: 0,
                    });
                }
            }
        }

        for record in self.images.values() {
            let image = &record.image;
            let meta = image.meta();
            let bits = image.position_bits();
            let initial = image.initial_term_id();

            let busy = |position: i64| {
                descriptor::index_by_term(
                    initial,
                    descriptor::term_id_from_position(position, bits, initial),
                )
            };
            let hwm_index = busy(image.hwm_position());
            let rebuild_index = busy(image.rebuild_position());
            let subscriber_index = busy(image.subscriber_position());

            for partition in 0..descriptor::PARTITION_COUNT {
                if meta.status(partition) == descriptor::NEEDS_CLEANING
                    && partition != hwm_index
                    && partition != rebuild_index
                    && partition != subscriber_index
                    && !self.job_queued(partition, |target| match target {
                        CleanTarget::Image(i) => Arc::ptr_eq(i, image),
                        _ => false,
                    })
                {
                    self.clean_jobs.push(CleanJob {
                        target: CleanTarget::Image(Arc::clone(image)),
                        partition,
                        progress: 0,
                    });
                }
            }
        }

        let id = self.wheel.schedule(now_ns + self.context.timer_tick_ns * 4);
        self.tasks.insert(id, TimerTask::TermCleanupSweep);
    }

    fn job_queued<F: Fn(&CleanTarget) -> bool>(&self, partition: usize, matches: F) -> bool {
        self.clean_jobs
            .iter()
            .any(|job| job.partition == partition && matches(&job.target))
    }

    /// Zeroes dirty terms a bounded slice at a time.
    fn run_clean_jobs(&mut self) -> usize {
        let mut budget = CLEAN_BYTES_PER_CYCLE;
        let mut work = 0;

        while budget > 0 {
            let job = match self.clean_jobs.last_mut() {
                Some(job) => job,
                None => break,
            };

            let (term, meta, term_length) = match &job.target {
                CleanTarget::Publication(publication) => (
                    publication.term(job.partition),
                    publication.meta(),
                    publication.term_length(),
                ),
                CleanTarget::Image(image) => {
                    (image.term(job.partition), image.meta(), image.term_length())
                }
            };

            let chunk = budget.min(term_length - job.progress);
            term.set_memory(job.progress as usize, chunk as usize, 0);
            job.progress += chunk;
            budget -= chunk;
            work += 1;

            if job.progress == term_length {
                meta.set_status(job.partition, descriptor::CLEAN);
                self.clean_jobs.pop();
            }
        }

        work
    }
}

impl Agent for DriverConductor {
    fn role(&self) -> &'static str {
        "conductor"
    }

    fn do_work(&mut self) -> usize {
        let now_ns = self.clock.nanos();

        let mut work = self.drain_commands(now_ns);
        work += self.drain_events(now_ns);
        work += self.expire_timers(now_ns);
        work += self.run_clean_jobs();

        // Clients watch this stamp for driver liveness.
        self.ring.update_consumer_heartbeat_time(timestamp_millis() as i64);

        work
    }
}
