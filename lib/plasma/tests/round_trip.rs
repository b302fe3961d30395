//! End-to-end exercises of the driver: a publisher offering into a mapped
//! log, the Sender moving it over loopback UDP, the Receiver rebuilding the
//! image and a subscriber polling it back out, all coordinated through the
//! control protocol.

use plasma::client::conductor::{ClientConductor, ClientEvent};
use plasma::client::proxy::DriverProxy;
use plasma::client::ClientError;
use plasma::concurrent::broadcast::{BroadcastReceiver, CopyBroadcastReceiver};
use plasma::concurrent::counters::Position;
use plasma::concurrent::logbuffer::descriptor;
use plasma::concurrent::logbuffer::{scanner, Appended, LogAppender, LogBuffers};
use plasma::concurrent::ringbuffer::ManyToOneRingBuffer;
use plasma::concurrent::MappedFile;
use plasma::driver::context::{self, DriverContext};
use plasma::driver::MediaDriver;
use plasma::protocol::control::ErrorCode;
use plasma::protocol::frame::flags;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

const STREAM_ID: u32 = 10;
const TEST_DEADLINE: Duration = Duration::from_secs(30);

struct TestClient {
    proxy: DriverProxy,
    conductor: ClientConductor,
    values: MappedFile,
    // Keep the admin mappings alive for the client's lifetime.
    _to_driver: MappedFile,
    _to_clients: MappedFile,
}

fn launch_driver(dir: &tempfile::TempDir, term_length: u32) -> MediaDriver {
    let mut context = DriverContext::default();
    context.base_dir = dir.path().join("driver");
    context.term_length = term_length;
    context.mtu_length = 4096;
    context.initial_window = 16 * 1024;
    context.sm_timeout_ns = 20_000_000;
    context.setup_interval_ns = 20_000_000;
    context.heartbeat_interval_ns = 50_000_000;
    context.dirs_delete_on_exit = true;

    let log = ion::logging::Logger::root(ion::logging::Discard, ion::logging::o!());
    MediaDriver::launch(context, &log).expect("driver failed to launch")
}

fn connect_client(driver: &MediaDriver) -> TestClient {
    let admin = driver.admin_dir();

    let to_driver = MappedFile::open(context::to_driver_path(&admin)).unwrap();
    let to_clients = MappedFile::open(context::to_clients_path(&admin)).unwrap();
    let values = MappedFile::open(context::counter_values_path(&admin)).unwrap();

    let proxy = DriverProxy::new(ManyToOneRingBuffer::new(to_driver.buffer()));
    let conductor = ClientConductor::new(CopyBroadcastReceiver::new(BroadcastReceiver::new(
        to_clients.buffer(),
    )));

    TestClient {
        proxy,
        conductor,
        values,
        _to_driver: to_driver,
        _to_clients: to_clients,
    }
}

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn message(index: usize) -> Vec<u8> {
    let mut payload = format!("message-{:06}:", index).into_bytes();
    payload.resize(100, b'x');
    payload
}

#[test]
fn test_publish_subscribe_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let driver = launch_driver(&dir, 64 * 1024);
    let mut client = connect_client(&driver);

    let channel = format!("udp://127.0.0.1:{}", free_udp_port());

    // Register the publication; the response names the log and the limit
    // counter (correlation id routing per request).
    let pub_correlation = client.proxy.add_publication(&channel, STREAM_ID).unwrap();
    let publication = match client
        .conductor
        .await_response(&client.proxy, pub_correlation)
        .unwrap()
    {
        ClientEvent::NewPublication(msg) => msg,
        other => panic!("Unexpected response {:?}", other),
    };
    assert_eq!(publication.correlation_id, pub_correlation);
    assert_eq!(publication.stream_id, STREAM_ID);

    // Register the subscription and wait for the image to connect.
    let sub_correlation = client.proxy.add_subscription(&channel, STREAM_ID).unwrap();
    match client
        .conductor
        .await_response(&client.proxy, sub_correlation)
        .unwrap()
    {
        ClientEvent::OperationSucceeded(msg) => assert_eq!(msg.correlation_id, sub_correlation),
        other => panic!("Unexpected response {:?}", other),
    }

    let connection = match client
        .conductor
        .await_response(&client.proxy, sub_correlation)
        .unwrap()
    {
        ClientEvent::NewConnection(msg) => msg,
        other => panic!("Unexpected response {:?}", other),
    };
    assert_eq!(connection.session_id, publication.session_id);

    // Map both logs the way a client library would.
    let pub_log = LogBuffers::map(&publication.log_dir).unwrap();
    let appender = LogAppender::new(&pub_log, publication.session_id, STREAM_ID);
    let limit = Position::attach(client.values.buffer(), publication.limit_counter_id as usize);

    let image_log = LogBuffers::map(&connection.log_dir).unwrap();
    let subscriber_position = Position::attach(
        client.values.buffer(),
        connection.subscriber_position_id as usize,
    );

    let message_count = 2500usize;
    let term_length = pub_log.term_length();
    let bits = descriptor::position_bits_to_shift(term_length);
    let initial_term_id = pub_log.meta().initial_term_id();

    let deadline = Instant::now() + TEST_DEADLINE;
    let mut offered = 0usize;
    let mut cycles = 0u64;
    let mut received: Vec<Vec<u8>> = Vec::with_capacity(message_count);
    let mut position = subscriber_position.get();

    // Drive offer and poll together so flow control keeps cycling.
    while received.len() < message_count {
        assert!(Instant::now() < deadline, "round trip timed out: {} received", received.len());

        if offered < message_count {
            let payload = message(offered);
            let publisher_position = appender_position(&appender, &pub_log);

            if publisher_position < limit.get() {
                match appender.append(&payload) {
                    Appended::At(_) => offered += 1,
                    Appended::Rotated | Appended::Backed => {}
                }
            }
        }

        let term_id = descriptor::term_id_from_position(position, bits, initial_term_id);
        let offset = descriptor::term_offset_from_position(position, bits);
        let index = descriptor::index_by_term(initial_term_id, term_id);

        let (_, new_offset) = scanner::read(
            &image_log.term(index),
            offset,
            term_length,
            16,
            |header, payload| {
                assert_eq!(header.session_id, publication.session_id);
                assert_eq!(header.stream_id, STREAM_ID);
                received.push(payload.to_vec());
            },
        );

        if new_offset != offset {
            position += i64::from(new_offset - offset);
            subscriber_position.set_ordered(position);
        }

        cycles += 1;
        if cycles % 1024 == 0 {
            let _ = client.proxy.send_keepalive();
        }
    }

    // Byte-identical, in order, exactly once, across several term
    // rotations.
    assert_eq!(received.len(), message_count);
    for (index, payload) in received.iter().enumerate() {
        assert_eq!(payload, &message(index), "message {} corrupted", index);
    }
}

/// The publisher's committed tail, from the log metadata.
fn appender_position(_appender: &LogAppender, log: &LogBuffers) -> i64 {
    let meta = log.meta();
    let active = meta.active_index();
    let raw_tail = meta.raw_tail(active);
    let term_length = meta.term_length();

    descriptor::compute_position(
        descriptor::raw_tail_term_id(raw_tail),
        descriptor::raw_tail_offset(raw_tail, term_length),
        descriptor::position_bits_to_shift(term_length),
        meta.initial_term_id(),
    )
}

#[test]
fn test_fragmented_message_reassembles() {
    let dir = tempfile::tempdir().unwrap();
    let driver = launch_driver(&dir, 128 * 1024);
    let mut client = connect_client(&driver);

    let channel = format!("udp://127.0.0.1:{}", free_udp_port());

    let pub_correlation = client.proxy.add_publication(&channel, STREAM_ID).unwrap();
    let publication = match client
        .conductor
        .await_response(&client.proxy, pub_correlation)
        .unwrap()
    {
        ClientEvent::NewPublication(msg) => msg,
        other => panic!("Unexpected response {:?}", other),
    };

    let sub_correlation = client.proxy.add_subscription(&channel, STREAM_ID).unwrap();
    client
        .conductor
        .await_response(&client.proxy, sub_correlation)
        .unwrap();
    let connection = match client
        .conductor
        .await_response(&client.proxy, sub_correlation)
        .unwrap()
    {
        ClientEvent::NewConnection(msg) => msg,
        other => panic!("Unexpected response {:?}", other),
    };

    let pub_log = LogBuffers::map(&publication.log_dir).unwrap();
    let appender = LogAppender::new(&pub_log, publication.session_id, STREAM_ID);

    let image_log = LogBuffers::map(&connection.log_dir).unwrap();
    let subscriber_position = Position::attach(
        client.values.buffer(),
        connection.subscriber_position_id as usize,
    );

    // Three fragments at a 4096 MTU.
    let large: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    loop {
        match appender.append(&large) {
            Appended::At(_) => break,
            _ => {}
        }
    }

    let term_length = image_log.term_length();
    let bits = descriptor::position_bits_to_shift(term_length);
    let initial_term_id = image_log.meta().initial_term_id();

    let deadline = Instant::now() + TEST_DEADLINE;
    let mut fragments: Vec<(u8, Vec<u8>)> = Vec::new();
    let mut position = subscriber_position.get();

    while fragments.iter().map(|(_, payload)| payload.len()).sum::<usize>() < large.len() {
        assert!(Instant::now() < deadline, "fragments timed out");

        let term_id = descriptor::term_id_from_position(position, bits, initial_term_id);
        let offset = descriptor::term_offset_from_position(position, bits);
        let index = descriptor::index_by_term(initial_term_id, term_id);

        let (_, new_offset) = scanner::read(
            &image_log.term(index),
            offset,
            term_length,
            16,
            |header, payload| fragments.push((header.flags, payload.to_vec())),
        );

        if new_offset != offset {
            position += i64::from(new_offset - offset);
            subscriber_position.set_ordered(position);
        }
    }

    // BEGIN, interior, END flags; payload reassembles byte-identical.
    assert_eq!(fragments.len(), 3);
    assert_eq!(fragments[0].0 & flags::BEGIN, flags::BEGIN);
    assert_eq!(fragments[0].0 & flags::END, 0);
    assert_eq!(fragments[1].0 & (flags::BEGIN | flags::END), 0);
    assert_eq!(fragments[2].0 & flags::END, flags::END);

    let reassembled: Vec<u8> = fragments.into_iter().flat_map(|(_, payload)| payload).collect();
    assert_eq!(reassembled, large);
}

#[test]
fn test_control_protocol_errors() {
    let dir = tempfile::tempdir().unwrap();
    let driver = launch_driver(&dir, 64 * 1024);
    let mut client = connect_client(&driver);

    let channel = format!("udp://127.0.0.1:{}", free_udp_port());

    // A malformed channel is rejected with the offending correlation id.
    let correlation = client.proxy.add_publication("udp://not a channel", STREAM_ID).unwrap();
    match client.conductor.await_response(&client.proxy, correlation) {
        Err(ClientError::Rejected(response)) => {
            assert_eq!(response.offending_correlation_id, correlation);
            assert_eq!(response.code, ErrorCode::InvalidDestinationInPublication);
        }
        other => panic!("Unexpected outcome {:?}", other),
    }

    // Duplicate (channel, stream) publications are refused.
    let first = client.proxy.add_publication(&channel, STREAM_ID).unwrap();
    client.conductor.await_response(&client.proxy, first).unwrap();

    let duplicate = client.proxy.add_publication(&channel, STREAM_ID).unwrap();
    match client.conductor.await_response(&client.proxy, duplicate) {
        Err(ClientError::Rejected(response)) => {
            assert_eq!(response.offending_correlation_id, duplicate);
            assert_eq!(response.code, ErrorCode::PublicationChannelAlreadyExists);
        }
        other => panic!("Unexpected outcome {:?}", other),
    }

    // Removing something that was never added names the unknown registration.
    let unknown = client.proxy.remove_publication(123_456).unwrap();
    match client.conductor.await_response(&client.proxy, unknown) {
        Err(ClientError::Rejected(response)) => {
            assert_eq!(response.offending_correlation_id, unknown);
            assert_eq!(response.code, ErrorCode::PublicationChannelUnknown);
        }
        other => panic!("Unexpected outcome {:?}", other),
    }

    // A well-formed removal of the live publication succeeds.
    let removal = client.proxy.remove_publication(first).unwrap();
    match client.conductor.await_response(&client.proxy, removal).unwrap() {
        ClientEvent::OperationSucceeded(msg) => assert_eq!(msg.correlation_id, removal),
        other => panic!("Unexpected response {:?}", other),
    }
}
