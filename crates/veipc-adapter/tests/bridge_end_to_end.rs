//! End-to-end tests: real loopback sockets, the bridge manager and an
//! in-process bus.
//!
//! The manager drives its own runtime, so these are plain `#[test]`s using
//! blocking std sockets on the peer side.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use veipc_adapter::application::{BridgeContext, BridgeError, BridgeManager};
use veipc_adapter::domain::BridgeOptions;
use veipc_adapter::infrastructure::EndpointState;
use veipc_core::bus::{BusGateway, InProcessBus, Subscription, TopicSpec};
use veipc_core::domain::{SocketRole, SocketSpec, SpecError};
use veipc_core::protocol::{serialize_bytes, Endianness};

// ── Helpers ───────────────────────────────────────────────────────────────────

type Received = Arc<Mutex<Vec<Vec<u8>>>>;

fn manager(bus: Arc<InProcessBus>, endianness: Endianness) -> BridgeManager {
    BridgeManager::new(BridgeContext {
        bus,
        participant_name: "E2E".to_string(),
        options: BridgeOptions {
            endianness,
            connect_timeout: Duration::from_secs(2),
            ..BridgeOptions::default()
        },
    })
    .unwrap()
}

fn spec(listener: &TcpListener, to: &str, from: &str) -> SocketSpec {
    let addr = listener.local_addr().unwrap();
    SocketSpec::parse(&format!("{addr},{to},{from}"), SocketRole::Connect).unwrap()
}

fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn collect(bus: &InProcessBus, topic: &str) -> (Subscription, Received) {
    let received: Received = Arc::default();
    let sink = Arc::clone(&received);
    let sub = bus
        .create_subscriber(
            "collector",
            &TopicSpec::data(topic),
            Arc::new(move |data: &[u8]| sink.lock().unwrap().push(data.to_vec())),
        )
        .unwrap();
    (sub, received)
}

/// Republishes everything on `from` to `to`, like a bus-side echo service.
fn bus_echo(bus: &InProcessBus, from: &str, to: &str) -> Subscription {
    let publisher = bus.create_publisher("echo", &TopicSpec::data(to)).unwrap();
    bus.create_subscriber(
        "echo",
        &TopicSpec::data(from),
        Arc::new(move |data: &[u8]| {
            let _ = publisher.publish(data);
        }),
    )
    .unwrap()
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn test_little_endian_frame_is_published_in_envelope() {
    // Arrange
    let bus = Arc::new(InProcessBus::new("e2e").unwrap());
    let (_sub, received) = collect(&bus, "toSocket");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut mgr = manager(Arc::clone(&bus), Endianness::Little);
    mgr.start(vec![spec(&listener, "toSocket", "fromSocket")])
        .unwrap();
    let mut peer = accept(&listener);

    // Act
    peer.write_all(&[0x02, 0x00, 0xDE, 0xAD]).unwrap();

    // Assert
    wait_until("publish", || !received.lock().unwrap().is_empty());
    assert_eq!(
        received.lock().unwrap()[0],
        vec![0x02, 0x00, 0x00, 0x00, 0xDE, 0xAD]
    );
    mgr.stop();
}

#[test]
fn test_big_endian_frame_round_trips_through_bus() {
    // Arrange: the bus echoes toSocket back onto fromSocket
    let bus = Arc::new(InProcessBus::new("e2e").unwrap());
    let _echo = bus_echo(&bus, "toSocket", "fromSocket");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut mgr = manager(Arc::clone(&bus), Endianness::Big);
    mgr.start(vec![spec(&listener, "toSocket", "fromSocket")])
        .unwrap();
    let mut peer = accept(&listener);

    // Act
    peer.write_all(&[0x00, 0x02, 0xDE, 0xAD]).unwrap();
    let mut echoed = [0u8; 4];
    peer.read_exact(&mut echoed).unwrap();

    // Assert
    assert_eq!(echoed, [0x00, 0x02, 0xDE, 0xAD]);
    mgr.stop();
}

#[test]
fn test_bus_messages_reach_socket_in_order() {
    // Arrange
    let bus = Arc::new(InProcessBus::new("e2e").unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut mgr = manager(Arc::clone(&bus), Endianness::Little);
    mgr.start(vec![spec(&listener, "toSocket", "fromSocket")])
        .unwrap();
    let mut peer = accept(&listener);
    let publisher = bus
        .create_publisher("sender", &TopicSpec::data("fromSocket"))
        .unwrap();

    // Act
    for i in 0..10u8 {
        publisher.publish(&serialize_bytes(&[i])).unwrap();
    }
    let mut bytes = [0u8; 30];
    peer.read_exact(&mut bytes).unwrap();

    // Assert: ten 3-byte frames, payloads 0..10 in order
    let payloads: Vec<u8> = bytes.chunks(3).map(|f| f[2]).collect();
    assert_eq!(payloads, (0..10).collect::<Vec<u8>>());
    assert!(bytes.chunks(3).all(|f| f[0] == 1 && f[1] == 0));
    mgr.stop();
}

#[test]
fn test_duplicate_socket_fails_before_any_connection() {
    let bus = Arc::new(InProcessBus::new("e2e").unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let mut mgr = manager(bus, Endianness::Little);

    let result = mgr.start(vec![spec(&listener, "a", "b"), spec(&listener, "c", "d")]);

    assert!(matches!(
        result,
        Err(BridgeError::Spec(SpecError::DuplicateSocket { .. }))
    ));
    assert!(listener.accept().is_err());
}

#[test]
fn test_short_read_on_one_session_leaves_the_other_running() {
    // Arrange
    let bus = Arc::new(InProcessBus::new("e2e").unwrap());
    let (_sub, received) = collect(&bus, "toB");
    let listener_a = TcpListener::bind("127.0.0.1:0").unwrap();
    let listener_b = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut mgr = manager(Arc::clone(&bus), Endianness::Little);
    mgr.start(vec![
        spec(&listener_a, "toA", "fromA"),
        spec(&listener_b, "toB", "fromB"),
    ])
    .unwrap();
    let mut peer_a = accept(&listener_a);
    let mut peer_b = accept(&listener_b);

    // Act: A announces 4 bytes, sends 1 and hangs up
    peer_a.write_all(&[0x04, 0x00, 0x01]).unwrap();
    drop(peer_a);
    let label_a = listener_a.local_addr().unwrap().to_string();
    wait_until("session A to end", || {
        mgr.session_states()
            .iter()
            .any(|(label, state)| *label == label_a && *state == EndpointState::Disconnected)
    });
    peer_b.write_all(&[0x01, 0x00, 0x42]).unwrap();

    // Assert: B still bridges
    wait_until("publish from B", || !received.lock().unwrap().is_empty());
    assert_eq!(received.lock().unwrap()[0], vec![1, 0, 0, 0, 0x42]);
    let label_b = listener_b.local_addr().unwrap().to_string();
    assert!(mgr
        .session_states()
        .iter()
        .any(|(label, state)| *label == label_b && *state == EndpointState::Connected));
    mgr.stop();
}

#[test]
fn test_stop_during_inbound_traffic_is_clean() {
    // Arrange: a publisher hammering fromSocket from another thread
    let bus = Arc::new(InProcessBus::new("e2e").unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut mgr = manager(Arc::clone(&bus), Endianness::Little);
    mgr.start(vec![spec(&listener, "toSocket", "fromSocket")])
        .unwrap();
    let mut peer = accept(&listener);
    let drain = thread::spawn(move || {
        let mut buf = [0u8; 4096];
        while matches!(peer.read(&mut buf), Ok(n) if n > 0) {}
    });
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let sender_bus = Arc::clone(&bus);
    let sender = thread::spawn(move || {
        let publisher = sender_bus
            .create_publisher("flood", &TopicSpec::data("fromSocket"))
            .unwrap();
        let message = serialize_bytes(&[0xAB; 64]);
        while flag.load(Ordering::Relaxed) {
            let _ = publisher.publish(&message);
        }
    });
    thread::sleep(Duration::from_millis(50));

    // Act
    mgr.stop();
    running.store(false, Ordering::Relaxed);

    // Assert: every thread finishes and the session is down
    sender.join().unwrap();
    drain.join().unwrap();
    assert!(mgr
        .session_states()
        .iter()
        .all(|(_, state)| *state == EndpointState::Disconnected));
}

#[test]
fn test_listen_sockets_bridge_peers_that_connect_in_reverse_order() {
    // Arrange: two listen sockets on ports that were free a moment ago
    let free_addr = || {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let (addr_a, addr_b) = (free_addr(), free_addr());
    let bus = Arc::new(InProcessBus::new("e2e").unwrap());
    let (_sub_a, to_a) = collect(&bus, "toA");
    let (_sub_b, to_b) = collect(&bus, "toB");
    let mut mgr = manager(Arc::clone(&bus), Endianness::Little);
    let specs = vec![
        SocketSpec::parse(&format!("{addr_a},toA,fromA"), SocketRole::Listen).unwrap(),
        SocketSpec::parse(&format!("{addr_b},toB,fromB"), SocketRole::Listen).unwrap(),
    ];
    let starting = thread::spawn(move || mgr.start(specs).map(|()| mgr));

    // Act: B's peer connects first, while A is still waiting
    let dial = |addr: &str| {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(Duration::from_secs(5)))
                        .unwrap();
                    return stream;
                }
                Err(e) => {
                    assert!(Instant::now() < deadline, "{addr} never listened: {e}");
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
    };
    let mut peer_b = dial(&addr_b);
    let mut peer_a = dial(&addr_a);
    let mut mgr = starting.join().unwrap().unwrap();

    peer_a.write_all(&[0x01, 0x00, 0x42]).unwrap();
    peer_b.write_all(&[0x01, 0x00, 0x43]).unwrap();
    let from_a = bus
        .create_publisher("sender-a", &TopicSpec::data("fromA"))
        .unwrap();
    let from_b = bus
        .create_publisher("sender-b", &TopicSpec::data("fromB"))
        .unwrap();
    from_a.publish(&serialize_bytes(&[0xA0])).unwrap();
    from_b.publish(&serialize_bytes(&[0xB0])).unwrap();

    // Assert: each socket talks only to its own pair of topics
    wait_until("frame from A", || !to_a.lock().unwrap().is_empty());
    wait_until("frame from B", || !to_b.lock().unwrap().is_empty());
    assert_eq!(to_a.lock().unwrap()[0], vec![0x01, 0x00, 0x00, 0x00, 0x42]);
    assert_eq!(to_b.lock().unwrap()[0], vec![0x01, 0x00, 0x00, 0x00, 0x43]);

    let mut frame = [0u8; 3];
    peer_a.read_exact(&mut frame).unwrap();
    assert_eq!(frame, [0x01, 0x00, 0xA0]);
    peer_b.read_exact(&mut frame).unwrap();
    assert_eq!(frame, [0x01, 0x00, 0xB0]);

    assert!(mgr
        .session_states()
        .iter()
        .all(|(_, state)| *state == EndpointState::Connected));
    mgr.stop();
}
