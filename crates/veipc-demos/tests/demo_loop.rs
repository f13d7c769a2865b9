//! The demo loop in one process: auto sender → adapter → echo server → adapter
//! → back on the bus.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use veipc_adapter::application::{BridgeContext, BridgeManager};
use veipc_adapter::domain::BridgeOptions;
use veipc_core::bus::{BusGateway, InProcessBus, TopicSpec};
use veipc_core::domain::{SocketRole, SocketSpec};
use veipc_core::protocol::{serialize_bytes, Endianness};
use veipc_demos::auto_sender::{AutoSender, SUBSCRIBE_TOPIC};
use veipc_demos::EchoServer;

#[test]
fn test_payload_comes_back_through_the_echo_server() {
    // Arrange: echo server on its own runtime
    let echo_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let server = echo_runtime
        .block_on(EchoServer::bind("127.0.0.1:0", Endianness::Big))
        .unwrap();
    let addr = server.local_addr().unwrap();
    let serving = echo_runtime.spawn(server.serve_one());

    let bus = Arc::new(InProcessBus::new("demo-loop").unwrap());
    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
    let sink = Arc::clone(&received);
    let _replies = bus
        .create_subscriber(
            "collector",
            &TopicSpec::data(SUBSCRIBE_TOPIC),
            Arc::new(move |data: &[u8]| sink.lock().unwrap().push(data.to_vec())),
        )
        .unwrap();

    let mut manager = BridgeManager::new(BridgeContext {
        bus: Arc::clone(&bus) as Arc<dyn BusGateway>,
        participant_name: "Adapter".to_string(),
        options: BridgeOptions {
            endianness: Endianness::Big,
            ..BridgeOptions::default()
        },
    })
    .unwrap();
    let spec = SocketSpec::parse(&format!("{addr},fromSocket,toSocket"), SocketRole::Connect)
        .unwrap();
    manager.start(vec![spec]).unwrap();

    let mut sender = AutoSender::new(bus.as_ref(), "Sender", 8).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    // Act
    let payload = sender.send_once(&mut rng).unwrap();

    // Assert
    let deadline = Instant::now() + Duration::from_secs(5);
    while received.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "timed out waiting for the echo");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(received.lock().unwrap()[0], serialize_bytes(&payload));

    manager.stop();
    let stats = echo_runtime.block_on(serving).unwrap().unwrap();
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.bytes, 10);
}
