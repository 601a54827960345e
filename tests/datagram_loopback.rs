//! Datagram server integration tests over localhost
//!
//! Exercises the full receive path (socket → decode → schedule → dispatch
//! → reply) under each concurrency strategy, including the timing
//! contracts: held bundles release on schedule, and a held bundle stalls
//! other traffic under the blocking strategy but not under the threaded
//! one.

use crossbeam_channel::{unbounded, Receiver, Sender};
use sandesh_osc::dispatch::AddressSpace;
use sandesh_osc::proto::{Bundle, Message, Packet, TimeTag};
use sandesh_osc::transport::strategy::ConcurrencyStrategy;
use sandesh_osc::transport::{Blocking, DatagramClient, DatagramServer, Threaded};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Handler invocation record: which address fired, and when
type Hit = (String, Instant);

fn recording_space(tx: Sender<Hit>, patterns: &[&str]) -> Arc<AddressSpace> {
    let space = Arc::new(AddressSpace::new());
    for pattern in patterns {
        let tx = tx.clone();
        space
            .register(pattern, move |msg: &Message, _src| {
                tx.send((msg.addr().to_string(), Instant::now())).ok();
                Ok(None)
            })
            .unwrap();
    }
    space
}

fn spawn_server(
    space: Arc<AddressSpace>,
    strategy: Box<dyn ConcurrencyStrategy>,
) -> (SocketAddr, Arc<AtomicBool>, JoinHandle<()>) {
    let mut server = DatagramServer::bind("127.0.0.1:0", space, strategy).unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_flag();
    let handle = std::thread::spawn(move || {
        server.serve().unwrap();
    });
    (addr, shutdown, handle)
}

fn stop(shutdown: Arc<AtomicBool>, handle: JoinHandle<()>) {
    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}

fn recv_hit(rx: &Receiver<Hit>, within: Duration) -> Hit {
    rx.recv_timeout(within).expect("handler was not invoked")
}

#[test]
fn test_blocking_server_delivers_and_replies() {
    let space = Arc::new(AddressSpace::new());
    space
        .register("/print", |msg: &Message, _src| {
            let mut reply = Message::new("/printed")?;
            reply.push(format!("got {}", msg.addr()));
            Ok(Some(reply))
        })
        .unwrap();
    let (addr, shutdown, handle) = spawn_server(Arc::clone(&space), Box::new(Blocking));

    let client = DatagramClient::connect(addr).unwrap();
    let msg = Message::with_args("/print", [44, 11]).unwrap();
    client.send(&Packet::Message(msg)).unwrap();

    let (reply, _source) = client
        .recv(Duration::from_secs(2))
        .unwrap()
        .expect("no reply within deadline");
    match reply {
        Packet::Message(m) => assert_eq!(m.addr(), "/printed"),
        other => panic!("expected reply message, got {:?}", other),
    }

    stop(shutdown, handle);
}

#[test]
fn test_malformed_packet_does_not_kill_server() {
    let (tx, rx) = unbounded();
    let space = recording_space(tx, &["/after"]);
    let (addr, shutdown, handle) = spawn_server(space, Box::new(Blocking));

    // Garbage, then a truncated message, straight onto the socket
    let raw = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    raw.send_to(b"not osc at all", addr).unwrap();
    raw.send_to(b"/after\0\0,i\0\0", addr).unwrap();

    let client = DatagramClient::connect(addr).unwrap();
    client
        .send(&Packet::Message(Message::new("/after").unwrap()))
        .unwrap();

    let (hit_addr, _) = recv_hit(&rx, Duration::from_secs(2));
    assert_eq!(hit_addr, "/after");

    stop(shutdown, handle);
}

#[test]
fn test_immediate_bundle_processed_without_delay() {
    let (tx, rx) = unbounded();
    let space = recording_space(tx, &["/a", "/b"]);
    let (addr, shutdown, handle) = spawn_server(space, Box::new(Blocking));

    let mut bundle = Bundle::immediate();
    bundle.push(Message::new("/a").unwrap());
    bundle.push(Message::new("/b").unwrap());

    let client = DatagramClient::connect(addr).unwrap();
    let sent_at = Instant::now();
    client.send(&bundle.into()).unwrap();

    let (first, at) = recv_hit(&rx, Duration::from_secs(2));
    assert_eq!(first, "/a");
    assert!(at.duration_since(sent_at) < Duration::from_millis(300));
    let (second, _) = recv_hit(&rx, Duration::from_secs(2));
    assert_eq!(second, "/b");

    stop(shutdown, handle);
}

#[test]
fn test_future_bundle_held_until_due() {
    let hold = Duration::from_millis(400);
    let (tx, rx) = unbounded();
    let space = recording_space(tx, &["/held"]);
    let (addr, shutdown, handle) = spawn_server(space, Box::new(Blocking));

    let mut bundle = Bundle::new(TimeTag::after(hold));
    bundle.push(Message::new("/held").unwrap());

    let client = DatagramClient::connect(addr).unwrap();
    let sent_at = Instant::now();
    client.send(&bundle.into()).unwrap();

    let (_, fired_at) = recv_hit(&rx, Duration::from_secs(3));
    let elapsed = fired_at.duration_since(sent_at);
    assert!(
        elapsed >= hold - Duration::from_millis(20),
        "bundle released early: {:?}",
        elapsed
    );

    stop(shutdown, handle);
}

/// Under the blocking strategy, a held bundle stalls everything behind it;
/// under the threaded strategy it stalls nothing.
#[test]
fn test_held_bundle_blocks_only_the_blocking_strategy() {
    let hold = Duration::from_millis(500);

    let measure = |strategy: Box<dyn ConcurrencyStrategy>| -> Duration {
        let (tx, rx) = unbounded();
        let space = recording_space(tx, &["/held", "/marker"]);
        let (addr, shutdown, handle) = spawn_server(space, strategy);

        let mut bundle = Bundle::new(TimeTag::after(hold));
        bundle.push(Message::new("/held").unwrap());

        let client = DatagramClient::connect(addr).unwrap();
        client.send(&bundle.into()).unwrap();
        // Give the server a moment to pick the bundle up, then chase it
        std::thread::sleep(Duration::from_millis(50));
        let marker_sent = Instant::now();
        client
            .send(&Packet::Message(Message::new("/marker").unwrap()))
            .unwrap();

        let marker_at = loop {
            let (hit_addr, at) = recv_hit(&rx, Duration::from_secs(3));
            if hit_addr == "/marker" {
                break at;
            }
        };
        stop(shutdown, handle);
        marker_at.duration_since(marker_sent)
    };

    let blocking_delay = measure(Box::new(Blocking));
    assert!(
        blocking_delay >= Duration::from_millis(300),
        "blocking strategy should have stalled the marker, took {:?}",
        blocking_delay
    );

    let threaded_delay = measure(Box::new(Threaded::new()));
    assert!(
        threaded_delay < Duration::from_millis(300),
        "threaded strategy should not stall the marker, took {:?}",
        threaded_delay
    );
}

/// The forked strategy handles each packet in a child process; the only
/// observable effect is what leaves over the network, so assert on the
/// reply rather than shared memory.
#[cfg(unix)]
#[test]
fn test_forked_server_replies_from_child() {
    use sandesh_osc::transport::Forked;

    let space = Arc::new(AddressSpace::new());
    space
        .register("/print", |_msg: &Message, _src| {
            let mut reply = Message::new("/printed")?;
            reply.push("from the child");
            Ok(Some(reply))
        })
        .unwrap();
    let (addr, shutdown, handle) = spawn_server(space, Box::new(Forked::new()));

    let client = DatagramClient::connect(addr).unwrap();
    client
        .send(&Packet::Message(Message::new("/print").unwrap()))
        .unwrap();

    let (reply, _) = client
        .recv(Duration::from_secs(3))
        .unwrap()
        .expect("no reply from forked child");
    match reply {
        Packet::Message(m) => {
            assert_eq!(m.addr(), "/printed");
            assert_eq!(m.args()[0].as_str(), Some("from the child"));
        }
        other => panic!("expected reply message, got {:?}", other),
    }

    stop(shutdown, handle);
}

/// Fan-out filtering (spec: target A filtered to /user/1, target B
/// unfiltered; /user/1 reaches both, /user/2 reaches only B).
#[test]
fn test_multi_target_fan_out_filtering() {
    use sandesh_osc::transport::target::{MultiClient, Target};
    use std::net::UdpSocket;

    let sink_a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sink_b = UdpSocket::bind("127.0.0.1:0").unwrap();
    sink_a
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    sink_b
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();

    let client = MultiClient::new().unwrap();
    client.set_target(
        Target::parse(&format!("{} +/user/1", sink_a.local_addr().unwrap()), 2222).unwrap(),
    );
    client.set_target(Target::parse(&sink_b.local_addr().unwrap().to_string(), 2222).unwrap());

    let recv_addr = |sink: &UdpSocket| -> Option<String> {
        let mut buf = [0u8; 1024];
        let (len, _) = sink.recv_from(&mut buf).ok()?;
        match Packet::decode(&buf[..len]).unwrap() {
            Packet::Message(m) => Some(m.addr().to_string()),
            _ => None,
        }
    };

    let sent = client
        .send(&Packet::Message(Message::new("/user/1").unwrap()))
        .unwrap();
    assert_eq!(sent, 2);
    assert_eq!(recv_addr(&sink_a).as_deref(), Some("/user/1"));
    assert_eq!(recv_addr(&sink_b).as_deref(), Some("/user/1"));

    let sent = client
        .send(&Packet::Message(Message::new("/user/2").unwrap()))
        .unwrap();
    assert_eq!(sent, 1);
    assert_eq!(recv_addr(&sink_b).as_deref(), Some("/user/2"));
    assert!(recv_addr(&sink_a).is_none(), "filtered target got /user/2");
}

/// The poll-style entry point: no packet means the idle hook fires and
/// handle_once reports false; a queued packet is handled inline.
#[test]
fn test_handle_once_polling_and_idle_hook() {
    let (tx, rx) = unbounded();
    let space = recording_space(tx, &["/frame"]);
    let mut server =
        DatagramServer::bind("127.0.0.1:0", Arc::clone(&space), Box::new(Blocking)).unwrap();
    let addr = server.local_addr().unwrap();

    let idle_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let idle = Arc::clone(&idle_count);
    server.set_idle_hook(Box::new(move || {
        idle.fetch_add(1, Ordering::Relaxed);
    }));

    // Nothing pending: times out, idle hook fires
    let handled = server.handle_once(Some(Duration::from_millis(50))).unwrap();
    assert!(!handled);
    assert_eq!(idle_count.load(Ordering::Relaxed), 1);

    // One packet pending: handled inline on this thread
    let client = DatagramClient::connect(addr).unwrap();
    client
        .send(&Packet::Message(Message::new("/frame").unwrap()))
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let handled = server.handle_once(Some(Duration::from_millis(500))).unwrap();
    assert!(handled);
    let (hit_addr, _) = recv_hit(&rx, Duration::from_millis(100));
    assert_eq!(hit_addr, "/frame");

    server.join(Duration::from_secs(1)).unwrap();
}
