//! Integration tests for connection establishment and teardown.
//!
//! Each test spins up a real receiver on loopback in a background task and
//! drives a sender against it.  Timeouts are shortened so loss-recovery
//! paths run in milliseconds instead of seconds.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use rftp::packet::PacketType;
use rftp::receiver::{FileReceiver, ReceiverConfig};
use rftp::sender::{FileSender, SendError, SenderConfig};
use rftp::simulator::{DropRule, Simulator, SimulatorConfig};
use rftp::state::{ReceiverState, SenderState};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sender_config(peer: SocketAddr, timeout_ms: u64) -> SenderConfig {
    let mut config = SenderConfig::new("127.0.0.1:0".parse().unwrap(), peer);
    config.timeout = Duration::from_millis(timeout_ms);
    config
}

/// Bind a receiver on an ephemeral loopback port, run it in a background
/// task, and hand back the task plus the resolved address.
async fn spawn_receiver(output_dir: &Path) -> (JoinHandle<FileReceiver>, SocketAddr) {
    let mut config = ReceiverConfig::new("127.0.0.1:0".parse().unwrap());
    config.output_dir = output_dir.to_path_buf();
    let mut receiver = FileReceiver::bind(config).await.expect("bind receiver");
    let addr = receiver.local_addr();
    let handle = tokio::spawn(async move {
        receiver.run().await.expect("receiver run");
        receiver
    });
    (handle, addr)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// A clean SYN / SYN_ACK / ACK exchange followed by FIN / FIN_ACK.
#[tokio::test]
async fn handshake_and_teardown_complete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (receiver, addr) = spawn_receiver(dir.path()).await;

    let mut sender = FileSender::bind(sender_config(addr, 1000)).await.expect("bind");
    sender.connect().await.expect("connect");
    assert_eq!(sender.state(), SenderState::Established);

    sender.disconnect().await.expect("disconnect");
    assert_eq!(sender.state(), SenderState::Closed);

    let receiver = receiver.await.expect("receiver task");
    assert_eq!(receiver.state(), ReceiverState::Closed);
}

/// Connecting to an address where nobody is listening must fail after the
/// retry budget rather than hang forever.
#[tokio::test]
async fn connect_to_silent_peer_fails_after_retries() {
    // Bind an ephemeral port, then drop the socket so nothing answers there.
    let silent_addr = {
        let tmp = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        tmp.local_addr().expect("local addr")
    };

    let mut sender = FileSender::bind(sender_config(silent_addr, 50)).await.expect("bind");
    let result = sender.connect().await;

    assert!(
        matches!(result, Err(SendError::HandshakeFailed { attempts: 5 })),
        "expected HandshakeFailed after 5 retries, got: {result:?}"
    );
    assert_eq!(sender.state(), SenderState::Closed);
}

/// Dropping the first SYN must only cost one retransmission; the connection
/// is established on the second try and the peer lock holds to one endpoint.
#[tokio::test]
async fn handshake_recovers_from_lost_syn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (receiver, addr) = spawn_receiver(dir.path()).await;

    let sim = Simulator::bind(
        addr,
        SimulatorConfig {
            drops: vec![DropRule {
                kind: PacketType::Syn,
                occurrence: 1,
            }],
            ..Default::default()
        },
    )
    .await
    .expect("bind simulator");
    let sim_addr = sim.local_addr();
    sim.spawn();

    let mut sender = FileSender::bind(sender_config(sim_addr, 50)).await.expect("bind");
    sender.connect().await.expect("connect despite SYN loss");
    assert_eq!(sender.state(), SenderState::Established);
    // First SYN, retransmitted SYN, third-handshake ACK.
    assert!(sender.stats().packets_sent >= 3);

    sender.disconnect().await.expect("disconnect");
    let receiver = receiver.await.expect("receiver task");
    assert_eq!(receiver.state(), ReceiverState::Closed);
}
