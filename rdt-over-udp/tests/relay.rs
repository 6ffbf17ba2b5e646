//! Integration tests for transfers through the impairing relay.
//!
//! Sender, relay and receiver all run on loopback.  Relays are built with
//! scripted draws so every impairment happens exactly where the test wants
//! it; once the script runs out, every draw is 99 (pass).

use std::net::SocketAddr;
use std::time::Duration;

use rdt_over_udp::{
    frame::{Endpoint, SHUTDOWN_TOKEN},
    impairment::ImpairmentConfig,
    receiver::ReceiverStats,
    relay::{Relay, RelayConfig, RelayStats},
    service::{ReceiverService, SenderConfig, SenderService},
    socket::{Socket, SocketError},
    timer::TimerConfig,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Task<T> = JoinHandle<Result<T, SocketError>>;

async fn loopback() -> Socket {
    Socket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind loopback socket")
}

/// A relay whose first draws come from `script`.
async fn spawn_relay(config: RelayConfig, script: Vec<u8>) -> (SocketAddr, Task<RelayStats>) {
    let mut script = script.into_iter();
    let relay = Relay::with_draws(
        loopback().await,
        config,
        Box::new(move || script.next().unwrap_or(99)),
    );
    let addr = relay.local_addr();
    (addr, tokio::spawn(relay.run()))
}

async fn spawn_receiver() -> (SocketAddr, mpsc::Receiver<Vec<u8>>, Task<ReceiverStats>) {
    let receiver = ReceiverService::new(loopback().await);
    let addr = receiver.local_addr();
    let (tx, rx) = mpsc::channel(8);
    (addr, rx, tokio::spawn(receiver.run(tx)))
}

/// Sender that physically talks to `relay` but addresses `receiver`.
async fn sender_via(relay: SocketAddr, receiver: SocketAddr, ack_timeout: Duration) -> SenderService {
    let config = SenderConfig {
        timer: TimerConfig {
            ack_timeout,
            max_retries: Some(10),
        },
        ..SenderConfig::default()
    };
    SenderService::new(loopback().await, relay, Endpoint::from(receiver), config)
}

async fn stop<T>(addr: SocketAddr, task: Task<T>) -> T {
    loopback().await.send_to(SHUTDOWN_TOKEN, addr).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("task did not stop")
        .expect("task panicked")
        .expect("task failed")
}

fn impairment(lost: u8, delayed: u8, corrupt: u8) -> RelayConfig {
    RelayConfig {
        impairment: ImpairmentConfig::new(lost, delayed, corrupt).unwrap(),
        base_delay: Duration::from_millis(50),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// A transparent relay forwards the frame and its ACK untouched.
#[tokio::test]
async fn lossless_relay_delivers_in_one_exchange() {
    let (rx_addr, mut messages, rx_task) = spawn_receiver().await;
    let (relay_addr, relay_task) = spawn_relay(RelayConfig::default(), vec![]).await;
    let mut sender = sender_via(relay_addr, rx_addr, Duration::from_secs(2)).await;

    let report = tokio::time::timeout(Duration::from_secs(5), sender.send_message(b"HELLO."))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.ack_exchanges, 1);
    assert_eq!(report.retransmissions, 0);
    assert_eq!(report.echoed, b"HELLO.");
    assert_eq!(messages.recv().await.unwrap(), b"HELLO.");

    let relay_stats = stop(relay_addr, relay_task).await;
    assert_eq!(relay_stats.passed, 2);
    stop(rx_addr, rx_task).await;
}

/// A dropped first frame is recovered by one timeout-driven resend.
#[tokio::test]
async fn dropped_frame_is_retransmitted() {
    let (rx_addr, mut messages, rx_task) = spawn_receiver().await;
    let (relay_addr, relay_task) = spawn_relay(impairment(50, 0, 0), vec![10]).await;
    let mut sender = sender_via(relay_addr, rx_addr, Duration::from_millis(200)).await;

    let report = tokio::time::timeout(Duration::from_secs(5), sender.send_message(b"HELLO."))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.retransmissions, 1);
    assert_eq!(report.ack_exchanges, 1);
    assert_eq!(messages.recv().await.unwrap(), b"HELLO.");

    let relay_stats = stop(relay_addr, relay_task).await;
    assert_eq!(relay_stats.dropped, 1);
    assert_eq!(relay_stats.passed, 2);
    let rx_stats = stop(rx_addr, rx_task).await;
    assert_eq!(rx_stats.accepted, 1);
}

/// A dropped ACK makes the receiver see the same frame twice; the copy is
/// acknowledged but the message is delivered once.
#[tokio::test]
async fn dropped_ack_yields_duplicate_not_double_delivery() {
    let (rx_addr, mut messages, rx_task) = spawn_receiver().await;
    // Draw 1: data frame passes.  Draw 2: its ACK is dropped.
    let (relay_addr, relay_task) = spawn_relay(impairment(50, 0, 0), vec![99, 10]).await;
    let mut sender = sender_via(relay_addr, rx_addr, Duration::from_millis(200)).await;

    let report = tokio::time::timeout(Duration::from_secs(5), sender.send_message(b"HELLO WORLD"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.retransmissions, 1);
    assert_eq!(messages.recv().await.unwrap(), b"HELLO WORLD.");

    stop(relay_addr, relay_task).await;
    let rx_stats = stop(rx_addr, rx_task).await;
    assert_eq!(rx_stats.duplicates, 1);
    assert_eq!(rx_stats.messages, 1);
}

/// A corrupted frame is rejected by the receiver and resent by the sender.
#[tokio::test]
async fn corrupted_frame_is_rejected_and_resent() {
    let (rx_addr, mut messages, rx_task) = spawn_receiver().await;
    let (relay_addr, relay_task) = spawn_relay(impairment(50, 0, 50), vec![10]).await;
    let mut sender = sender_via(relay_addr, rx_addr, Duration::from_secs(2)).await;

    let report = tokio::time::timeout(Duration::from_secs(5), sender.send_message(b"HELLO."))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.retransmissions, 1);
    assert_eq!(messages.recv().await.unwrap(), b"HELLO.");

    let relay_stats = stop(relay_addr, relay_task).await;
    assert_eq!(relay_stats.corrupted, 1);
    let rx_stats = stop(rx_addr, rx_task).await;
    assert_eq!(rx_stats.corrupted, 1);
    assert_eq!(rx_stats.accepted, 1);
    assert_eq!(rx_stats.messages, 1);
}

/// A delayed frame arrives late but inside the ACK timeout, so no resend.
#[tokio::test]
async fn delayed_frame_arrives_without_resend() {
    let (rx_addr, mut messages, rx_task) = spawn_receiver().await;
    let (relay_addr, relay_task) = spawn_relay(impairment(50, 50, 50), vec![10]).await;
    let mut sender = sender_via(relay_addr, rx_addr, Duration::from_secs(2)).await;

    let started = tokio::time::Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(5), sender.send_message(b"HELLO."))
        .await
        .unwrap()
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(75));
    assert_eq!(report.retransmissions, 0);
    assert_eq!(messages.recv().await.unwrap(), b"HELLO.");

    let relay_stats = stop(relay_addr, relay_task).await;
    assert_eq!(relay_stats.delayed, 1);
    assert_eq!(relay_stats.passed, 1);
    stop(rx_addr, rx_task).await;
}

/// Shutdown waits for delayed forwards still in flight.
#[tokio::test]
async fn relay_shutdown_drains_delayed_forwards() {
    let target = loopback().await;
    let (relay_addr, relay_task) = spawn_relay(impairment(100, 100, 100), vec![]).await;

    let frame = rdt_over_udp::frame::Frame::new(
        Endpoint::new("127.0.0.1", 1),
        Endpoint::from(target.local_addr),
        rdt_over_udp::frame::SeqBit::Zero,
        b"late".to_vec(),
    );
    let client = loopback().await;
    client.send_to(&frame.encode(), relay_addr).await.unwrap();
    client.send_to(b"garbage", relay_addr).await.unwrap();

    let stats = stop(relay_addr, relay_task).await;
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.malformed, 1);

    // The delayed copy was sent before `run` returned.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
    let (bytes, _) = target.recv_until(deadline).await.unwrap().expect("delayed frame");
    assert_eq!(bytes, frame.encode());
}
