//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and dispatches into **sender**, **receiver**,
//! **relay** or **shutdown** mode.  All protocol work is delegated to library
//! modules; `main.rs` owns only process setup (logging, argument parsing,
//! console I/O).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use rdt_over_udp::frame::{Endpoint, SHUTDOWN_TOKEN};
use rdt_over_udp::impairment::ImpairmentConfig;
use rdt_over_udp::relay::{Relay, RelayConfig};
use rdt_over_udp::sender::DEFAULT_CHUNK_SIZE;
use rdt_over_udp::service::{ReceiverService, SenderConfig, SenderService, SessionError};
use rdt_over_udp::socket::{resolve, Socket};
use rdt_over_udp::timer::TimerConfig;

/// Stop-and-wait reliable messaging over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Read lines from stdin and deliver each one as a message.
    Sender {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Relay to send through (host:port); omit to send straight to the receiver.
        #[arg(short, long)]
        relay: Option<String>,
        /// Receiver host written into every frame.
        #[arg(long)]
        dest_host: String,
        /// Receiver port written into every frame.
        #[arg(long)]
        dest_port: u16,
        /// Host to advertise as the frame source instead of the bind address.
        #[arg(long)]
        advertise: Option<String>,
        /// ACK timeout in milliseconds.
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
        /// Give up on a segment after this many retransmissions.
        #[arg(long)]
        max_retries: Option<u32>,
        /// Message bytes per frame (1 to 6).
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Send this one message and exit instead of reading stdin.
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Receive messages and print each one when complete.
    Receiver {
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
    /// Forward frames, dropping, delaying and corrupting some of them.
    Relay {
        #[arg(short, long, default_value = "0.0.0.0:8000")]
        bind: SocketAddr,
        /// Loss threshold (percent).
        #[arg(long, default_value_t = 0)]
        lost: u8,
        /// Delay threshold (percent).
        #[arg(long, default_value_t = 0)]
        delayed: u8,
        /// Corruption threshold (percent).
        #[arg(long, default_value_t = 0)]
        corrupt: u8,
        /// Read the three percentages as independent shares, not thresholds.
        #[arg(long)]
        shares: bool,
        /// Base delay in milliseconds for delayed frames.
        #[arg(long, default_value_t = 1_000)]
        base_delay_ms: u64,
        /// Seed for reproducible impairment.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Ask a running sender, receiver or relay to stop.
    Shutdown {
        /// Address of the process to stop (host:port).
        target: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Sender {
            bind,
            relay,
            dest_host,
            dest_port,
            advertise,
            timeout_ms,
            max_retries,
            chunk_size,
            message,
        } => {
            let dest = Endpoint::new(dest_host, dest_port);
            let next_hop = match relay {
                Some(relay) => lookup(&relay).await?,
                None => resolve(&dest).await?,
            };
            let config = SenderConfig {
                chunk_size,
                timer: TimerConfig {
                    ack_timeout: Duration::from_millis(timeout_ms),
                    max_retries,
                },
            };
            let socket = Socket::bind(bind).await?;
            let mut sender = SenderService::new(socket, next_hop, dest, config);
            if let Some(host) = advertise {
                let port = sender.local_addr().port();
                sender = sender.with_local_endpoint(Endpoint::new(host, port));
            }
            log::info!("Starting sender on {}, next hop {next_hop}", sender.local_addr());

            match message {
                Some(message) => {
                    send_line(&mut sender, &message).await?;
                }
                None => {
                    let mut lines = BufReader::new(tokio::io::stdin()).lines();
                    loop {
                        // A shutdown token may arrive while waiting on the console.
                        let line = tokio::select! {
                            line = lines.next_line() => line?,
                            stop = sender.wait_for_shutdown() => {
                                stop?;
                                None
                            }
                        };
                        let Some(line) = line else { break };
                        if line.trim() == "done" || !send_line(&mut sender, &line).await? {
                            break;
                        }
                    }
                }
            }
            log::info!("Sender finished");
        }
        Mode::Receiver { bind } => {
            let receiver = ReceiverService::new(Socket::bind(bind).await?);
            log::info!("Starting receiver on {}", receiver.local_addr());

            let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);
            let printer = tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    println!("{}", String::from_utf8_lossy(&message));
                }
            });
            let stats = receiver.run(tx).await?;
            printer.await?;
            log::info!("Receiver finished: {stats:?}");
        }
        Mode::Relay {
            bind,
            lost,
            delayed,
            corrupt,
            shares,
            base_delay_ms,
            seed,
        } => {
            let impairment = if shares {
                ImpairmentConfig::from_shares(lost, delayed, corrupt)?
            } else {
                ImpairmentConfig::new(lost, delayed, corrupt)?
            };
            let config = RelayConfig {
                impairment,
                base_delay: Duration::from_millis(base_delay_ms),
            };
            let socket = Socket::bind(bind).await?;
            let relay = match seed {
                Some(seed) => Relay::with_seed(socket, config, seed),
                None => Relay::new(socket, config),
            };
            log::info!("Starting relay on {}", relay.local_addr());
            let stats = relay.run().await?;
            log::info!("Relay finished: {stats:?}");
        }
        Mode::Shutdown { target } => {
            let target = lookup(&target).await?;
            let socket = Socket::bind("0.0.0.0:0".parse()?).await?;
            socket.send_to(SHUTDOWN_TOKEN, target).await?;
            log::info!("Sent shutdown token to {target}");
        }
    }

    Ok(())
}

async fn lookup(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("cannot resolve {addr}"))?
        .next()
        .with_context(|| format!("no address for {addr}"))
}

/// Send one console line; `Ok(false)` when a shutdown token stopped it.
async fn send_line(sender: &mut SenderService, line: &str) -> Result<bool> {
    match sender.send_message(line.as_bytes()).await {
        Ok(report) => {
            println!(
                "delivered {:?} in {} segment(s), {} retransmission(s)",
                String::from_utf8_lossy(&report.echoed),
                report.segments,
                report.retransmissions
            );
            Ok(true)
        }
        Err(SessionError::Shutdown) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
