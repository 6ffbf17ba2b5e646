//! Impairing relay between sender and receiver.
//!
//! The relay forwards every datagram to the destination embedded in the
//! frame itself (see [`peek_destination`]), after one draw in
//! `0..DRAW_RANGE` decides its fate:
//!
//! | Outcome   | Effect                                                   |
//! |-----------|----------------------------------------------------------|
//! | `Pass`    | Forwarded at once.                                       |
//! | `Delay`   | Forwarded from its own task after 1.5x to 2.0x the base. |
//! | `Corrupt` | Last byte overwritten with `C`, then forwarded.          |
//! | `Drop`    | Discarded.                                               |
//!
//! ACKs travel through the same loop, so they are impaired too.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;

use crate::frame::{is_shutdown, mark_corrupted, peek_destination, Endpoint};
use crate::impairment::{classify, Impairment, ImpairmentConfig, DRAW_RANGE};
use crate::socket::{resolve, Socket, SocketError};

/// Source of draws in `0..DRAW_RANGE`.
pub type DrawFn = dyn FnMut() -> u8 + Send;

/// Relay settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub impairment: ImpairmentConfig,
    /// Delayed frames wait between 1.5x and 2.0x this long.
    pub base_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            impairment: ImpairmentConfig::default(),
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Per-outcome datagram counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub passed: u64,
    pub delayed: u64,
    pub corrupted: u64,
    pub dropped: u64,
    /// Datagrams with no readable or resolvable destination.
    pub malformed: u64,
}

pub struct Relay {
    socket: Arc<Socket>,
    config: RelayConfig,
    draw: Box<DrawFn>,
    jitter: StdRng,
    /// Embedded destinations already resolved.
    routes: HashMap<Endpoint, SocketAddr>,
}

impl Relay {
    /// Relay drawing from an OS-seeded generator.
    pub fn new(socket: Socket, config: RelayConfig) -> Self {
        let mut rng = StdRng::from_entropy();
        let draw = Box::new(move || rng.gen_range(0..DRAW_RANGE));
        Self {
            socket: Arc::new(socket),
            config,
            draw,
            jitter: StdRng::from_entropy(),
            routes: HashMap::new(),
        }
    }

    /// Relay whose draws and delays are reproducible from `seed`.
    pub fn with_seed(socket: Socket, config: RelayConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let draw = Box::new(move || rng.gen_range(0..DRAW_RANGE));
        Self {
            socket: Arc::new(socket),
            config,
            draw,
            jitter: StdRng::seed_from_u64(seed.wrapping_add(1)),
            routes: HashMap::new(),
        }
    }

    /// Relay with a caller-supplied draw source.
    pub fn with_draws(socket: Socket, config: RelayConfig, draw: Box<DrawFn>) -> Self {
        Self {
            socket: Arc::new(socket),
            config,
            draw,
            jitter: StdRng::from_entropy(),
            routes: HashMap::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    fn delay(&mut self) -> Duration {
        self.config
            .base_delay
            .mul_f64(self.jitter.gen_range(1.5..=2.0))
    }

    /// Address for an embedded destination; each endpoint is looked up once.
    async fn route(&mut self, dest: Endpoint) -> Result<SocketAddr, SocketError> {
        if let Some(&addr) = self.routes.get(&dest) {
            return Ok(addr);
        }
        let addr = resolve(&dest).await?;
        log::debug!("[relay] route {dest} → {addr}");
        self.routes.insert(dest, addr);
        Ok(addr)
    }

    /// Forward datagrams until a shutdown token arrives, then wait for all
    /// delayed forwards to finish.
    pub async fn run(mut self) -> Result<RelayStats, SocketError> {
        let mut stats = RelayStats::default();
        let mut pending = JoinSet::new();

        log::info!(
            "[relay] listening on {} ({:?})",
            self.socket.local_addr,
            self.config.impairment
        );

        loop {
            let (mut datagram, from) = self.socket.recv_from().await?;

            if is_shutdown(&datagram) {
                log::info!("[relay] shutdown token from {from}");
                break;
            }

            let dest = match peek_destination(&datagram) {
                Ok(dest) => dest,
                Err(e) => {
                    stats.malformed += 1;
                    log::warn!("[relay] dropping datagram from {from}: {e}");
                    continue;
                }
            };
            let to = match self.route(dest).await {
                Ok(addr) => addr,
                Err(e) => {
                    stats.malformed += 1;
                    log::warn!("[relay] dropping datagram from {from}: {e}");
                    continue;
                }
            };

            let draw = (self.draw)();
            match classify(draw, &self.config.impairment) {
                Impairment::Pass => {
                    stats.passed += 1;
                    self.socket.send_to(&datagram, to).await?;
                    log::debug!("[relay] {from} → {to} pass (draw {draw})");
                }
                Impairment::Corrupt => {
                    stats.corrupted += 1;
                    mark_corrupted(&mut datagram);
                    self.socket.send_to(&datagram, to).await?;
                    log::debug!("[relay] {from} → {to} corrupted (draw {draw})");
                }
                Impairment::Drop => {
                    stats.dropped += 1;
                    log::debug!("[relay] {from} → {to} dropped (draw {draw})");
                }
                Impairment::Delay => {
                    stats.delayed += 1;
                    let wait = self.delay();
                    let socket = Arc::clone(&self.socket);
                    log::debug!("[relay] {from} → {to} delayed {wait:?} (draw {draw})");
                    pending.spawn(async move {
                        tokio::time::sleep(wait).await;
                        if let Err(e) = socket.send_to(&datagram, to).await {
                            log::warn!("[relay] delayed forward to {to} failed: {e}");
                        }
                    });
                }
            }

            while let Some(done) = pending.try_join_next() {
                if let Err(e) = done {
                    log::warn!("[relay] delayed forward task failed: {e}");
                }
            }
        }

        while let Some(done) = pending.join_next().await {
            if let Err(e) = done {
                log::warn!("[relay] delayed forward task failed: {e}");
            }
        }

        log::info!("[relay] stopped: {stats:?}");
        Ok(stats)
    }
}
