//! Socket-driving service loops for the two protocol endpoints.
//!
//! # Architecture
//!
//! ```text
//!  SenderService                                ReceiverService
//!    ├── ArqSession (per message)                 ├── ReassemblyBuffer
//!    ├── RetransmitTimer                          ├── ReceiverStats
//!    └── Socket ──frames──▶ relay or receiver     └── Socket ──ACKs──▶ origin
//! ```
//!
//! The state machines in [`crate::sender`] and [`crate::receiver`] decide
//! *what* to send; the services here decide *when*, and own all I/O.
//!
//! Frames leave the sender for `next_hop` (the relay, or the receiver when
//! wired directly) while carrying the final receiver as their embedded
//! destination.  The receiver always answers the datagram's origin, so ACKs
//! retrace the path the data took.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::frame::{is_shutdown, Endpoint, Frame};
use crate::receiver::{ReassemblyBuffer, ReceiverStats};
use crate::sender::{with_terminator, ArqSession, SessionReport, DEFAULT_CHUNK_SIZE};
use crate::socket::{Socket, SocketError};
use crate::state::SenderState;
use crate::timer::{RetransmitTimer, TimerConfig};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that end a sending session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket failure; the session cannot continue.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// The retry ceiling was reached for one segment.
    #[error("segment {segment} not acknowledged after {attempts} transmissions")]
    RetriesExhausted { segment: usize, attempts: u32 },

    /// A shutdown token arrived while waiting for an ACK.
    #[error("shutdown requested while waiting for an ACK")]
    Shutdown,
}

// ---------------------------------------------------------------------------
// SenderService
// ---------------------------------------------------------------------------

/// Sender settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    /// Message bytes per segment.
    pub chunk_size: usize,
    pub timer: TimerConfig,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            timer: TimerConfig::default(),
        }
    }
}

/// Sends logical messages one at a time with stop-and-wait ARQ.
pub struct SenderService {
    socket: Socket,
    /// Where frames are physically sent.
    next_hop: SocketAddr,
    /// Embedded source of every frame.
    local: Endpoint,
    /// Embedded destination of every frame.
    dest: Endpoint,
    config: SenderConfig,
}

impl SenderService {
    /// Build a sender whose frames name `socket.local_addr` as their source.
    pub fn new(socket: Socket, next_hop: SocketAddr, dest: Endpoint, config: SenderConfig) -> Self {
        let local = Endpoint::from(socket.local_addr);
        Self {
            socket,
            next_hop,
            local,
            dest,
            config,
        }
    }

    /// Override the embedded source, e.g. when bound to `0.0.0.0`.
    pub fn with_local_endpoint(mut self, local: Endpoint) -> Self {
        self.local = local;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Deliver one logical message.
    ///
    /// A [`crate::frame::TERMINATOR`] is appended if `message` lacks one.
    /// Returns once the terminator segment is acknowledged.
    ///
    /// Datagrams queued while idle are discarded first; a queued shutdown
    /// token ends the call with [`SessionError::Shutdown`] before anything is
    /// sent.
    pub async fn send_message(&mut self, message: &[u8]) -> Result<SessionReport, SessionError> {
        for (datagram, from) in self.socket.drain_queued()? {
            if is_shutdown(&datagram) {
                log::info!("[sender] shutdown token from {from} (queued)");
                return Err(SessionError::Shutdown);
            }
            log::debug!("[sender] discarding stale datagram from {from}");
        }

        let message = with_terminator(message);
        let mut session = ArqSession::new(
            self.local.clone(),
            self.dest.clone(),
            &message,
            self.config.chunk_size,
        );
        let mut timer = RetransmitTimer::new(self.config.timer);

        while let Some(bytes) = session.transmit() {
            self.socket.send_to(&bytes, self.next_hop).await?;
            timer.arm();
            log::debug!(
                "[sender] → seg={} seq={} to {}",
                session.segment_index(),
                session.seq(),
                self.next_hop
            );
            self.await_ack(&mut session, &mut timer).await?;
        }
        timer.disarm();

        let report = session.into_report();
        log::info!(
            "[sender] delivered {} segment(s), {} retransmission(s)",
            report.segments,
            report.retransmissions
        );
        Ok(report)
    }

    /// Wait between messages for a shutdown token.
    ///
    /// Anything else that arrives meanwhile, such as a late duplicate ACK, is
    /// discarded.  Cancel-safe, so it can race console input in
    /// `tokio::select!`.
    pub async fn wait_for_shutdown(&self) -> Result<(), SessionError> {
        loop {
            let (datagram, from) = self.socket.recv_from().await?;
            if is_shutdown(&datagram) {
                log::info!("[sender] shutdown token from {from}");
                return Ok(());
            }
            log::debug!("[sender] discarding stale datagram from {from} while idle");
        }
    }

    /// Block until the in-flight segment is acknowledged, resending on
    /// timeouts and mismatched replies.
    async fn await_ack(
        &self,
        session: &mut ArqSession,
        timer: &mut RetransmitTimer,
    ) -> Result<(), SessionError> {
        loop {
            let deadline = timer.deadline().unwrap_or_else(|| timer.arm());

            let state = match self.socket.recv_until(deadline).await? {
                None => {
                    log::debug!(
                        "[sender] timeout, seg={} seq={}",
                        session.segment_index(),
                        session.seq()
                    );
                    session.on_timeout()
                }
                Some((datagram, from)) => {
                    if is_shutdown(&datagram) {
                        log::info!("[sender] shutdown token from {from}");
                        return Err(SessionError::Shutdown);
                    }
                    match Frame::decode(&datagram) {
                        Ok(reply) => {
                            let state = session.on_reply(&reply);
                            log::debug!(
                                "[sender] ← ACK seq={} intact={} → {state}",
                                reply.seq,
                                reply.is_intact()
                            );
                            state
                        }
                        Err(e) => {
                            log::warn!("[sender] malformed reply from {from}: {e}");
                            session.on_malformed_reply()
                        }
                    }
                }
            };

            match state {
                SenderState::AckOk => return Ok(()),
                SenderState::TimedOut | SenderState::AckMismatch => {
                    if !timer.may_retry(session.retries()) {
                        let attempts = session.retries() + 1;
                        log::warn!(
                            "[sender] giving up on seg={} after {attempts} transmission(s)",
                            session.segment_index()
                        );
                        return Err(SessionError::RetriesExhausted {
                            segment: session.segment_index(),
                            attempts,
                        });
                    }
                    if let Some(bytes) = session.retransmit() {
                        self.socket.send_to(&bytes, self.next_hop).await?;
                        timer.arm();
                        log::debug!(
                            "[sender] ↻ seg={} seq={} retry={}",
                            session.segment_index(),
                            session.seq(),
                            session.retries()
                        );
                    }
                }
                // Stray reply outside the Sent state; keep waiting.
                SenderState::Idle | SenderState::Sent => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ReceiverService
// ---------------------------------------------------------------------------

/// Receives frames, acknowledges each one and emits completed messages.
pub struct ReceiverService {
    socket: Socket,
    buffer: ReassemblyBuffer,
    stats: ReceiverStats,
}

impl ReceiverService {
    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            buffer: ReassemblyBuffer::new(),
            stats: ReceiverStats::default(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Serve until a shutdown token arrives.
    ///
    /// Completed messages are pushed into `sink`; a closed sink is logged
    /// and otherwise ignored.  Malformed datagrams are logged and skipped.
    pub async fn run(mut self, sink: mpsc::Sender<Vec<u8>>) -> Result<ReceiverStats, SocketError> {
        log::info!("[receiver] listening on {}", self.socket.local_addr);

        loop {
            let (datagram, from) = self.socket.recv_from().await?;

            if is_shutdown(&datagram) {
                log::info!("[receiver] shutdown token from {from}");
                break;
            }

            let frame = match Frame::decode(&datagram) {
                Ok(frame) => frame,
                Err(e) => {
                    self.stats.malformed += 1;
                    log::warn!("[receiver] dropping malformed datagram from {from}: {e}");
                    continue;
                }
            };

            let delivery = self.buffer.on_frame(&frame);
            self.stats.record(&delivery);
            self.socket.send_to(&delivery.ack.encode(), from).await?;
            log::debug!(
                "[receiver] ← seq={} {} (frame {} of message); → ACK seq={}",
                frame.seq,
                delivery.reception,
                self.buffer.frames_this_message(),
                delivery.ack.seq
            );

            if let Some(message) = delivery.completed {
                log::info!(
                    "[receiver] message completely received: {:?}",
                    String::from_utf8_lossy(&message)
                );
                if sink.send(message).await.is_err() {
                    log::warn!("[receiver] message sink closed; message discarded");
                }
            }
        }

        log::info!("[receiver] stopped: {:?}", self.stats);
        Ok(self.stats)
    }
}
