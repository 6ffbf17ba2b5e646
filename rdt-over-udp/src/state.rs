//! Finite-state-machine types for both protocol endpoints.
//!
//! Transitions are *not* implemented here; they live in [`crate::sender`]
//! and [`crate::receiver`].  Keeping the state types in their own module
//! lets the service loops and tests name states without pulling in the
//! machinery behind them.

use std::fmt;

/// Per-segment state of the stop-and-wait sender.
///
/// ```text
///  Idle ──send──▶ Sent ──ACK ok──────▶ AckOk ──next segment──▶ Idle
///                  │  ──ACK mismatch─▶ AckMismatch ──resend──▶ Sent
///                  └──timer fires────▶ TimedOut ───resend───▶ Sent
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SenderState {
    /// No segment in flight.
    #[default]
    Idle,
    /// A segment is in flight; waiting for its ACK or the timer.
    Sent,
    /// Intact ACK with the expected sequence bit arrived.
    AckOk,
    /// A reply arrived but was damaged or carried the wrong sequence bit.
    AckMismatch,
    /// The ACK timer fired with nothing received.
    TimedOut,
}

/// Outcome of validating one inbound frame at the receiver.
///
/// The receiver acknowledges in every case; only [`Reception::Accepted`]
/// changes the reassembly buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// New in-sequence data, appended to the buffer.
    Accepted,
    /// Repeat of the last accepted frame; not appended.
    Duplicate,
    /// Checksum mismatch; not appended.
    Corrupted,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for Reception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
