//! Outbound segment state for stop-and-wait reliability.
//!
//! [`ArqSession`] segments one logical message and walks each segment
//! through the [`SenderState`] machine.  It does **not** touch the socket;
//! [`crate::service::SenderService`] calls these methods and owns the actual
//! send/receive loop and the ACK timer.
//!
//! # Stop-and-Wait contract
//! - At most **one** segment is in flight at any moment.
//! - The first segment carries sequence bit 0; the bit flips after every
//!   accepted ACK.
//! - On an intact ACK with the expected bit: advance (or finish after the
//!   last segment).
//! - On a damaged ACK, a wrong bit, or a timeout: resend the same encoded
//!   frame unchanged.

use crate::frame::{Endpoint, Frame, SeqBit, FRAME_SIZE, PAYLOAD_SIZE, TERMINATOR};
use crate::state::SenderState;

/// Default number of message bytes per segment.
pub const DEFAULT_CHUNK_SIZE: usize = PAYLOAD_SIZE;

/// Cut `message` into chunks of `chunk_size` bytes.
///
/// `chunk_size` is clamped to `1..=PAYLOAD_SIZE`.  The last chunk may be
/// shorter.  An empty message yields no chunks.
pub fn segment(message: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let chunk_size = chunk_size.clamp(1, PAYLOAD_SIZE);
    message.chunks(chunk_size).map(<[u8]>::to_vec).collect()
}

/// Append the [`TERMINATOR`] unless `message` already ends with it.
pub fn with_terminator(message: &[u8]) -> Vec<u8> {
    let mut out = message.to_vec();
    if out.last() != Some(&TERMINATOR) {
        out.push(TERMINATOR);
    }
    out
}

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// The segment that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub frame: Frame,
    /// Exact bytes on the wire; retransmissions reuse them unchanged.
    pub encoded: [u8; FRAME_SIZE],
    /// How many times this segment has been transmitted (1 = first send).
    pub tx_count: u32,
}

// ---------------------------------------------------------------------------
// SessionReport
// ---------------------------------------------------------------------------

/// What happened during one message transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Number of segments the message was cut into.
    pub segments: usize,
    /// ACKs accepted (one per delivered segment).
    pub ack_exchanges: usize,
    /// Frames put on the wire, retransmissions included.
    pub transmissions: usize,
    /// Frames resent after a timeout or a mismatched reply.
    pub retransmissions: usize,
    /// Sequence bit of each segment, in sending order.
    pub sequence: Vec<SeqBit>,
    /// Concatenated payloads echoed back in accepted ACKs.
    pub echoed: Vec<u8>,
}

// ---------------------------------------------------------------------------
// ArqSession
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one logical message.
#[derive(Debug)]
pub struct ArqSession {
    source: Endpoint,
    dest: Endpoint,
    segments: Vec<Vec<u8>>,
    /// Index of the segment currently being sent.
    index: usize,
    seq: SeqBit,
    state: SenderState,
    in_flight: Option<InFlight>,
    complete: bool,
    report: SessionReport,
}

impl ArqSession {
    /// Start a session for `message`, which should already carry its
    /// terminator (see [`with_terminator`]).
    pub fn new(source: Endpoint, dest: Endpoint, message: &[u8], chunk_size: usize) -> Self {
        let segments = segment(message, chunk_size);
        let report = SessionReport {
            segments: segments.len(),
            ..SessionReport::default()
        };
        Self {
            source,
            dest,
            complete: segments.is_empty(),
            segments,
            index: 0,
            seq: SeqBit::Zero,
            state: SenderState::Idle,
            in_flight: None,
            report,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Sequence bit of the current segment.
    pub fn seq(&self) -> SeqBit {
        self.seq
    }

    /// Index of the current segment.
    pub fn segment_index(&self) -> usize {
        self.index
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// Retransmissions of the current segment so far.
    pub fn retries(&self) -> u32 {
        self.in_flight
            .as_ref()
            .map_or(0, |e| e.tx_count.saturating_sub(1))
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn into_report(self) -> SessionReport {
        self.report
    }

    /// `Idle → Sent`: build and record the frame for the current segment.
    ///
    /// Returns the bytes to transmit, or `None` when the session is complete
    /// or a segment is already in flight.
    pub fn transmit(&mut self) -> Option<[u8; FRAME_SIZE]> {
        if self.complete || !matches!(self.state, SenderState::Idle | SenderState::AckOk) {
            return None;
        }
        let frame = Frame::new(
            self.source.clone(),
            self.dest.clone(),
            self.seq,
            self.segments[self.index].clone(),
        );
        let encoded = frame.encode();
        self.in_flight = Some(InFlight {
            frame,
            encoded,
            tx_count: 1,
        });
        self.state = SenderState::Sent;
        self.report.transmissions += 1;
        self.report.sequence.push(self.seq);
        Some(encoded)
    }

    /// `(TimedOut | AckMismatch) → Sent`: resend the in-flight frame as is.
    pub fn retransmit(&mut self) -> Option<[u8; FRAME_SIZE]> {
        if !matches!(self.state, SenderState::TimedOut | SenderState::AckMismatch) {
            return None;
        }
        let entry = self.in_flight.as_mut()?;
        entry.tx_count += 1;
        self.state = SenderState::Sent;
        self.report.transmissions += 1;
        self.report.retransmissions += 1;
        Some(entry.encoded)
    }

    /// `Sent → AckOk | AckMismatch`: judge a decoded reply.
    ///
    /// An ACK must be intact, carry the current sequence bit and echo the
    /// in-flight payload.  The echo check rejects a late ACK left over from
    /// an earlier message that happens to carry the same bit.
    ///
    /// Replies outside the `Sent` state are ignored and the current state is
    /// returned unchanged.
    pub fn on_reply(&mut self, reply: &Frame) -> SenderState {
        if self.state != SenderState::Sent {
            return self.state;
        }
        let echoes_in_flight = self
            .in_flight
            .as_ref()
            .is_some_and(|entry| entry.frame.payload == reply.payload);
        if !reply.is_intact() || reply.seq != self.seq || !echoes_in_flight {
            self.state = SenderState::AckMismatch;
            return self.state;
        }

        self.report.ack_exchanges += 1;
        self.report.echoed.extend_from_slice(&reply.payload);
        self.in_flight = None;
        self.state = SenderState::AckOk;

        if self.index + 1 >= self.segments.len() {
            self.complete = true;
        } else {
            self.index += 1;
            self.seq = self.seq.flip();
        }
        self.state
    }

    /// `Sent → AckMismatch` for a reply that could not be decoded at all.
    pub fn on_malformed_reply(&mut self) -> SenderState {
        if self.state == SenderState::Sent {
            self.state = SenderState::AckMismatch;
        }
        self.state
    }

    /// `Sent → TimedOut`.
    pub fn on_timeout(&mut self) -> SenderState {
        if self.state == SenderState::Sent {
            self.state = SenderState::TimedOut;
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(message: &[u8]) -> ArqSession {
        ArqSession::new(
            Endpoint::new("127.0.0.1", 5000),
            Endpoint::new("127.0.0.1", 6000),
            message,
            DEFAULT_CHUNK_SIZE,
        )
    }

    /// Build the ACK a well-behaved receiver would send for `bytes`.
    fn ack_for(bytes: &[u8]) -> Frame {
        let frame = Frame::decode(bytes).unwrap();
        frame.ack(frame.seq)
    }

    #[test]
    fn segment_cuts_fixed_chunks() {
        let chunks = segment(b"HELLO WORLD.", 6);
        assert_eq!(chunks, vec![b"HELLO ".to_vec(), b"WORLD.".to_vec()]);

        let chunks = segment(b"abcdefgh.", 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], b".");
    }

    #[test]
    fn segment_clamps_chunk_size() {
        assert_eq!(segment(b"abcdefgh", 0).len(), 8);
        assert_eq!(segment(b"abcdefghijkl", 100).len(), 2);
        assert!(segment(b"", 6).is_empty());
    }

    #[test]
    fn terminator_appended_once() {
        assert_eq!(with_terminator(b"hi"), b"hi.");
        assert_eq!(with_terminator(b"hi."), b"hi.");
        assert_eq!(with_terminator(b""), b".");
    }

    #[test]
    fn single_segment_completes_after_one_ack() {
        let mut s = session(b"HELLO.");
        assert_eq!(s.state(), SenderState::Idle);

        let bytes = s.transmit().unwrap();
        assert_eq!(s.state(), SenderState::Sent);
        assert!(s.transmit().is_none(), "only one segment may be in flight");

        assert_eq!(s.on_reply(&ack_for(&bytes)), SenderState::AckOk);
        assert!(s.is_complete());
        assert!(s.transmit().is_none());

        let report = s.into_report();
        assert_eq!(report.segments, 1);
        assert_eq!(report.ack_exchanges, 1);
        assert_eq!(report.retransmissions, 0);
        assert_eq!(report.echoed, b"HELLO.");
    }

    #[test]
    fn sequence_alternates_without_loss() {
        let mut s = session(b"abcdefghijklmnopqrstuvwxyz.");
        while let Some(bytes) = s.transmit() {
            s.on_reply(&ack_for(&bytes));
        }
        assert!(s.is_complete());
        let report = s.into_report();
        assert_eq!(report.segments, 5);
        assert_eq!(
            report.sequence,
            vec![
                SeqBit::Zero,
                SeqBit::One,
                SeqBit::Zero,
                SeqBit::One,
                SeqBit::Zero
            ]
        );
        assert_eq!(report.echoed, b"abcdefghijklmnopqrstuvwxyz.");
    }

    #[test]
    fn wrong_sequence_ack_is_a_mismatch() {
        let mut s = session(b"HELLO.");
        let bytes = s.transmit().unwrap();
        let frame = Frame::decode(&bytes).unwrap();

        assert_eq!(s.on_reply(&frame.ack(SeqBit::One)), SenderState::AckMismatch);
        assert_eq!(s.segment_index(), 0);
        assert!(!s.is_complete());

        let resent = s.retransmit().unwrap();
        assert_eq!(resent, bytes, "retransmission must be byte-identical");
        assert_eq!(s.retries(), 1);
    }

    #[test]
    fn damaged_ack_is_a_mismatch() {
        let mut s = session(b"HELLO.");
        let bytes = s.transmit().unwrap();
        let mut ack = ack_for(&bytes);
        ack.payload[0] = b'J';
        assert_eq!(s.on_reply(&ack), SenderState::AckMismatch);
    }

    #[test]
    fn ack_for_other_payload_is_a_mismatch() {
        // Late ACK of a previous message: intact, bit 0, but not our payload.
        let mut s = session(b"BYE.");
        let bytes = s.transmit().unwrap();
        let ours = Frame::decode(&bytes).unwrap();
        let stale = Frame::new(
            ours.dest.clone(),
            ours.source.clone(),
            SeqBit::Zero,
            b"HI.".to_vec(),
        );
        assert!(stale.is_intact());

        assert_eq!(s.on_reply(&stale), SenderState::AckMismatch);
        assert!(!s.is_complete());
        assert!(s.report().echoed.is_empty());

        let resent = s.retransmit().unwrap();
        assert_eq!(s.on_reply(&ack_for(&resent)), SenderState::AckOk);
        assert_eq!(s.report().echoed, b"BYE.");
    }

    #[test]
    fn malformed_reply_is_a_mismatch() {
        let mut s = session(b"HELLO.");
        s.transmit().unwrap();
        assert_eq!(s.on_malformed_reply(), SenderState::AckMismatch);
        assert!(s.retransmit().is_some());
    }

    #[test]
    fn timeout_resends_same_segment() {
        let mut s = session(b"abcdefgh.");
        let first = s.transmit().unwrap();
        assert_eq!(s.on_timeout(), SenderState::TimedOut);
        let again = s.retransmit().unwrap();
        assert_eq!(first, again);
        assert_eq!(s.seq(), SeqBit::Zero);

        assert_eq!(s.on_reply(&ack_for(&again)), SenderState::AckOk);
        assert_eq!(s.seq(), SeqBit::One);
        assert_eq!(s.retries(), 0);

        let second = s.transmit().unwrap();
        s.on_reply(&ack_for(&second));
        assert!(s.is_complete());

        let report = s.report();
        assert_eq!(report.transmissions, 3);
        assert_eq!(report.retransmissions, 1);
        assert_eq!(report.ack_exchanges, 2);
    }

    #[test]
    fn events_outside_sent_are_ignored() {
        let mut s = session(b"HELLO.");
        assert_eq!(s.on_timeout(), SenderState::Idle);
        assert!(s.retransmit().is_none());
        assert_eq!(s.on_malformed_reply(), SenderState::Idle);
    }

    #[test]
    fn empty_message_is_already_complete() {
        let mut s = session(b"");
        assert!(s.is_complete());
        assert!(s.transmit().is_none());
    }
}
