//! Inbound frame validation and message reassembly.
//!
//! The [`ReassemblyBuffer`] is responsible for everything that happens
//! *after* a raw datagram is decoded into a [`Frame`] and *before* a complete
//! message is handed to the application:
//! - Verifying the carried checksum against the payload.
//! - Detecting duplicates by comparing sequence bits, not arrival order.
//! - Appending accepted payloads and spotting the message terminator.
//! - Building the ACK frame that answers every frame, good or bad.
//!
//! The buffer does **not** send ACKs itself; it returns them to
//! [`crate::service::ReceiverService`], which owns the socket.

use crate::frame::{Frame, SeqBit};
use crate::state::Reception;

/// Result of feeding one frame into the [`ReassemblyBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub reception: Reception,
    /// Reply to send back to the frame's origin.
    pub ack: Frame,
    /// The whole message, when this frame completed it.
    pub completed: Option<Vec<u8>>,
}

/// Receive-side state, alive for the whole process.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    /// Sequence bit of the last accepted frame; `None` before the first
    /// frame of a message.
    last_accepted: Option<SeqBit>,
    assembled: Vec<u8>,
    frames_this_message: usize,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `frame`, update the buffer and build the reply.
    ///
    /// - Checksum mismatch: [`Reception::Corrupted`].  Nothing changes; the
    ///   ACK carries the *other* sequence bit so the sender resends.
    /// - Same bit as the last accepted frame: [`Reception::Duplicate`].
    ///   Nothing changes; the ACK repeats that bit.
    /// - Otherwise: [`Reception::Accepted`].  The payload is appended and
    ///   acknowledged.  A terminator completes the message and resets the
    ///   buffer.
    pub fn on_frame(&mut self, frame: &Frame) -> Delivery {
        if !frame.is_intact() {
            return Delivery {
                reception: Reception::Corrupted,
                ack: frame.ack(frame.seq.flip()),
                completed: None,
            };
        }

        if self.last_accepted == Some(frame.seq) {
            return Delivery {
                reception: Reception::Duplicate,
                ack: frame.ack(frame.seq),
                completed: None,
            };
        }

        self.assembled.extend_from_slice(&frame.payload);
        self.last_accepted = Some(frame.seq);
        self.frames_this_message += 1;

        let completed = frame.is_last_segment().then(|| {
            let message = std::mem::take(&mut self.assembled);
            self.reset();
            message
        });

        Delivery {
            reception: Reception::Accepted,
            ack: frame.ack(frame.seq),
            completed,
        }
    }

    /// Bytes accepted so far for the message in progress.
    pub fn assembled(&self) -> &[u8] {
        &self.assembled
    }

    pub fn last_accepted(&self) -> Option<SeqBit> {
        self.last_accepted
    }

    /// Frames accepted so far for the message in progress.
    pub fn frames_this_message(&self) -> usize {
        self.frames_this_message
    }

    /// Forget the message in progress.
    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.assembled.clear();
        self.frames_this_message = 0;
    }
}

/// Running totals kept by the receiver loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub corrupted: u64,
    /// Datagrams that were not valid frames at all.
    pub malformed: u64,
    /// Complete messages delivered.
    pub messages: u64,
}

impl ReceiverStats {
    pub fn record(&mut self, delivery: &Delivery) {
        match delivery.reception {
            Reception::Accepted => self.accepted += 1,
            Reception::Duplicate => self.duplicates += 1,
            Reception::Corrupted => self.corrupted += 1,
        }
        if delivery.completed.is_some() {
            self.messages += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{mark_corrupted, Endpoint};

    fn frame(seq: SeqBit, payload: &[u8]) -> Frame {
        Frame::new(
            Endpoint::new("127.0.0.1", 5000),
            Endpoint::new("127.0.0.1", 6000),
            seq,
            payload.to_vec(),
        )
    }

    #[test]
    fn initial_state() {
        let r = ReassemblyBuffer::new();
        assert!(r.assembled().is_empty());
        assert_eq!(r.last_accepted(), None);
        assert_eq!(r.frames_this_message(), 0);
    }

    #[test]
    fn first_frame_accepted_regardless_of_bit() {
        let mut r = ReassemblyBuffer::new();
        let d = r.on_frame(&frame(SeqBit::One, b"abc"));
        assert_eq!(d.reception, Reception::Accepted);
        assert_eq!(d.ack.seq, SeqBit::One);
        assert_eq!(r.assembled(), b"abc");
    }

    #[test]
    fn segments_reassemble_into_message() {
        let mut r = ReassemblyBuffer::new();
        let d1 = r.on_frame(&frame(SeqBit::Zero, b"HELLO "));
        assert_eq!(d1.completed, None);
        let d2 = r.on_frame(&frame(SeqBit::One, b"WORLD."));
        assert_eq!(d2.reception, Reception::Accepted);
        assert_eq!(d2.completed.as_deref(), Some(&b"HELLO WORLD."[..]));

        // Buffer is reset for the next message.
        assert!(r.assembled().is_empty());
        assert_eq!(r.last_accepted(), None);
        assert_eq!(r.frames_this_message(), 0);
    }

    #[test]
    fn duplicate_is_acked_but_not_appended() {
        let mut r = ReassemblyBuffer::new();
        let f = frame(SeqBit::Zero, b"HELLO ");
        r.on_frame(&f);

        let d = r.on_frame(&f);
        assert_eq!(d.reception, Reception::Duplicate);
        assert_eq!(d.ack.seq, SeqBit::Zero);
        assert_eq!(d.ack.payload, b"HELLO ");
        assert_eq!(r.assembled(), b"HELLO ");
        assert_eq!(r.frames_this_message(), 1);
    }

    #[test]
    fn corrupted_frame_is_nacked_with_other_bit() {
        let mut r = ReassemblyBuffer::new();
        r.on_frame(&frame(SeqBit::Zero, b"HELLO "));

        let mut bytes = frame(SeqBit::One, b"WORLD.").encode();
        mark_corrupted(&mut bytes);
        let damaged = Frame::decode(&bytes).unwrap();

        let d = r.on_frame(&damaged);
        assert_eq!(d.reception, Reception::Corrupted);
        assert_eq!(d.ack.seq, SeqBit::Zero);
        assert_eq!(d.completed, None);
        assert_eq!(r.assembled(), b"HELLO ");
        assert_eq!(r.last_accepted(), Some(SeqBit::Zero));
    }

    #[test]
    fn ack_is_addressed_back_to_sender() {
        let mut r = ReassemblyBuffer::new();
        let f = frame(SeqBit::Zero, b"x");
        let d = r.on_frame(&f);
        assert_eq!(d.ack.dest, f.source);
        assert_eq!(d.ack.source, f.dest);
        assert!(d.ack.is_intact());
    }

    #[test]
    fn stats_count_outcomes() {
        let mut r = ReassemblyBuffer::new();
        let mut stats = ReceiverStats::default();
        let f = frame(SeqBit::Zero, b"HELLO.");
        stats.record(&r.on_frame(&frame(SeqBit::Zero, b"abc")));
        stats.record(&r.on_frame(&frame(SeqBit::Zero, b"abc")));
        stats.record(&r.on_frame(&frame(SeqBit::One, b"def.")));
        stats.record(&r.on_frame(&f));
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.corrupted, 0);
    }
}
