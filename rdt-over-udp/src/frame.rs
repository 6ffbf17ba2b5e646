//! Wire-format definitions for protocol frames.
//!
//! Every datagram exchanged between sender, relay and receiver is a
//! [`Frame`], always exactly [`FRAME_SIZE`] bytes long.  This module is
//! responsible for:
//! - Defining the on-wire layout (address fields, sequence digit, checksum,
//!   payload).
//! - Serialising a [`Frame`] into a fixed-size buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Frame`], returning errors
//!   for mis-sized or malformed input.
//! - Computing the additive payload [`checksum`].
//!
//! No I/O happens here; this is pure data transformation.  Every other module
//! goes through this one for field offsets.
//!
//! # Wire format
//!
//! All fields are ASCII text, zero-padded on the right.
//!
//! ```text
//!  0                16      22               38      44 45  48      54
//! +----------------+-------+----------------+-------+--+---+-------+
//! |  source host   | sport |   dest host    | dport |sq|sum|payload|
//! +----------------+-------+----------------+-------+--+---+-------+
//! ```
//!
//! | Offset | Field              | Width |
//! |--------|--------------------|-------|
//! | 0      | source host        | 16    |
//! | 16     | source port        | 6     |
//! | 22     | destination host   | 16    |
//! | 38     | destination port   | 6     |
//! | 44     | sequence digit     | 1     |
//! | 45     | checksum           | 3     |
//! | 48     | payload            | 6     |

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

/// Total encoded size of every frame.
pub const FRAME_SIZE: usize = 54;

/// Width of a host field.
pub const HOST_WIDTH: usize = 16;

/// Width of a port field.
pub const PORT_WIDTH: usize = 6;

/// Width of the checksum field.
pub const CHECKSUM_WIDTH: usize = 3;

/// Payload bytes that fit after the header.
pub const PAYLOAD_SIZE: usize = FRAME_SIZE - OFF_PAYLOAD;

/// Byte that marks the final segment of a logical message (`.`).
pub const TERMINATOR: u8 = b'.';

/// Control datagram that asks any role to leave its service loop.
pub const SHUTDOWN_TOKEN: &[u8] = b"<shutdown/>";

/// Byte written over the payload by the relay when it corrupts a frame.
pub const CORRUPTION_MARKER: u8 = b'C';

// Byte offsets of each field within the encoded frame.
const OFF_SRC_HOST: usize = 0;
const OFF_SRC_PORT: usize = 16;
const OFF_DST_HOST: usize = 22;
const OFF_DST_PORT: usize = 38;
const OFF_SEQ: usize = 44;
const OFF_CHECKSUM: usize = 45;
const OFF_PAYLOAD: usize = 48;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise when parsing a raw datagram as a [`Frame`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The datagram is not exactly [`FRAME_SIZE`] bytes.
    #[error("frame must be {expected} bytes, got {actual}")]
    WrongSize { expected: usize, actual: usize },

    /// The sequence byte is neither `'0'` nor `'1'`.
    #[error("invalid sequence digit {0:#04x}")]
    InvalidSequence(u8),

    /// A port field is not a decimal `u16`.
    #[error("invalid port field {0:?}")]
    InvalidPort(String),

    /// A host field is empty or not ASCII text.
    #[error("invalid host field {0:?}")]
    InvalidHost(String),

    /// The checksum field is not three ASCII digits.
    #[error("invalid checksum field {0:?}")]
    InvalidChecksum(String),
}

// ---------------------------------------------------------------------------
// Field types
// ---------------------------------------------------------------------------

/// A host/port pair as carried inside a frame.
///
/// The host is kept as text: the relay resolves it only when forwarding.
/// Hosts longer than [`HOST_WIDTH`] bytes are truncated on encode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The alternating one-bit sequence number of stop-and-wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SeqBit {
    #[default]
    Zero,
    One,
}

impl SeqBit {
    /// The other sequence value.
    pub fn flip(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }

    /// ASCII digit used on the wire.
    pub fn as_digit(self) -> u8 {
        match self {
            Self::Zero => b'0',
            Self::One => b'1',
        }
    }

    pub fn from_digit(digit: u8) -> Option<Self> {
        match digit {
            b'0' => Some(Self::Zero),
            b'1' => Some(Self::One),
            _ => None,
        }
    }
}

impl fmt::Display for SeqBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_digit() as char)
    }
}

/// Three-character additive checksum code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_WIDTH]);

impl Checksum {
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_WIDTH] {
        &self.0
    }

    fn from_field(field: &[u8]) -> Result<Self, FrameError> {
        if field.len() != CHECKSUM_WIDTH || !field.iter().all(u8::is_ascii_digit) {
            return Err(FrameError::InvalidChecksum(
                String::from_utf8_lossy(field).into_owned(),
            ));
        }
        let mut code = [0u8; CHECKSUM_WIDTH];
        code.copy_from_slice(field);
        Ok(Self(code))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only ever built from ASCII digits.
        for &b in &self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

/// Compute the checksum of an unencoded payload.
///
/// The byte values are summed and the decimal rendering of the sum is fitted
/// into [`CHECKSUM_WIDTH`] characters: sums above 999 keep only their first
/// two digits, and short renderings are right-padded with `'0'`.
///
/// This is a weak code.  Reordered bytes always collide, and so do many
/// single-byte changes once the sum exceeds 999.
pub fn checksum(payload: &[u8]) -> Checksum {
    let sum: u64 = payload.iter().map(|&b| u64::from(b)).sum();
    let digits = sum.to_string();
    let digits = if digits.len() > CHECKSUM_WIDTH {
        &digits[..CHECKSUM_WIDTH - 1]
    } else {
        &digits[..]
    };

    let mut code = [b'0'; CHECKSUM_WIDTH];
    code[..digits.len()].copy_from_slice(digits.as_bytes());
    Checksum(code)
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A complete protocol frame.
///
/// `checksum` is the value *carried* by the frame.  [`Frame::new`] derives it
/// from the payload; [`Frame::decode`] keeps whatever arrived on the wire so
/// that [`Frame::is_intact`] can detect corruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: Endpoint,
    pub dest: Endpoint,
    pub seq: SeqBit,
    pub checksum: Checksum,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, truncating the payload to [`PAYLOAD_SIZE`] bytes and
    /// computing its checksum.
    pub fn new(source: Endpoint, dest: Endpoint, seq: SeqBit, payload: impl Into<Vec<u8>>) -> Self {
        let mut payload = payload.into();
        payload.truncate(PAYLOAD_SIZE);
        let checksum = checksum(&payload);
        Self {
            source,
            dest,
            seq,
            checksum,
            payload,
        }
    }

    /// Build the acknowledgement for this frame.
    ///
    /// Addresses are swapped, the payload is echoed back and `seq` is the
    /// value being acknowledged.
    pub fn ack(&self, seq: SeqBit) -> Self {
        Self::new(
            self.dest.clone(),
            self.source.clone(),
            seq,
            self.payload.clone(),
        )
    }

    /// `true` when the carried checksum matches the payload.
    pub fn is_intact(&self) -> bool {
        checksum(&self.payload) == self.checksum
    }

    /// `true` when the payload carries the message [`TERMINATOR`].
    pub fn is_last_segment(&self) -> bool {
        self.payload.contains(&TERMINATOR)
    }

    /// Serialise this frame into a fixed-size buffer.
    ///
    /// Never fails: over-long hosts, ports and payloads are truncated to
    /// their field widths.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];

        write_field(&mut buf, OFF_SRC_HOST, HOST_WIDTH, self.source.host.as_bytes());
        write_field(
            &mut buf,
            OFF_SRC_PORT,
            PORT_WIDTH,
            self.source.port.to_string().as_bytes(),
        );
        write_field(&mut buf, OFF_DST_HOST, HOST_WIDTH, self.dest.host.as_bytes());
        write_field(
            &mut buf,
            OFF_DST_PORT,
            PORT_WIDTH,
            self.dest.port.to_string().as_bytes(),
        );
        buf[OFF_SEQ] = self.seq.as_digit();
        write_field(&mut buf, OFF_CHECKSUM, CHECKSUM_WIDTH, self.checksum.as_bytes());
        write_field(&mut buf, OFF_PAYLOAD, PAYLOAD_SIZE, &self.payload);

        buf
    }

    /// Parse a [`Frame`] from a raw datagram.
    ///
    /// Trailing zero padding is stripped from the payload.  The checksum is
    /// **not** verified here; use [`Frame::is_intact`].
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        check_size(buf)?;

        let source = read_endpoint(buf, OFF_SRC_HOST, OFF_SRC_PORT)?;
        let dest = read_endpoint(buf, OFF_DST_HOST, OFF_DST_PORT)?;
        let seq = SeqBit::from_digit(buf[OFF_SEQ]).ok_or(FrameError::InvalidSequence(buf[OFF_SEQ]))?;
        let checksum = Checksum::from_field(&buf[OFF_CHECKSUM..OFF_CHECKSUM + CHECKSUM_WIDTH])?;
        let payload = trim_padding(&buf[OFF_PAYLOAD..]).to_vec();

        Ok(Self {
            source,
            dest,
            seq,
            checksum,
            payload,
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} seq={} sum={} payload={:?}",
            self.source,
            self.dest,
            self.seq,
            self.checksum,
            String::from_utf8_lossy(&self.payload)
        )
    }
}

// ---------------------------------------------------------------------------
// Raw-datagram helpers (used by the relay and the service loops)
// ---------------------------------------------------------------------------

/// Read only the embedded destination of an encoded frame.
///
/// The rest of the frame is not validated, so a frame with a damaged
/// checksum or payload can still be routed.
pub fn peek_destination(buf: &[u8]) -> Result<Endpoint, FrameError> {
    check_size(buf)?;
    read_endpoint(buf, OFF_DST_HOST, OFF_DST_PORT)
}

/// Overwrite the last payload byte with [`CORRUPTION_MARKER`].
///
/// The frame keeps its size and carried checksum, so the receiver normally
/// sees a checksum mismatch.  Returns `false` if `buf` is not a frame.
pub fn mark_corrupted(buf: &mut [u8]) -> bool {
    if buf.len() != FRAME_SIZE {
        return false;
    }
    buf[FRAME_SIZE - 1] = CORRUPTION_MARKER;
    true
}

/// `true` when `datagram` is the [`SHUTDOWN_TOKEN`], ignoring zero padding.
pub fn is_shutdown(datagram: &[u8]) -> bool {
    trim_padding(datagram) == SHUTDOWN_TOKEN
}

fn check_size(buf: &[u8]) -> Result<(), FrameError> {
    if buf.len() != FRAME_SIZE {
        return Err(FrameError::WrongSize {
            expected: FRAME_SIZE,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Copy `value` into `buf[off..off + width]`, truncating if needed.
/// The remainder of the field keeps its zero padding.
fn write_field(buf: &mut [u8], off: usize, width: usize, value: &[u8]) {
    let n = value.len().min(width);
    buf[off..off + n].copy_from_slice(&value[..n]);
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &field[..end]
}

fn read_endpoint(buf: &[u8], host_off: usize, port_off: usize) -> Result<Endpoint, FrameError> {
    let host_field = trim_padding(&buf[host_off..host_off + HOST_WIDTH]);
    if host_field.is_empty() || !host_field.is_ascii() {
        return Err(FrameError::InvalidHost(
            String::from_utf8_lossy(host_field).into_owned(),
        ));
    }
    // ASCII was checked above, so this cannot fail.
    let host = String::from_utf8_lossy(host_field).trim().to_string();

    let port_field = trim_padding(&buf[port_off..port_off + PORT_WIDTH]);
    let port_text = String::from_utf8_lossy(port_field);
    let port = port_text
        .trim()
        .parse::<u16>()
        .map_err(|_| FrameError::InvalidPort(port_text.to_string()))?;

    Ok(Endpoint { host, port })
}
