//! `rdt-over-udp`: stop-and-wait reliable message delivery over UDP,
//! with an impairing relay in the middle.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  frames   ┌─────────┐  frames   ┌──────────┐
//!  │  Sender  │──────────▶│  Relay  │──────────▶│ Receiver │
//!  │          │◀──────────│ (drop,  │◀──────────│          │
//!  └────┬─────┘   ACKs    │ delay,  │   ACKs    └────┬─────┘
//!       │                 │ corrupt)│                │
//!       │                 └────┬────┘                │
//!  ┌────▼──────────────────────▼─────────────────────▼────┐
//!  │   Socket  (thin async wrapper around tokio UdpSocket)│
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]       : 54-byte ASCII wire format and checksum
//! - [`impairment`]  : threshold classification of relay draws
//! - [`sender`]      : segmentation and the stop-and-wait ARQ state machine
//! - [`receiver`]    : duplicate detection and message reassembly
//! - [`service`]     : socket-driving loops for sender and receiver
//! - [`relay`]       : forwarding loop applying impairments
//! - [`state`]       : finite-state-machine types
//! - [`timer`]       : ACK timeout and retry ceiling
//! - [`socket`]      : async UDP socket abstraction

pub mod frame;
pub mod impairment;
pub mod receiver;
pub mod relay;
pub mod sender;
pub mod service;
pub mod socket;
pub mod state;
pub mod timer;
