//! `framed-stream` — a reliable, ordered, congestion-controlled byte stream
//! carried over a message-oriented framed channel.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   DATA / FILE_CHUNK   ┌──────────┐
//!  │  Sender  │──────────────────────▶│ Receiver │
//!  └────┬─────┘                       └─────┬────┘
//!       │  cwnd / ssthresh                  │
//!       │  retransmit timer     ACK         │
//!       │◀──────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │             Session               │
//!  │  (Sender + Receiver + file        │
//!  │   reassembly, sole I/O point)     │
//!  └────┬──────────────────────────────┘
//!       │ Message
//!  ┌────▼──────┐     length-prefixed JSON frames
//!  │   Link    │ ─────────────────────────────────▶ peer
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`congestion`]  — slow start / congestion avoidance / fast retransmit
//! - [`timer`]       — single-deadline retransmission timer
//! - [`sender`]      — Outstanding Buffer, window gate, ACK handling
//! - [`receiver`]    — reorder buffer and in-order delivery
//! - [`session`]     — one Sender + one Receiver wired to a link
//! - [`segment`]     — the unit of transmission
//! - [`message`]     — JSON wire messages
//! - [`frame`]       — 4-byte length prefix framing
//! - [`link`]        — outbound message sink and writer task
//! - [`connection`]  — tokio driver running a session over a byte stream
//! - [`transfer`]    — sealed file transfer and reassembly
//! - [`simulator`]   — seeded lossy network for testing two sessions
//! - [`config`]      — tunables
//! - [`error`]       — error types

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod timer;
pub mod transfer;

pub use config::TransportConfig;
pub use connection::{Connection, SessionHandle};
pub use error::TransportError;
pub use message::Message;
pub use segment::{Destination, SegmentKind};
pub use session::{Incoming, Session};
