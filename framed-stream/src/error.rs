//! Crate-wide error type.
//!
//! Only channel failures are fatal to a session.  Loss, reordering, malformed
//! frames and stale ACKs are all absorbed by the transport and never reach
//! the application as errors.

use thiserror::Error;

use crate::frame::FrameError;
use crate::transfer::TransferError;

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying framed channel failed while reading or writing.
    #[error("channel I/O error: {0}")]
    Channel(#[from] std::io::Error),

    /// The underlying framed channel is gone (writer task exited, link dropped).
    #[error("channel closed")]
    ChannelClosed,

    /// A frame could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The session already failed or was torn down.
    #[error("session is closed")]
    SessionClosed,

    /// A write would run the sequence number past `u32::MAX`.
    #[error("sequence space exhausted: {needed} bytes requested, {available} left")]
    SequenceExhausted { needed: u64, available: u32 },

    /// The peer closed the connection cleanly.
    #[error("peer closed the connection")]
    Eof,

    /// Sealing an outbound file failed.
    #[error("file transfer error: {0}")]
    Transfer(#[from] TransferError),
}

impl TransportError {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        TransportError::Config(msg.into())
    }

    /// `true` for errors that terminate the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Channel(_) | TransportError::ChannelClosed | TransportError::Eof
        )
    }
}
