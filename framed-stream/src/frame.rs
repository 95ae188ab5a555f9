//! Length-prefixed framing of [`Message`]s.
//!
//! # Wire format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Payload Length (big-endian)                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  UTF-8 JSON object ...                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! [`encode_frame`] / [`decode_frame`] are pure.  [`read_frame`] and
//! [`write_frame`] move whole frames over a tokio byte stream.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::Message;

/// Size of the length prefix.
pub const PREFIX_LEN: usize = 4;

/// Errors from encoding or decoding a single frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Buffer shorter than the length prefix.
    #[error("buffer too short to contain a length prefix")]
    BufferTooShort,

    /// The prefix disagrees with the number of bytes that follow.
    #[error("length prefix says {declared} bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },

    /// The payload does not fit in a 32-bit length prefix.
    #[error("payload of {0} bytes does not fit a frame")]
    TooLong(usize),

    /// The payload is not a valid message.
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialise `message` into a complete frame (prefix included).
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLong(body.len()))?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Parse a complete frame (prefix included).
pub fn decode_frame(buf: &[u8]) -> Result<Message, FrameError> {
    let Some((prefix, body)) = buf.split_first_chunk::<PREFIX_LEN>() else {
        return Err(FrameError::BufferTooShort);
    };
    let declared = u32::from_be_bytes(*prefix) as usize;
    if declared != body.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    decode_body(body)
}

/// Parse a frame body (the bytes after the prefix).
pub fn decode_body(body: &[u8]) -> Result<Message, FrameError> {
    Ok(serde_json::from_slice(body)?)
}

/// Result of reading one frame off a stream.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A frame body.
    Frame(Vec<u8>),
    /// A frame longer than the limit; its bytes were consumed and dropped.
    Skipped(u32),
    /// The stream ended cleanly on a frame boundary.
    Eof,
}

/// Read the next frame body from `reader`.
///
/// Frames longer than `max_len` are drained without being buffered so a
/// misbehaving peer cannot force a large allocation.  A stream that ends in
/// the middle of a frame is an error.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;
    while filled < PREFIX_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(ReadOutcome::Eof);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a length prefix",
            ));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix);
    if len > max_len {
        let mut rest = (&mut *reader).take(u64::from(len));
        let skipped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
        if skipped < u64::from(len) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside an oversized frame",
            ));
        }
        return Ok(ReadOutcome::Skipped(len));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(ReadOutcome::Frame(body))
}

/// Write one pre-encoded frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
