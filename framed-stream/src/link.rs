//! The send half of the framed channel, as seen by a session.
//!
//! A session only needs one primitive: put a [`Message`] on the wire, or
//! learn that the channel is gone.  [`FrameLink`] implements it by encoding
//! the frame up front and handing the bytes to a writer task; the session
//! never awaits.  `Vec<Message>` implements it too, which is how tests and
//! the simulator capture outbound traffic.

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::frame::{encode_frame, write_frame};
use crate::message::Message;

/// Non-blocking message sink.
pub trait Link {
    /// Queue `message` for transmission.
    ///
    /// `Err` means the channel is broken and will stay broken.
    fn send(&mut self, message: &Message) -> Result<(), TransportError>;
}

impl<L: Link + ?Sized> Link for &mut L {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        (**self).send(message)
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        (**self).send(message)
    }
}

/// Captures every message.  Never fails.
impl Link for Vec<Message> {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.push(message.clone());
        Ok(())
    }
}

/// Encodes messages and forwards the frames to a writer task.
#[derive(Debug, Clone)]
pub struct FrameLink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl FrameLink {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// A link plus the receiving end its frames arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// `true` once the writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Link for FrameLink {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        log::trace!("[link] queue {} ({} bytes)", message.type_name(), frame.len());
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Writer task body: drain `frames` into `writer` until the queue closes or
/// a write fails.
///
/// Returns the write error, if any, so the owner can report it.
pub async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            log::warn!("[link] write failed: {e}");
            return Err(e);
        }
    }
    log::debug!("[link] frame queue closed, writer exiting");
    Ok(())
}
