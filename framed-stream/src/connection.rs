//! Async driver: runs a [`Session`] over a tokio byte stream.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  write / send_file / flush / recv           SessionHandle
//!      │                                      ┌───────────────────────┐
//!      └────────────────────────────────────▶ │ commands (mpsc)       │
//!                                             │ events   (mpsc)       │
//!                                             └──────────┬────────────┘
//!                                                        │ event_loop task
//!   reader task ── decoded Message (mpsc) ──▶  Session<FrameLink>
//!   (owns read half)                                     │
//!                                                        ▼ encoded frames (mpsc)
//!                                                   writer task
//!                                                  (owns write half)
//! ```
//!
//! The event loop is the only owner of the session, so no locks are needed.
//! It multiplexes application commands, inbound messages, the writer's exit
//! and one retransmission deadline with `tokio::select!`.
//!
//! ```ignore
//! let conn = Connection::connect("127.0.0.1:7000", "alice", "bob", config).await?;
//! let mut handle = conn.run()?;
//! handle.write(b"hi".to_vec(), Destination::Peer("bob".into())).await?;
//! let incoming = handle.recv().await?;
//! handle.flush().await?;
//! handle.close().await;
//! ```

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::frame::{decode_body, read_frame, ReadOutcome};
use crate::link::{write_loop, FrameLink};
use crate::message::Message;
use crate::segment::Destination;
use crate::session::{Incoming, Session};

/// Capacity of the command and inbound-message queues.
const QUEUE_DEPTH: usize = 256;

/// An unstarted connection: two stream halves plus session parameters.
pub struct Connection<R, W> {
    reader: R,
    writer: W,
    local: String,
    peer: String,
    config: TransportConfig,
}

impl Connection<OwnedReadHalf, OwnedWriteHalf> {
    /// Open a TCP connection to `addr`.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        local: impl Into<String>,
        peer: impl Into<String>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream, local, peer, config)
    }

    /// Wrap an already-established TCP stream (e.g. from a listener).
    pub fn from_stream(
        stream: TcpStream,
        local: impl Into<String>,
        peer: impl Into<String>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, local, peer, config))
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        reader: R,
        writer: W,
        local: impl Into<String>,
        peer: impl Into<String>,
        config: TransportConfig,
    ) -> Self {
        Self {
            reader,
            writer,
            local: local.into(),
            peer: peer.into(),
            config,
        }
    }

    /// Spawn the reader, writer and event-loop tasks.
    ///
    /// Fails only if the configuration is invalid.
    pub fn run(self) -> Result<SessionHandle, TransportError> {
        let (link, frames_rx) = FrameLink::channel();
        let session = Session::new(self.local, self.peer, self.config, link)?;
        let max_frame_len = session.config().max_frame_len;
        log::info!(
            "[conn] session {} -> {} started",
            session.local(),
            session.peer()
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(self.reader, max_frame_len, inbound_tx));
        let writer = tokio::spawn(write_loop(self.writer, frames_rx));
        let handle = tokio::spawn(event_loop(
            session, cmd_rx, inbound_rx, reader, writer, events_tx,
        ));

        Ok(SessionHandle {
            cmd_tx,
            events_rx,
            handle,
        })
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

enum Command {
    Write {
        payload: Vec<u8>,
        destination: Destination,
    },
    SendFile {
        name: String,
        data: Vec<u8>,
        destination: Destination,
        reply: oneshot::Sender<Result<String, TransportError>>,
    },
    Flush(oneshot::Sender<()>),
    Close,
}

/// Application side of a running connection.
///
/// Dropping the handle has the same effect as [`close`](Self::close)
/// without waiting.
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_rx: mpsc::UnboundedReceiver<Result<Incoming, TransportError>>,
    handle: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue bytes for the peer.
    pub async fn write(
        &self,
        payload: Vec<u8>,
        destination: Destination,
    ) -> Result<(), TransportError> {
        self.command(Command::Write {
            payload,
            destination,
        })
        .await
    }

    /// Seal and queue a file.  Returns its transfer id.
    pub async fn send_file(
        &self,
        name: impl Into<String>,
        data: Vec<u8>,
        destination: Destination,
    ) -> Result<String, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SendFile {
            name: name.into(),
            data,
            destination,
            reply,
        })
        .await?;
        rx.await.map_err(|_| TransportError::SessionClosed)?
    }

    /// Wait until everything written so far has been acknowledged.
    pub async fn flush(&self) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Flush(tx)).await?;
        rx.await.map_err(|_| TransportError::SessionClosed)
    }

    /// Next item from the peer.
    ///
    /// A fatal error (peer closed, channel failure) is returned exactly once;
    /// after that every call returns [`TransportError::SessionClosed`].
    /// A rejected [`write`](Self::write), such as
    /// [`TransportError::SequenceExhausted`], is also reported here and the
    /// session stays usable.
    pub async fn recv(&mut self) -> Result<Incoming, TransportError> {
        self.events_rx
            .recv()
            .await
            .unwrap_or(Err(TransportError::SessionClosed))
    }

    /// Tear the session down and wait for the background task to finish.
    pub async fn close(self) {
        let _ = self.cmd_tx.send(Command::Close).await;
        drop(self.cmd_tx);
        let _ = self.handle.await;
    }

    async fn command(&self, cmd: Command) -> Result<(), TransportError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| TransportError::SessionClosed)
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn read_loop<R>(
    mut reader: R,
    max_frame_len: u32,
    inbound: mpsc::Sender<Result<Message, TransportError>>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let item = match read_frame(&mut reader, max_frame_len).await {
            Ok(ReadOutcome::Frame(body)) => match decode_body(&body) {
                Ok(message) => Ok(message),
                Err(e) => {
                    log::warn!("[conn:reader] discarding malformed frame: {e}");
                    continue;
                }
            },
            Ok(ReadOutcome::Skipped(len)) => {
                log::warn!("[conn:reader] skipped oversized frame of {len} bytes");
                continue;
            }
            Ok(ReadOutcome::Eof) => Err(TransportError::Eof),
            Err(e) => Err(TransportError::Channel(e)),
        };

        let last = item.is_err();
        if inbound.send(item).await.is_err() || last {
            break;
        }
    }
    log::debug!("[conn:reader] exiting");
}

async fn event_loop(
    mut session: Session<FrameLink>,
    mut commands: mpsc::Receiver<Command>,
    mut inbound: mpsc::Receiver<Result<Message, TransportError>>,
    reader: JoinHandle<()>,
    mut writer: JoinHandle<io::Result<()>>,
    events: mpsc::UnboundedSender<Result<Incoming, TransportError>>,
) {
    // With no deadline the timer sleeps "forever"; the `if` guard in select!
    // keeps it from being polled at all.
    let far_future = Duration::from_secs(365 * 24 * 3600);
    let timer = tokio::time::sleep(far_future);
    tokio::pin!(timer);
    let mut writer_running = true;
    let mut flush_waiters: Vec<oneshot::Sender<()>> = Vec::new();

    let outcome: Result<(), TransportError> = loop {
        let deadline = session.next_deadline();
        timer
            .as_mut()
            .reset(deadline.unwrap_or_else(|| Instant::now() + far_future));

        let step = tokio::select! {
            // ── Application commands ────────────────────────────────────
            cmd = commands.recv() => match cmd {
                None | Some(Command::Close) => break Ok(()),
                Some(Command::Write { payload, destination }) => {
                    match session.write(&payload, destination, Instant::now()) {
                        Err(e) if !e.is_fatal() => {
                            log::warn!("[conn:loop] write rejected: {e}");
                            let _ = events.send(Err(e));
                            Ok(())
                        }
                        other => other,
                    }
                }
                Some(Command::SendFile { name, data, destination, reply }) => {
                    match session.send_file(&name, &data, destination, Instant::now()) {
                        Ok(id) => {
                            let _ = reply.send(Ok(id));
                            Ok(())
                        }
                        Err(e) if e.is_fatal() => {
                            let _ = reply.send(Err(TransportError::SessionClosed));
                            Err(e)
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            Ok(())
                        }
                    }
                }
                Some(Command::Flush(tx)) => {
                    flush_waiters.push(tx);
                    Ok(())
                }
            },

            // ── Inbound messages ────────────────────────────────────────
            msg = inbound.recv() => match msg {
                Some(Ok(message)) => {
                    log::debug!("[conn:loop] ← {}", message.type_name());
                    session.on_wire_message(message, Instant::now())
                }
                Some(Err(e)) => Err(e),
                None => Err(TransportError::ChannelClosed),
            },

            // ── Writer exit ─────────────────────────────────────────────
            res = &mut writer, if writer_running => {
                writer_running = false;
                match res {
                    Ok(Err(e)) => Err(TransportError::Channel(e)),
                    Ok(Ok(())) | Err(_) => Err(TransportError::ChannelClosed),
                }
            }

            // ── Retransmission deadline ─────────────────────────────────
            _ = &mut timer, if deadline.is_some() => {
                session.on_timer(Instant::now()).map(|fired| {
                    if fired {
                        log::debug!("[conn:loop] retransmitted after timeout");
                    }
                })
            }
        };

        for item in session.drain_incoming() {
            let _ = events.send(Ok(item));
        }

        match step {
            Err(e) if e.is_fatal() => break Err(e),
            Err(e) => log::warn!("[conn:loop] {e}"),
            Ok(()) => {}
        }

        if session.is_idle() {
            for waiter in flush_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    };

    session.teardown();
    reader.abort();
    match outcome {
        Ok(()) => log::info!("[conn] session {} -> {} closed", session.local(), session.peer()),
        Err(e) => {
            log::info!(
                "[conn] session {} -> {} ended: {e}",
                session.local(),
                session.peer()
            );
            let _ = events.send(Err(e));
        }
    }

    // Dropping the link closes the frame queue; the writer drains and exits.
    drop(session);
    if writer_running {
        let _ = writer.await;
    }
}
