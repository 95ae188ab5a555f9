//! One transport session between two named peers.
//!
//! ```text
//!   write / send_file                           poll_incoming
//!        │                                            ▲
//!        ▼                                            │
//!   ┌─────────┐  DATA / FILE_CHUNK   ┌──────────┐  Delivered
//!   │ Sender  │ ───────────────────▶ │   Link   │      │
//!   └─────────┘                      └──────────┘ ┌──────────┐
//!        ▲  handle_ack                    ▲       │ Receiver │
//!        │                                │ ACK   └──────────┘
//!   on_wire_message ──────────────────────┴────────────▲
//! ```
//!
//! The session is the only component that performs I/O, and only through
//! its [`Link`].  It does not own a clock or a task: callers pass `now` in
//! and drive [`Session::on_timer`] from [`Session::next_deadline`].  See
//! [`crate::connection`] for the async driver.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::link::Link;
use crate::message::Message;
use crate::receiver::{Delivered, Receiver};
use crate::segment::{Destination, Metadata, Segment, SegmentKind};
use crate::sender::{AckOutcome, SegmentSink, Sender};
use crate::transfer::{self, FileAssembler, ReceivedFile};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// The link failed; nothing more will be sent.
    Failed,
    /// [`Session::teardown`] was called.
    Closed,
}

/// Something the peer delivered, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Data {
        from: String,
        destination: Destination,
        payload: Vec<u8>,
        metadata: Option<Metadata>,
    },
    File(ReceivedFile),
}

/// Adapts a [`Link`] to the sender's [`SegmentSink`].
struct LinkSink<'a, L> {
    from: &'a str,
    link: &'a mut L,
}

impl<L: Link> SegmentSink for LinkSink<'_, L> {
    fn transmit(&mut self, segment: &Segment) -> Result<(), TransportError> {
        self.link.send(&Message::segment(self.from, segment))
    }
}

/// Sender + Receiver wired to one link.
#[derive(Debug)]
pub struct Session<L> {
    local: String,
    peer: String,
    config: TransportConfig,
    sender: Sender,
    receiver: Receiver,
    assembler: FileAssembler,
    incoming: VecDeque<Incoming>,
    link: L,
    state: SessionState,
}

impl<L: Link> Session<L> {
    pub fn new(
        local: impl Into<String>,
        peer: impl Into<String>,
        config: TransportConfig,
        link: L,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self {
            local: local.into(),
            peer: peer.into(),
            sender: Sender::new(&config),
            receiver: Receiver::new(&config),
            assembler: FileAssembler::new(),
            incoming: VecDeque::new(),
            config,
            link,
            state: SessionState::Open,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// `true` when everything written has been acknowledged.
    pub fn is_idle(&self) -> bool {
        self.sender.is_idle()
    }

    /// When [`on_timer`](Self::on_timer) should next be called.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_open() {
            self.sender.next_deadline()
        } else {
            None
        }
    }

    // -----------------------------------------------------------------------
    // Application side
    // -----------------------------------------------------------------------

    /// Queue `payload` as DATA for `destination`.
    pub fn write(
        &mut self,
        payload: &[u8],
        destination: Destination,
        now: Instant,
    ) -> Result<(), TransportError> {
        self.write_segment(payload, SegmentKind::Data, destination, None, now)
    }

    /// Queue `payload` with an explicit kind and metadata.
    pub fn write_segment(
        &mut self,
        payload: &[u8],
        kind: SegmentKind,
        destination: Destination,
        metadata: Option<Metadata>,
        now: Instant,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut sink = LinkSink {
            from: &self.local,
            link: &mut self.link,
        };
        let result = self
            .sender
            .enqueue(payload, kind, destination, metadata, now, &mut sink);
        self.check(result).map(|_| ())
    }

    /// Seal `data` and queue it as FILE_CHUNK segments.
    ///
    /// Returns the transfer id the receiver will report.
    pub fn send_file(
        &mut self,
        name: &str,
        data: &[u8],
        destination: Destination,
        now: Instant,
    ) -> Result<String, TransportError> {
        self.ensure_open()?;
        let file = transfer::seal(name, data)?;
        let needed = file.sealed.len() as u64;
        let available = self.sender.sequence_space_left();
        if needed > u64::from(available) {
            return Err(TransportError::SequenceExhausted { needed, available });
        }
        let chunk_len = self.config.file_chunk_len as usize;
        log::info!(
            "[session] sending file {name} ({} bytes sealed) as transfer {}",
            file.sealed.len(),
            file.descriptor.transfer_id
        );
        for (chunk, meta) in file.chunks(chunk_len) {
            self.write_segment(
                chunk,
                SegmentKind::FileChunk,
                destination.clone(),
                Some(meta),
                now,
            )?;
        }
        Ok(file.descriptor.transfer_id)
    }

    /// Next delivered item, if any.
    pub fn poll_incoming(&mut self) -> Option<Incoming> {
        self.incoming.pop_front()
    }

    pub fn drain_incoming(&mut self) -> Vec<Incoming> {
        self.incoming.drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Wire side
    // -----------------------------------------------------------------------

    /// Process one decoded inbound message.
    pub fn on_wire_message(&mut self, message: Message, now: Instant) -> Result<(), TransportError> {
        self.ensure_open()?;
        if message.sender_id() != self.peer {
            log::warn!(
                "[session] ignoring {} from unexpected peer {:?}",
                message.type_name(),
                message.sender_id()
            );
            return Ok(());
        }

        let result = match message {
            Message::Data(body) => {
                let segment = body.into_segment(SegmentKind::Data, &self.local);
                self.on_segment(segment, now)
            }
            Message::FileChunk(body) => {
                let segment = body.into_segment(SegmentKind::FileChunk, &self.local);
                self.on_segment(segment, now)
            }
            Message::Ack(ack) => {
                let mut sink = LinkSink {
                    from: &self.local,
                    link: &mut self.link,
                };
                self.sender
                    .handle_ack(ack.ack, ack.rwnd, now, &mut sink)
                    .map(|outcome| {
                        if outcome == AckOutcome::FastRetransmit {
                            log::info!("[session] fast retransmit from seq {}", ack.ack);
                        }
                    })
            }
        };
        self.check(result)
    }

    /// Drive the retransmission timer.  Returns `true` if a segment was
    /// retransmitted.
    pub fn on_timer(&mut self, now: Instant) -> Result<bool, TransportError> {
        self.ensure_open()?;
        let mut sink = LinkSink {
            from: &self.local,
            link: &mut self.link,
        };
        let result = self.sender.on_timer(now, &mut sink);
        self.check(result)
    }

    /// Stop all activity and release buffers.  Already-delivered items can
    /// still be polled.
    pub fn teardown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        log::info!(
            "[session] {} -> {} torn down ({} segments unacknowledged)",
            self.local,
            self.peer,
            self.sender.outstanding_len()
        );
        self.sender.shutdown();
        self.receiver.shutdown();
        self.state = SessionState::Closed;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn on_segment(&mut self, segment: Segment, now: Instant) -> Result<(), TransportError> {
        let ack = self.receiver.process_segment(segment);
        for delivered in self.receiver.drain() {
            self.surface(delivered);
        }

        self.link.send(&Message::ack(&self.local, ack))?;

        let mut sink = LinkSink {
            from: &self.local,
            link: &mut self.link,
        };
        if self.config.self_clocked_acks {
            self.sender.handle_ack(ack.ack, ack.rwnd, now, &mut sink)?;
        } else {
            self.sender.try_send(now, &mut sink)?;
        }
        Ok(())
    }

    fn surface(&mut self, delivered: Delivered) {
        match delivered.kind {
            SegmentKind::Data => self.incoming.push_back(Incoming::Data {
                from: self.peer.clone(),
                destination: delivered.destination,
                payload: delivered.payload,
                metadata: delivered.metadata,
            }),
            SegmentKind::FileChunk => {
                match self.assembler.accept(
                    &self.peer,
                    delivered.payload,
                    delivered.metadata.as_ref(),
                ) {
                    Ok(Some(file)) => self.incoming.push_back(Incoming::File(file)),
                    Ok(None) => {}
                    Err(e) => log::warn!("[session] dropping file transfer: {e}"),
                }
            }
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Failed | SessionState::Closed => Err(TransportError::SessionClosed),
        }
    }

    /// Move to `Failed` on a fatal error.
    fn check<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                log::warn!("[session] {} -> {} failed: {e}", self.local, self.peer);
                self.sender.shutdown();
                self.state = SessionState::Failed;
            }
        }
        result
    }
}
