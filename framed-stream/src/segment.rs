//! The unit of transmission: one MSS-sized slice of the application stream.
//!
//! A [`Segment`]'s `sequence` is the byte offset of its first payload byte in
//! the logical stream, not a packet counter.  Zero-length segments still
//! occupy one unit of sequence space so the counter can never stall; use
//! [`seq_len`] whenever advancing a sequence number.

/// First sequence number of every stream.
pub const INITIAL_SEQUENCE: u32 = 1;

/// Free-form per-segment metadata (the `meta` field on the wire).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// What a segment's payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Chat text or other opaque application bytes.
    Data,
    /// A slice of a (sealed) file transfer.
    FileChunk,
}

/// Where the application wants the bytes to go.
///
/// Routing is done by the chat layer; the transport only carries the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A single named peer.
    Peer(String),
    /// A room.
    Room(String),
}

impl Destination {
    /// Build a destination from the wire's `to` / `room` pair.
    ///
    /// `to` wins when both are present.
    pub fn from_fields(to: Option<String>, room: Option<String>) -> Option<Self> {
        match (to, room) {
            (Some(peer), _) => Some(Destination::Peer(peer)),
            (None, Some(room)) => Some(Destination::Room(room)),
            (None, None) => None,
        }
    }

    /// Split into the wire's `(to, room)` pair.
    pub fn to_fields(&self) -> (Option<String>, Option<String>) {
        match self {
            Destination::Peer(p) => (Some(p.clone()), None),
            Destination::Room(r) => (None, Some(r.clone())),
        }
    }
}

/// A sequenced slice of the application stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub sequence: u32,
    pub payload: Vec<u8>,
    pub kind: SegmentKind,
    pub destination: Destination,
    pub metadata: Option<Metadata>,
}

impl Segment {
    /// Sequence space consumed by this segment.
    pub fn seq_len(&self) -> u32 {
        seq_len(self.payload.len())
    }

    /// First sequence number after this segment.
    pub fn end(&self) -> u32 {
        self.sequence.saturating_add(self.seq_len())
    }
}

/// Sequence space consumed by a payload of `len` bytes: `max(len, 1)`.
#[inline]
pub fn seq_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX).max(1)
}
