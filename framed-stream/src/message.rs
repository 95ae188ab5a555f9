//! JSON message model carried inside each frame.
//!
//! ```json
//! {"type":"DATA","from":"alice","to":"bob","seq":1,"payload":"aGk="}
//! {"type":"FILE_CHUNK","from":"alice","room":"lobby","seq":513,"payload":"...","meta":{...}}
//! {"type":"ACK","from":"bob","ack":3,"rwnd":16384}
//! ```
//!
//! Byte payloads travel as standard base64.  `MSG` is accepted as another
//! spelling of `DATA`.

use serde::{Deserialize, Serialize};

use crate::receiver::AckToSend;
use crate::segment::{Destination, Metadata, Segment, SegmentKind};

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    #[serde(alias = "MSG")]
    Data(SegmentMessage),
    FileChunk(SegmentMessage),
    Ack(AckMessage),
}

/// Body of a DATA or FILE_CHUNK message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMessage {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    pub seq: u32,
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Metadata>,
}

/// Body of an ACK message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub from: String,
    pub ack: u32,
    pub rwnd: u32,
}

impl Message {
    /// Wrap an outbound segment.
    pub fn segment(from: &str, segment: &Segment) -> Self {
        let (to, room) = segment.destination.to_fields();
        let body = SegmentMessage {
            from: from.to_owned(),
            to,
            room,
            seq: segment.sequence,
            payload: segment.payload.clone(),
            meta: segment.metadata.clone(),
        };
        match segment.kind {
            SegmentKind::Data => Message::Data(body),
            SegmentKind::FileChunk => Message::FileChunk(body),
        }
    }

    pub fn ack(from: &str, ack: AckToSend) -> Self {
        Message::Ack(AckMessage {
            from: from.to_owned(),
            ack: ack.ack,
            rwnd: ack.rwnd,
        })
    }

    /// Sender identity carried by every message.
    pub fn sender_id(&self) -> &str {
        match self {
            Message::Data(m) | Message::FileChunk(m) => &m.from,
            Message::Ack(a) => &a.from,
        }
    }

    /// Short name for log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Data(_) => "DATA",
            Message::FileChunk(_) => "FILE_CHUNK",
            Message::Ack(_) => "ACK",
        }
    }
}

impl SegmentMessage {
    /// Turn a received body into a [`Segment`].
    ///
    /// A message with neither `to` nor `room` is treated as addressed to
    /// `local`.
    pub fn into_segment(self, kind: SegmentKind, local: &str) -> Segment {
        let destination = Destination::from_fields(self.to, self.room)
            .unwrap_or_else(|| Destination::Peer(local.to_owned()));
        Segment {
            sequence: self.seq,
            payload: self.payload,
            kind,
            destination,
            metadata: self.meta,
        }
    }
}

/// `serde(with = ...)` adapter storing bytes as standard base64 text.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
