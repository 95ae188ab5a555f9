//! Transport tunables.
//!
//! Every field has a default matching the classic demo parameters
//! (`mss = 512`, `cwnd = 1 MSS`, `ssthresh = 8 MSS`, `RTO = 1 s`,
//! `rwnd = 32 MSS`).  A JSON document may override any subset of them:
//!
//! ```json
//! { "mss": 1024, "retransmit_timeout_ms": 250 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Default maximum segment size in bytes.
pub const DEFAULT_MSS: u32 = 512;

/// Default ceiling for a single inbound frame (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 1 << 20;

/// Frame bytes reserved beyond the base64 payload: JSON field names, peer
/// and room names, the sequence number and file-chunk metadata.
pub const SEGMENT_FRAME_OVERHEAD: u64 = 4096;

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest payload carried by one segment.
    pub mss: u32,
    /// Congestion window at session start, in bytes.
    pub initial_cwnd: u32,
    /// Slow-start threshold at session start, in bytes.
    pub initial_ssthresh: u32,
    /// Fixed retransmission timeout.
    #[serde(rename = "retransmit_timeout_ms", with = "duration_ms")]
    pub retransmit_timeout: Duration,
    /// Receive window advertised in every ACK.
    pub advertised_rwnd: u32,
    /// Inbound frames longer than this are skipped unread.
    pub max_frame_len: u32,
    /// Feed locally generated ACKs back into the local sender.
    ///
    /// The ACK a receiver produces describes the peer's stream, not ours, so
    /// in this mode local data can be treated as acknowledged even though
    /// the peer never received it.  Lost segments are then never
    /// retransmitted.
    pub self_clocked_acks: bool,
    /// Granularity at which file payloads are enqueued.
    pub file_chunk_len: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let mss = DEFAULT_MSS;
        Self {
            mss,
            initial_cwnd: mss,
            initial_ssthresh: 8 * mss,
            retransmit_timeout: Duration::from_secs(1),
            advertised_rwnd: 32 * mss,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            self_clocked_acks: false,
            file_chunk_len: 4 * mss,
        }
    }
}

impl TransportConfig {
    /// Defaults scaled to a different MSS.
    pub fn with_mss(mss: u32) -> Self {
        Self {
            mss,
            initial_cwnd: mss,
            initial_ssthresh: mss.saturating_mul(8),
            advertised_rwnd: mss.saturating_mul(32),
            file_chunk_len: mss.saturating_mul(4),
            ..Self::default()
        }
    }

    /// Parse a (possibly partial) JSON document and validate the result.
    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| TransportError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.mss == 0 {
            return Err(TransportError::config("mss must be non-zero"));
        }
        if self.advertised_rwnd < self.mss {
            return Err(TransportError::config(format!(
                "advertised_rwnd ({}) must be at least mss ({})",
                self.advertised_rwnd, self.mss
            )));
        }
        if self.retransmit_timeout.is_zero() {
            return Err(TransportError::config("retransmit_timeout must be non-zero"));
        }
        if self.max_frame_len == 0 {
            return Err(TransportError::config("max_frame_len must be non-zero"));
        }
        if self.file_chunk_len == 0 {
            return Err(TransportError::config("file_chunk_len must be non-zero"));
        }
        if self.max_segment_frame_len() > u64::from(self.max_frame_len) {
            return Err(TransportError::config(format!(
                "mss ({}) encodes to frames of up to {} bytes, above max_frame_len ({})",
                self.mss,
                self.max_segment_frame_len(),
                self.max_frame_len
            )));
        }
        Ok(())
    }

    /// Worst-case frame body for one full segment: base64 of `mss` bytes
    /// plus [`SEGMENT_FRAME_OVERHEAD`].
    pub fn max_segment_frame_len(&self) -> u64 {
        4 * u64::from(self.mss).div_ceil(3) + SEGMENT_FRAME_OVERHEAD
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = TransportConfig::default();
        assert_eq!(c.mss, 512);
        assert_eq!(c.initial_cwnd, 512);
        assert_eq!(c.initial_ssthresh, 4096);
        assert_eq!(c.retransmit_timeout, Duration::from_secs(1));
        assert_eq!(c.advertised_rwnd, 16_384);
        assert!(!c.self_clocked_acks);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let c = TransportConfig::from_json(r#"{"mss": 1024, "retransmit_timeout_ms": 250}"#)
            .unwrap();
        assert_eq!(c.mss, 1024);
        assert_eq!(c.retransmit_timeout, Duration::from_millis(250));
        // Untouched fields keep their defaults.
        assert_eq!(c.initial_cwnd, 512);
        assert_eq!(c.advertised_rwnd, 16_384);
    }

    #[test]
    fn rejects_zero_mss() {
        let err = TransportConfig::from_json(r#"{"mss": 0}"#).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn rejects_rwnd_below_mss() {
        let c = TransportConfig {
            advertised_rwnd: 100,
            ..TransportConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(TransportConfig::from_json("{mss:").is_err());
    }

    #[test]
    fn with_mss_scales_windows() {
        let c = TransportConfig::with_mss(100);
        assert_eq!(c.initial_cwnd, 100);
        assert_eq!(c.initial_ssthresh, 800);
        assert_eq!(c.advertised_rwnd, 3200);
        assert_eq!(c.file_chunk_len, 400);
    }

    #[test]
    fn rejects_mss_whose_frames_exceed_max_frame_len() {
        let err = TransportConfig::with_mss(1 << 20).validate().unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));

        let c = TransportConfig {
            max_frame_len: 4096,
            ..TransportConfig::default()
        };
        assert!(c.validate().is_err());

        assert!(TransportConfig::with_mss(700_000).validate().is_ok());
    }

    #[test]
    fn largest_file_chunk_fits_the_frame_bound() {
        use crate::frame::encode_frame;
        use crate::message::Message;
        use crate::segment::{Destination, Segment, SegmentKind};

        let c = TransportConfig::with_mss(4096);
        let file = crate::transfer::seal(&"n".repeat(255), &[7u8; 10_000]).unwrap();
        let (chunk, meta) = file.chunks(c.mss as usize).swap_remove(0);
        let segment = Segment {
            sequence: u32::MAX - 1,
            payload: chunk.to_vec(),
            kind: SegmentKind::FileChunk,
            destination: Destination::Room("a-room-with-a-long-name".into()),
            metadata: Some(meta),
        };
        let frame = encode_frame(&Message::segment("some-sender-name", &segment)).unwrap();
        assert_eq!(chunk.len(), 4096);
        assert!((frame.len() - 4) as u64 <= c.max_segment_frame_len());
    }
}
