//! Inbound segment reassembly.
//!
//! The [`Receiver`] sits between decoded wire messages and the application:
//! - segments at `expected_sequence` are delivered at once, then any
//!   buffered successors that have become contiguous;
//! - segments ahead of `expected_sequence` wait in the reorder buffer;
//! - segments behind it are duplicates and are dropped.
//!
//! It never sends anything.  Each call returns the [`AckToSend`] the session
//! should put on the wire.

use std::collections::{BTreeMap, VecDeque};

use crate::config::TransportConfig;
use crate::segment::{Destination, Metadata, Segment, SegmentKind, INITIAL_SEQUENCE};

/// Cumulative acknowledgment produced for every inbound segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckToSend {
    /// Next sequence number the receiver expects.
    pub ack: u32,
    /// Advertised receive window in bytes.
    pub rwnd: u32,
}

/// A segment handed to the application, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub sequence: u32,
    pub kind: SegmentKind,
    pub destination: Destination,
    pub payload: Vec<u8>,
    pub metadata: Option<Metadata>,
}

impl From<Segment> for Delivered {
    fn from(seg: Segment) -> Self {
        Self {
            sequence: seg.sequence,
            kind: seg.kind,
            destination: seg.destination,
            payload: seg.payload,
            metadata: seg.metadata,
        }
    }
}

/// Receive side of a session.
#[derive(Debug)]
pub struct Receiver {
    expected_sequence: u32,
    reorder: BTreeMap<u32, Segment>,
    advertised_rwnd: u32,
    app_buffer: VecDeque<Delivered>,
}

impl Receiver {
    pub fn new(config: &TransportConfig) -> Self {
        Self::with_initial_sequence(config, INITIAL_SEQUENCE)
    }

    pub fn with_initial_sequence(config: &TransportConfig, isn: u32) -> Self {
        Self {
            expected_sequence: isn,
            reorder: BTreeMap::new(),
            advertised_rwnd: config.advertised_rwnd,
            app_buffer: VecDeque::new(),
        }
    }

    pub fn expected_sequence(&self) -> u32 {
        self.expected_sequence
    }

    pub fn advertised_rwnd(&self) -> u32 {
        self.advertised_rwnd
    }

    /// Segments waiting for a gap to fill.
    pub fn buffered_out_of_order(&self) -> usize {
        self.reorder.len()
    }

    /// Segments delivered but not yet read.
    pub fn readable(&self) -> usize {
        self.app_buffer.len()
    }

    /// Accept one inbound segment and return the ACK to send.
    pub fn process_segment(&mut self, segment: Segment) -> AckToSend {
        let seq = segment.sequence;

        if seq == self.expected_sequence {
            self.deliver(segment);
            while let Some(next) = self.reorder.remove(&self.expected_sequence) {
                self.deliver(next);
            }
        } else if seq >= self.expected_sequence.saturating_add(self.advertised_rwnd) {
            log::debug!(
                "[receiver] discarding seq={seq} beyond window {}+{}",
                self.expected_sequence,
                self.advertised_rwnd
            );
        } else if seq > self.expected_sequence {
            if self.reorder.contains_key(&seq) {
                log::debug!("[receiver] duplicate out-of-order seq={seq}");
            } else {
                log::debug!(
                    "[receiver] buffering seq={seq}, expected {}",
                    self.expected_sequence
                );
                self.reorder.insert(seq, segment);
            }
        } else {
            log::debug!(
                "[receiver] discarding old seq={seq}, expected {}",
                self.expected_sequence
            );
        }

        AckToSend {
            ack: self.expected_sequence,
            rwnd: self.advertised_rwnd,
        }
    }

    /// Pop the oldest delivered segment.
    pub fn read(&mut self) -> Option<Delivered> {
        self.app_buffer.pop_front()
    }

    /// Take every delivered segment.
    pub fn drain(&mut self) -> Vec<Delivered> {
        self.app_buffer.drain(..).collect()
    }

    /// Drop everything buffered.
    pub fn shutdown(&mut self) {
        self.reorder.clear();
        self.app_buffer.clear();
    }

    fn deliver(&mut self, segment: Segment) {
        self.expected_sequence = self.expected_sequence.saturating_add(segment.seq_len());
        log::debug!(
            "[receiver] DELIVER seq={} len={} next={}",
            segment.sequence,
            segment.payload.len(),
            self.expected_sequence
        );
        self.app_buffer.push_back(segment.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(sequence: u32, payload: &[u8]) -> Segment {
        Segment {
            sequence,
            payload: payload.to_vec(),
            kind: SegmentKind::Data,
            destination: Destination::Peer("alice".into()),
            metadata: None,
        }
    }

    fn receiver() -> Receiver {
        Receiver::new(&TransportConfig::default())
    }

    fn payloads(r: &mut Receiver) -> Vec<Vec<u8>> {
        r.drain().into_iter().map(|d| d.payload).collect()
    }

    #[test]
    fn in_order_delivery() {
        let mut r = receiver();
        let ack = r.process_segment(seg(1, b"hello"));
        assert_eq!(ack, AckToSend { ack: 6, rwnd: 16_384 });
        let ack = r.process_segment(seg(6, b" world"));
        assert_eq!(ack.ack, 12);
        assert_eq!(payloads(&mut r), vec![b"hello".to_vec(), b" world".to_vec()]);
    }

    #[test]
    fn duplicate_is_idempotent() {
        let mut r = receiver();
        let first = r.process_segment(seg(1, b"abc"));
        let second = r.process_segment(seg(1, b"abc"));
        assert_eq!(first, second);
        assert_eq!(r.readable(), 1);
    }

    #[test]
    fn reordered_segments_released_together() {
        let config = TransportConfig::default();
        let mut r = Receiver::with_initial_sequence(&config, 5);

        assert_eq!(r.process_segment(seg(10, &[2; 10])).ack, 5);
        assert_eq!(r.process_segment(seg(20, &[3; 5])).ack, 5);
        assert_eq!(r.readable(), 0);
        assert_eq!(r.buffered_out_of_order(), 2);

        assert_eq!(r.process_segment(seg(5, &[1; 5])).ack, 25);
        let order: Vec<u32> = r.drain().into_iter().map(|d| d.sequence).collect();
        assert_eq!(order, vec![5, 10, 20]);
        assert_eq!(r.buffered_out_of_order(), 0);
    }

    #[test]
    fn gap_holds_back_later_segments() {
        let config = TransportConfig::default();
        let mut r = Receiver::with_initial_sequence(&config, 5);

        r.process_segment(seg(10, &[2; 5]));
        r.process_segment(seg(20, &[3; 5]));
        // [15, 20) never arrived.
        assert_eq!(r.process_segment(seg(5, &[1; 5])).ack, 15);
        let order: Vec<u32> = r.drain().into_iter().map(|d| d.sequence).collect();
        assert_eq!(order, vec![5, 10]);
        assert_eq!(r.buffered_out_of_order(), 1);
    }

    #[test]
    fn old_segment_discarded() {
        let mut r = receiver();
        r.process_segment(seg(1, b"abcd"));
        r.drain();
        let ack = r.process_segment(seg(1, b"ab"));
        assert_eq!(ack.ack, 5);
        assert_eq!(r.readable(), 0);
    }

    #[test]
    fn zero_length_segment_advances_by_one() {
        let mut r = receiver();
        assert_eq!(r.process_segment(seg(1, b"")).ack, 2);
        let delivered = r.read().unwrap();
        assert!(delivered.payload.is_empty());
    }

    #[test]
    fn buffered_duplicate_keeps_first_copy() {
        let mut r = receiver();
        r.process_segment(seg(4, b"xyz"));
        r.process_segment(seg(4, b"XYZ"));
        r.process_segment(seg(1, b"abc"));
        assert_eq!(payloads(&mut r), vec![b"abc".to_vec(), b"xyz".to_vec()]);
    }

    #[test]
    fn segments_beyond_window_are_not_buffered() {
        let mut r = receiver();
        for i in 0..10_000u32 {
            let ack = r.process_segment(seg(1_000_000 + i * 512, &[0; 512]));
            assert_eq!(ack, AckToSend { ack: 1, rwnd: 16_384 });
        }
        assert_eq!(r.buffered_out_of_order(), 0);
    }

    #[test]
    fn window_edge_is_exclusive() {
        let mut r = receiver();
        r.process_segment(seg(16_384, b"last"));
        r.process_segment(seg(16_385, b"over"));
        assert_eq!(r.buffered_out_of_order(), 1);
    }

    #[test]
    fn segment_at_end_of_sequence_space_does_not_wrap() {
        let config = TransportConfig::default();
        let mut r = Receiver::with_initial_sequence(&config, u32::MAX - 3);
        assert_eq!(r.process_segment(seg(u32::MAX - 3, b"abcdef")).ack, u32::MAX);
        assert_eq!(r.readable(), 1);
    }
}
