//! Send-side state: the Outstanding Buffer, the window gate and the reaction
//! to ACKs and timeouts.
//!
//! [`Sender`] never owns the channel.  Every method that may transmit takes a
//! [`SegmentSink`]; [`crate::session::Session`] supplies one that wraps its
//! link.  Time is passed in explicitly so the state machine can be driven by
//! a real clock or by a test.
//!
//! # Sequence-number layout
//!
//! ```text
//!  send_base            highest_sent         next_sequence
//!      │                     │                     │
//!  ────┼─────────────────────┼─────────────────────┼────▶ stream offset
//!      │ <─ sent, unacked ─▶ │ <─ queued, unsent ─▶│
//! ```
//!
//! A segment marked for retransmission (timeout or fast retransmit) sits
//! left of `highest_sent` with `sent == false`.  It is resent ahead of any
//! new data and is not held back by the window: the window only gates data
//! that has never been on the wire.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;

use crate::config::TransportConfig;
use crate::congestion::CongestionController;
use crate::error::TransportError;
use crate::segment::{seq_len, Destination, Metadata, Segment, SegmentKind, INITIAL_SEQUENCE};
use crate::timer::RetransmitTimer;

/// Duplicate ACKs needed to trigger a fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

// ---------------------------------------------------------------------------
// SegmentSink
// ---------------------------------------------------------------------------

/// Where transmitted segments go.
///
/// An `Err` means the channel is broken: the segment is left unsent and the
/// error is returned to the caller unchanged.
pub trait SegmentSink {
    fn transmit(&mut self, segment: &Segment) -> Result<(), TransportError>;
}

impl<F> SegmentSink for F
where
    F: FnMut(&Segment) -> Result<(), TransportError>,
{
    fn transmit(&mut self, segment: &Segment) -> Result<(), TransportError> {
        self(segment)
    }
}

/// Records every transmitted segment.  Never fails.
impl SegmentSink for Vec<Segment> {
    fn transmit(&mut self, segment: &Segment) -> Result<(), TransportError> {
        self.push(segment.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OutstandingEntry
// ---------------------------------------------------------------------------

/// One segment in the Outstanding Buffer.
#[derive(Debug, Clone)]
pub struct OutstandingEntry {
    pub segment: Segment,
    /// Time of the most recent transmission; `None` while the segment is not
    /// on the wire (never sent, or marked for retransmission).
    pub sent_at: Option<Instant>,
    /// Number of times this segment has been transmitted.
    pub tx_count: u32,
}

impl OutstandingEntry {
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    /// Sent before, now waiting to be sent again.
    pub fn needs_retransmit(&self) -> bool {
        self.sent_at.is_none() && self.tx_count > 0
    }
}

/// What a call to [`Sender::handle_ack`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// New cumulative ACK; the window slid right by `acked_bytes`.
    Advanced { acked_bytes: u32 },
    /// Repeat of `send_base`; `count` duplicates seen so far.
    Duplicate { count: u32 },
    /// Third duplicate: fast retransmit triggered.
    FastRetransmit,
    /// Behind `send_base`, beyond anything sent, or nothing in flight.
    Ignored,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Outbound half of a session.
#[derive(Debug)]
pub struct Sender {
    /// Oldest unacknowledged sequence number (left window edge).
    send_base: u32,
    /// Sequence number for the next enqueued segment.
    next_sequence: u32,
    /// First sequence number that has never been transmitted.
    highest_sent: u32,
    outstanding: BTreeMap<u32, OutstandingEntry>,
    /// Sequence-space bytes of entries currently on the wire.
    in_flight: u32,
    peer_rwnd: u32,
    dup_acks: HashMap<u32, u32>,
    congestion: CongestionController,
    timer: RetransmitTimer,
    mss: u32,
}

impl Sender {
    pub fn new(config: &TransportConfig) -> Self {
        Self::with_initial_sequence(config, INITIAL_SEQUENCE)
    }

    pub fn with_initial_sequence(config: &TransportConfig, isn: u32) -> Self {
        Self {
            send_base: isn,
            next_sequence: isn,
            highest_sent: isn,
            outstanding: BTreeMap::new(),
            in_flight: 0,
            peer_rwnd: config.advertised_rwnd,
            dup_acks: HashMap::new(),
            congestion: CongestionController::new(
                config.mss,
                config.initial_cwnd,
                config.initial_ssthresh,
            ),
            timer: RetransmitTimer::new(config.retransmit_timeout),
            mss: config.mss,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn in_flight_bytes(&self) -> u32 {
        self.in_flight
    }

    pub fn peer_rwnd(&self) -> u32 {
        self.peer_rwnd
    }

    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    pub fn timer(&self) -> &RetransmitTimer {
        &self.timer
    }

    pub fn entry(&self, sequence: u32) -> Option<&OutstandingEntry> {
        self.outstanding.get(&sequence)
    }

    /// All entries in ascending sequence order.
    pub fn entries(&self) -> impl Iterator<Item = &OutstandingEntry> {
        self.outstanding.values()
    }

    /// Number of segments not yet acknowledged (sent or queued).
    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of segments never transmitted.
    pub fn queued_len(&self) -> usize {
        self.outstanding.range(self.highest_sent..).count()
    }

    /// `true` when something has been transmitted and not yet acknowledged.
    pub fn has_unacked(&self) -> bool {
        self.outstanding.range(..self.highest_sent).next().is_some()
    }

    /// `true` when every enqueued byte has been acknowledged.
    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Sequence numbers still available to [`enqueue`](Self::enqueue).
    pub fn sequence_space_left(&self) -> u32 {
        u32::MAX - self.next_sequence
    }

    /// When the retransmission timer wants [`on_timer`](Self::on_timer) called.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Split `payload` into MSS-sized segments, append them to the
    /// Outstanding Buffer and try to send.
    ///
    /// An empty payload produces exactly one zero-length segment.  Returns
    /// the number of segments transmitted by the send attempt.
    ///
    /// Sequence numbers never wrap: a payload that would carry
    /// `next_sequence` past `u32::MAX` is rejected with
    /// [`TransportError::SequenceExhausted`] and nothing is queued.
    pub fn enqueue(
        &mut self,
        payload: &[u8],
        kind: SegmentKind,
        destination: Destination,
        metadata: Option<Metadata>,
        now: Instant,
        sink: &mut impl SegmentSink,
    ) -> Result<usize, TransportError> {
        let mss = self.mss as usize;
        let mut chunks: Vec<&[u8]> = payload.chunks(mss).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        let needed: u64 = chunks.iter().map(|c| u64::from(seq_len(c.len()))).sum();
        let available = self.sequence_space_left();
        if needed > u64::from(available) {
            log::warn!("[sender] sequence space exhausted: need {needed}, {available} left");
            return Err(TransportError::SequenceExhausted { needed, available });
        }

        for chunk in chunks {
            let sequence = self.next_sequence;
            let segment = Segment {
                sequence,
                payload: chunk.to_vec(),
                kind,
                destination: destination.clone(),
                metadata: metadata.clone(),
            };
            self.next_sequence += seq_len(chunk.len());
            self.outstanding.insert(
                sequence,
                OutstandingEntry {
                    segment,
                    sent_at: None,
                    tx_count: 0,
                },
            );
        }
        log::debug!(
            "[sender] enqueued {} bytes, next_sequence={} queued={}",
            payload.len(),
            self.next_sequence,
            self.queued_len()
        );

        self.try_send(now, sink)
    }

    /// Transmit whatever the window allows.
    ///
    /// Segments marked for retransmission go first.  New segments are then
    /// sent in ascending order while
    /// `min(cwnd, peer_rwnd) - in_flight_bytes` stays positive.  Returns the
    /// number of segments transmitted.  Calling this again with nothing new
    /// to send and a full window is a no-op.
    pub fn try_send(
        &mut self,
        now: Instant,
        sink: &mut impl SegmentSink,
    ) -> Result<usize, TransportError> {
        let mut transmitted = 0usize;

        let lost: Vec<u32> = self
            .outstanding
            .range(..self.highest_sent)
            .filter(|(_, e)| e.needs_retransmit())
            .map(|(seq, _)| *seq)
            .collect();
        for seq in lost {
            self.transmit(seq, now, sink)?;
            transmitted += 1;
        }

        let window = self.congestion.cwnd().min(self.peer_rwnd);
        let mut allowed = i64::from(window) - i64::from(self.in_flight);
        if allowed <= 0 {
            log::debug!(
                "[sender] window full: in_flight={} cwnd={} rwnd={}",
                self.in_flight,
                self.congestion.cwnd(),
                self.peer_rwnd
            );
            return Ok(transmitted);
        }

        while allowed > 0 {
            let Some((&seq, entry)) = self.outstanding.range(self.highest_sent..).next() else {
                break;
            };
            let len = entry.segment.seq_len();
            self.transmit(seq, now, sink)?;
            allowed -= i64::from(len);
            transmitted += 1;
        }

        Ok(transmitted)
    }

    /// Process a cumulative ACK advertising the peer's receive window.
    pub fn handle_ack(
        &mut self,
        ack: u32,
        advertised_rwnd: u32,
        now: Instant,
        sink: &mut impl SegmentSink,
    ) -> Result<AckOutcome, TransportError> {
        self.peer_rwnd = advertised_rwnd;

        if ack > self.send_base {
            if ack > self.highest_sent {
                log::warn!(
                    "[sender] ignoring ACK {ack} beyond highest sent {}",
                    self.highest_sent
                );
                return Ok(AckOutcome::Ignored);
            }

            let remaining = self.outstanding.split_off(&ack);
            let acked = std::mem::replace(&mut self.outstanding, remaining);
            for entry in acked.values().filter(|e| e.is_sent()) {
                self.in_flight = self.in_flight.saturating_sub(entry.segment.seq_len());
            }

            let acked_bytes = ack - self.send_base;
            self.send_base = ack;
            self.dup_acks.clear();
            self.congestion.on_new_ack(acked_bytes);

            if self.has_unacked() {
                self.timer.rearm(now, self.send_base);
            } else {
                self.timer.disarm();
            }
            log::debug!(
                "[sender] ACK {ack} (new) acked={acked_bytes} cwnd={} ssthresh={}",
                self.congestion.cwnd(),
                self.congestion.ssthresh()
            );

            self.try_send(now, sink)?;
            return Ok(AckOutcome::Advanced { acked_bytes });
        }

        if ack < self.send_base || !self.has_unacked() {
            return Ok(AckOutcome::Ignored);
        }

        let count = self.dup_acks.entry(ack).or_insert(0);
        *count += 1;
        let count = *count;
        log::debug!("[sender] duplicate ACK {ack} (count {count})");

        if count == DUP_ACK_THRESHOLD {
            self.congestion.on_fast_retransmit();
            self.mark_for_retransmit(self.send_base);
            log::debug!(
                "[sender] fast retransmit seq={} cwnd={} ssthresh={}",
                self.send_base,
                self.congestion.cwnd(),
                self.congestion.ssthresh()
            );
            self.try_send(now, sink)?;
            return Ok(AckOutcome::FastRetransmit);
        }
        Ok(AckOutcome::Duplicate { count })
    }

    /// Check the retransmission timer.
    ///
    /// Returns `true` if it fired for a segment that is still outstanding,
    /// in which case the congestion window collapses and that segment is
    /// resent.  An expiry for already-acknowledged data does nothing.
    pub fn on_timer(
        &mut self,
        now: Instant,
        sink: &mut impl SegmentSink,
    ) -> Result<bool, TransportError> {
        let Some(timed) = self.timer.poll_expired(now) else {
            return Ok(false);
        };
        let Some(oldest) = self.oldest_unacked() else {
            return Ok(false);
        };
        if timed < oldest {
            // Stale expiry; the data it guarded is gone.
            self.timer.rearm(now, oldest);
            return Ok(false);
        }

        self.congestion.on_timeout();
        self.mark_for_retransmit(oldest);
        log::debug!(
            "[sender] timeout seq={oldest} -> retransmit, cwnd={} ssthresh={}",
            self.congestion.cwnd(),
            self.congestion.ssthresh()
        );
        self.try_send(now, sink)?;
        Ok(true)
    }

    /// Disarm the timer and drop every buffered segment.
    pub fn shutdown(&mut self) {
        self.timer.disarm();
        self.outstanding.clear();
        self.dup_acks.clear();
        self.in_flight = 0;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn oldest_unacked(&self) -> Option<u32> {
        self.outstanding
            .range(..self.highest_sent)
            .next()
            .map(|(seq, _)| *seq)
    }

    fn mark_for_retransmit(&mut self, sequence: u32) {
        if let Some(entry) = self.outstanding.get_mut(&sequence) {
            if entry.sent_at.take().is_some() {
                self.in_flight = self.in_flight.saturating_sub(entry.segment.seq_len());
            }
        }
    }

    /// Hand one segment to the sink and record it as sent.
    ///
    /// On failure the entry is left exactly as it was.
    fn transmit(
        &mut self,
        sequence: u32,
        now: Instant,
        sink: &mut impl SegmentSink,
    ) -> Result<(), TransportError> {
        let Some(entry) = self.outstanding.get_mut(&sequence) else {
            return Ok(());
        };
        sink.transmit(&entry.segment)?;

        entry.sent_at = Some(now);
        entry.tx_count += 1;
        let len = entry.segment.seq_len();
        let end = entry.segment.end();
        let tx_count = entry.tx_count;

        self.in_flight = self.in_flight.saturating_add(len);
        if end > self.highest_sent {
            self.highest_sent = end;
        }
        self.timer.arm_if_idle(now, self.send_base);
        log::debug!(
            "[sender] SENT seq={sequence} len={len} tx={tx_count} in_flight={} cwnd={}",
            self.in_flight,
            self.congestion.cwnd()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn sender() -> Sender {
        Sender::new(&TransportConfig::default())
    }

    fn bob() -> Destination {
        Destination::Peer("bob".into())
    }

    fn enqueue(s: &mut Sender, len: usize, now: Instant, sink: &mut Vec<Segment>) -> usize {
        s.enqueue(&vec![7u8; len], SegmentKind::Data, bob(), None, now, sink)
            .unwrap()
    }

    #[test]
    fn initial_state() {
        let s = sender();
        assert_eq!(s.send_base(), 1);
        assert_eq!(s.next_sequence(), 1);
        assert!(s.is_idle());
        assert!(!s.has_unacked());
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn enqueue_splits_into_mss_segments() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        enqueue(&mut s, 2000, now, &mut sent);

        let seqs: Vec<u32> = s.entries().map(|e| e.segment.sequence).collect();
        let lens: Vec<usize> = s.entries().map(|e| e.segment.payload.len()).collect();
        assert_eq!(seqs, vec![1, 513, 1025, 1537]);
        assert_eq!(lens, vec![512, 512, 512, 464]);
        assert_eq!(s.next_sequence(), 2001);
    }

    #[test]
    fn only_first_segment_fits_initial_window() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        let n = enqueue(&mut s, 2000, now, &mut sent);

        assert_eq!(n, 1);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sequence, 1);
        assert_eq!(s.in_flight_bytes(), 512);
        assert_eq!(s.queued_len(), 3);
        assert!(s.entry(1).unwrap().is_sent());
        assert!(!s.entry(513).unwrap().is_sent());
    }

    #[test]
    fn new_ack_grows_window_and_sends_more() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        enqueue(&mut s, 2000, now, &mut sent);
        sent.clear();

        let outcome = s.handle_ack(513, 16_384, now, &mut sent).unwrap();
        assert_eq!(outcome, AckOutcome::Advanced { acked_bytes: 512 });
        assert_eq!(s.congestion().cwnd(), 1024);
        assert_eq!(s.send_base(), 513);
        let seqs: Vec<u32> = sent.iter().map(|seg| seg.sequence).collect();
        assert_eq!(seqs, vec![513, 1025]);
        assert!(s.entry(1).is_none());
    }

    #[test]
    fn empty_payload_produces_one_marker_segment() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        enqueue(&mut s, 0, now, &mut sent);

        assert_eq!(s.outstanding_len(), 1);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].payload.is_empty());
        assert_eq!(s.next_sequence(), 2);
    }

    #[test]
    fn window_full_sends_nothing_and_keeps_buffer() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        enqueue(&mut s, 2000, now, &mut sent);
        assert_eq!(s.in_flight_bytes(), s.congestion().cwnd());

        let before: Vec<(u32, bool)> = s
            .entries()
            .map(|e| (e.segment.sequence, e.is_sent()))
            .collect();
        sent.clear();
        assert_eq!(s.try_send(now, &mut sent).unwrap(), 0);
        assert_eq!(s.try_send(now, &mut sent).unwrap(), 0);
        let after: Vec<(u32, bool)> = s
            .entries()
            .map(|e| (e.segment.sequence, e.is_sent()))
            .collect();
        assert!(sent.is_empty());
        assert_eq!(before, after);
    }

    #[test]
    fn peer_rwnd_limits_window() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        enqueue(&mut s, 512, now, &mut sent);
        // Grow cwnd well beyond the advertised window.
        s.handle_ack(513, 512, now, &mut sent).unwrap();
        sent.clear();
        enqueue(&mut s, 2048, now, &mut sent);
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn stale_ack_ignored() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        enqueue(&mut s, 1024, now, &mut sent);
        s.handle_ack(513, 16_384, now, &mut sent).unwrap();
        let cwnd = s.congestion().cwnd();

        assert_eq!(
            s.handle_ack(1, 16_384, now, &mut sent).unwrap(),
            AckOutcome::Ignored
        );
        assert_eq!(s.send_base(), 513);
        assert_eq!(s.congestion().cwnd(), cwnd);
    }

    #[test]
    fn ack_for_unsent_data_ignored() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        enqueue(&mut s, 2000, now, &mut sent);

        // Only [1, 513) is on the wire.
        assert_eq!(
            s.handle_ack(1537, 16_384, now, &mut sent).unwrap(),
            AckOutcome::Ignored
        );
        assert_eq!(s.send_base(), 1);
        assert_eq!(s.outstanding_len(), 4);
    }

    #[test]
    fn ack_updates_rwnd_even_when_stale() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        s.handle_ack(1, 999, now, &mut sent).unwrap();
        assert_eq!(s.peer_rwnd(), 999);
    }

    /// Put `n` full segments on the wire by opening the window first.
    fn sender_with_in_flight(n: u32, now: Instant, sent: &mut Vec<Segment>) -> Sender {
        let config = TransportConfig {
            initial_cwnd: 512 * n,
            ..TransportConfig::default()
        };
        let mut s = Sender::new(&config);
        s.enqueue(&vec![0u8; 512 * n as usize], SegmentKind::Data, bob(), None, now, sent)
            .unwrap();
        assert_eq!(sent.len(), n as usize);
        s
    }

    #[test]
    fn fast_retransmit_on_exactly_third_duplicate() {
        let now = Instant::now();
        let mut sent = Vec::new();
        let mut s = sender_with_in_flight(4, now, &mut sent);
        sent.clear();

        assert_eq!(
            s.handle_ack(1, 16_384, now, &mut sent).unwrap(),
            AckOutcome::Duplicate { count: 1 }
        );
        assert_eq!(
            s.handle_ack(1, 16_384, now, &mut sent).unwrap(),
            AckOutcome::Duplicate { count: 2 }
        );
        assert!(sent.is_empty());

        assert_eq!(
            s.handle_ack(1, 16_384, now, &mut sent).unwrap(),
            AckOutcome::FastRetransmit
        );
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sequence, 1);
        assert_eq!(s.entry(1).unwrap().tx_count, 2);
        // cwnd was 2048: ssthresh = 1024, cwnd = 1024 + 3 * 512
        assert_eq!(s.congestion().ssthresh(), 1024);
        assert_eq!(s.congestion().cwnd(), 2560);

        // A fourth duplicate does not trigger again.
        sent.clear();
        assert_eq!(
            s.handle_ack(1, 16_384, now, &mut sent).unwrap(),
            AckOutcome::Duplicate { count: 4 }
        );
        assert!(sent.is_empty());
        assert_eq!(s.congestion().cwnd(), 2560);
    }

    #[test]
    fn new_ack_resets_duplicate_count() {
        let now = Instant::now();
        let mut sent = Vec::new();
        let mut s = sender_with_in_flight(4, now, &mut sent);

        s.handle_ack(1, 16_384, now, &mut sent).unwrap();
        s.handle_ack(1, 16_384, now, &mut sent).unwrap();
        s.handle_ack(513, 16_384, now, &mut sent).unwrap();

        assert_eq!(
            s.handle_ack(513, 16_384, now, &mut sent).unwrap(),
            AckOutcome::Duplicate { count: 1 }
        );
        assert_eq!(
            s.handle_ack(513, 16_384, now, &mut sent).unwrap(),
            AckOutcome::Duplicate { count: 2 }
        );
    }

    #[test]
    fn duplicate_without_data_in_flight_ignored() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        for _ in 0..5 {
            assert_eq!(
                s.handle_ack(1, 16_384, now, &mut sent).unwrap(),
                AckOutcome::Ignored
            );
        }
        assert_eq!(s.congestion().cwnd(), 512);
    }

    #[test]
    fn timer_armed_on_first_send_and_disarmed_when_all_acked() {
        let now = Instant::now();
        let mut s = sender();
        let mut sent = Vec::new();
        enqueue(&mut s, 100, now, &mut sent);
        assert_eq!(s.next_deadline(), Some(now + Duration::from_secs(1)));

        s.handle_ack(101, 16_384, now, &mut sent).unwrap();
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn new_ack_rearms_timer_when_data_remains() {
        let now = Instant::now();
        let mut sent = Vec::new();
        let mut s = sender_with_in_flight(2, now, &mut sent);
        let later = now + Duration::from_millis(400);
        s.handle_ack(513, 16_384, later, &mut sent).unwrap();
        assert_eq!(s.next_deadline(), Some(later + Duration::from_secs(1)));
        assert_eq!(s.timer().timed_sequence(), Some(513));
    }

    #[test]
    fn timeout_collapses_window_and_resends_oldest() {
        let now = Instant::now();
        let mut sent = Vec::new();
        let mut s = sender_with_in_flight(4, now, &mut sent);
        sent.clear();

        let fire = now + Duration::from_secs(1);
        assert!(s.on_timer(fire, &mut sent).unwrap());
        assert_eq!(s.congestion().cwnd(), 512);
        assert_eq!(s.congestion().ssthresh(), 1024);
        // Resent despite three other segments still occupying the window.
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sequence, 1);
        assert_eq!(s.next_deadline(), Some(fire + Duration::from_secs(1)));
    }

    #[test]
    fn timer_before_deadline_is_noop() {
        let now = Instant::now();
        let mut sent = Vec::new();
        let mut s = sender_with_in_flight(1, now, &mut sent);
        sent.clear();
        assert!(!s.on_timer(now + Duration::from_millis(10), &mut sent).unwrap());
        assert!(sent.is_empty());
    }

    #[test]
    fn link_failure_leaves_earlier_segments_intact() {
        let now = Instant::now();
        let config = TransportConfig {
            initial_cwnd: 4 * 512,
            ..TransportConfig::default()
        };
        let mut s = Sender::new(&config);

        let mut calls = 0;
        let mut failing = |_: &Segment| {
            calls += 1;
            if calls == 2 {
                Err(TransportError::ChannelClosed)
            } else {
                Ok(())
            }
        };
        let err = s
            .enqueue(&[0u8; 2048], SegmentKind::Data, bob(), None, now, &mut failing)
            .unwrap_err();
        assert!(matches!(err, TransportError::ChannelClosed));

        let first = s.entry(1).unwrap();
        assert!(first.is_sent());
        assert_eq!(first.tx_count, 1);
        let second = s.entry(513).unwrap();
        assert!(!second.is_sent());
        assert_eq!(second.tx_count, 0);
        assert_eq!(s.outstanding_len(), 4);
        assert_eq!(s.in_flight_bytes(), 512);
    }

    #[test]
    fn shutdown_releases_everything() {
        let now = Instant::now();
        let mut sent = Vec::new();
        let mut s = sender_with_in_flight(2, now, &mut sent);
        s.shutdown();
        assert!(s.is_idle());
        assert_eq!(s.next_deadline(), None);
        sent.clear();
        assert!(!s.on_timer(now + Duration::from_secs(5), &mut sent).unwrap());
        assert!(sent.is_empty());
    }

    #[test]
    fn enqueue_past_sequence_space_is_rejected() {
        let now = Instant::now();
        let isn = u32::MAX - 600;
        let mut s = Sender::with_initial_sequence(&TransportConfig::default(), isn);
        let mut sent = Vec::new();

        let err = s
            .enqueue(&[1u8; 2048], SegmentKind::Data, bob(), None, now, &mut sent)
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::SequenceExhausted {
                needed: 2048,
                available: 600
            }
        ));
        assert!(s.is_idle());
        assert!(sent.is_empty());
        assert_eq!(s.next_sequence(), isn);
        assert_eq!(s.sequence_space_left(), 600);
    }

    #[test]
    fn stream_can_fill_sequence_space_exactly() {
        let now = Instant::now();
        let isn = u32::MAX - 600;
        let mut s = Sender::with_initial_sequence(&TransportConfig::default(), isn);
        let mut sent = Vec::new();

        enqueue(&mut s, 600, now, &mut sent);
        assert_eq!(s.next_sequence(), u32::MAX);
        assert_eq!(s.sequence_space_left(), 0);
        assert_eq!(sent.len(), 1);

        s.handle_ack(isn + 512, 16_384, now, &mut sent).unwrap();
        let seqs: Vec<u32> = sent.iter().map(|seg| seg.sequence).collect();
        assert_eq!(seqs, vec![isn, isn + 512]);

        s.handle_ack(u32::MAX, 16_384, now, &mut sent).unwrap();
        assert!(s.is_idle());
        assert_eq!(s.next_deadline(), None);

        let err = s
            .enqueue(&[], SegmentKind::Data, bob(), None, now, &mut sent)
            .unwrap_err();
        assert!(matches!(err, TransportError::SequenceExhausted { .. }));
        assert_eq!(sent.len(), 2);
    }
}
