//! Retransmission timer.
//!
//! A sender owns exactly one [`RetransmitTimer`].  When armed it is bound to
//! the sequence number at the left edge of the send window (`send_base`) and
//! a deadline `RTO` in the future.  The timer holds no task of its own: the
//! owner either sleeps until [`RetransmitTimer::deadline`] or polls
//! [`RetransmitTimer::poll_expired`] with an explicit clock.
//!
//! ```text
//!          arm (segment sent, timer idle)
//!   Idle ─────────────────────────────────▶ Armed(deadline, seq)
//!    ▲                                          │   │
//!    │  disarm (everything acknowledged)        │   │ rearm (new ACK,
//!    └──────────────────────────────────────────┘   │ data outstanding)
//!    ▲                                              ▼
//!    └──────── poll_expired (deadline reached) ── Armed
//! ```
//!
//! The RTO is fixed; there is no RTT sampling or back-off.

use std::time::Duration;

use tokio::time::Instant;

/// Current timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed { deadline: Instant, sequence: u32 },
}

/// Single-deadline retransmission timer.
#[derive(Debug)]
pub struct RetransmitTimer {
    rto: Duration,
    state: TimerState,
}

impl RetransmitTimer {
    pub fn new(rto: Duration) -> Self {
        Self {
            rto,
            state: TimerState::Idle,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, TimerState::Armed { .. })
    }

    /// Deadline of the pending expiry, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TimerState::Armed { deadline, .. } => Some(deadline),
            TimerState::Idle => None,
        }
    }

    /// Sequence number the pending expiry is bound to.
    pub fn timed_sequence(&self) -> Option<u32> {
        match self.state {
            TimerState::Armed { sequence, .. } => Some(sequence),
            TimerState::Idle => None,
        }
    }

    /// Arm for `sequence` unless a timer is already running.
    ///
    /// Returns `true` if the timer was idle and is now armed.
    pub fn arm_if_idle(&mut self, now: Instant, sequence: u32) -> bool {
        if self.is_armed() {
            return false;
        }
        self.rearm(now, sequence);
        true
    }

    /// Restart the timer for `sequence`, replacing any pending deadline.
    pub fn rearm(&mut self, now: Instant, sequence: u32) {
        self.state = TimerState::Armed {
            deadline: now + self.rto,
            sequence,
        };
    }

    pub fn disarm(&mut self) {
        self.state = TimerState::Idle;
    }

    /// If the deadline has passed, return the timed sequence and go idle.
    ///
    /// The caller must check the returned sequence is still outstanding
    /// before acting on it.
    pub fn poll_expired(&mut self, now: Instant) -> Option<u32> {
        match self.state {
            TimerState::Armed { deadline, sequence } if now >= deadline => {
                self.state = TimerState::Idle;
                Some(sequence)
            }
            _ => None,
        }
    }
}
