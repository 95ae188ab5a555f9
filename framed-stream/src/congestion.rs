//! TCP-style congestion window management.
//!
//! [`CongestionController`] is pure state: it never touches the network and
//! is fully determined by the sequence of events fed into it.  All window
//! quantities are in **bytes**.
//!
//! ```text
//!             new ACK: cwnd += mss            new ACK: cwnd += max(1, mss²/cwnd)
//!            ┌───────────────┐               ┌───────────────┐
//!            ▼               │               ▼               │
//!      ┌────────────┐  cwnd >= ssthresh  ┌──────────────────────┐
//!      │ SLOW START │ ─────────────────▶ │ CONGESTION AVOIDANCE │
//!      └────────────┘                    └──────────────────────┘
//!            ▲          timeout: ssthresh = max(cwnd/2, mss), cwnd = mss
//!            └──────────────────────────────────────┘
//! ```
//!
//! Both `cwnd` and `ssthresh` are clamped so they never fall below one MSS.

/// Growth regime the controller is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SlowStart,
    CongestionAvoidance,
}

/// Congestion window / slow-start threshold state for one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionController {
    cwnd: u32,
    ssthresh: u32,
    mss: u32,
}

impl CongestionController {
    /// Create a controller.  `initial_cwnd` and `initial_ssthresh` are raised
    /// to `mss` if smaller.
    ///
    /// # Panics
    ///
    /// Panics if `mss` is zero.
    pub fn new(mss: u32, initial_cwnd: u32, initial_ssthresh: u32) -> Self {
        assert!(mss > 0, "mss must be non-zero");
        Self {
            cwnd: initial_cwnd.max(mss),
            ssthresh: initial_ssthresh.max(mss),
            mss,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn mss(&self) -> u32 {
        self.mss
    }

    pub fn phase(&self) -> Phase {
        if self.cwnd < self.ssthresh {
            Phase::SlowStart
        } else {
            Phase::CongestionAvoidance
        }
    }

    /// A cumulative ACK advanced the left window edge.
    ///
    /// Slow start adds one MSS per ACK; congestion avoidance adds roughly one
    /// MSS per window's worth of ACKs.  The amount acknowledged does not
    /// affect growth.
    pub fn on_new_ack(&mut self, _acked_bytes: u32) {
        let increment = match self.phase() {
            Phase::SlowStart => self.mss,
            Phase::CongestionAvoidance => {
                let step = u64::from(self.mss) * u64::from(self.mss) / u64::from(self.cwnd);
                (step as u32).max(1)
            }
        };
        self.cwnd = self.cwnd.saturating_add(increment);
    }

    /// The retransmission timer expired.  Any expiry counts as congestion.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(self.mss);
        self.cwnd = self.mss;
    }

    /// Three duplicate ACKs arrived for the same sequence.
    ///
    /// The window is inflated by the three segments known to have left the
    /// network.
    pub fn on_fast_retransmit(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(self.mss);
        self.cwnd = self.ssthresh.saturating_add(self.mss.saturating_mul(3));
    }
}
