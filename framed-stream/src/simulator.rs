//! Deterministic network simulator for exercising two sessions end to end.
//!
//! Real channels lose, reorder and duplicate messages.  [`Simulator`] sits
//! between two [`Session`]s whose links are plain `Vec<Message>` buffers,
//! moves their output across a virtual network and applies a seeded fault
//! model:
//!
//! | Fault       | Description                                              |
//! |-------------|----------------------------------------------------------|
//! | Loss        | Drop a message with probability `loss_rate`.             |
//! | Reordering  | Add a random extra delay up to `reorder_delay`, letting  |
//! |             | later messages overtake it.                              |
//! | Duplication | Deliver a message twice.                                 |
//!
//! Time is virtual: the simulator jumps straight to the next delivery or
//! retransmission deadline, so a run that spans minutes of protocol time
//! completes instantly.  The same seed always yields the same run.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::error::TransportError;
use crate::message::Message;
use crate::session::Session;

/// A session whose link is an in-memory outbox.
pub type SimSession = Session<Vec<Message>>;

/// Fault model.  Probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub reorder_rate: f64,
    /// Upper bound of the extra delay given to a reordered message.
    pub reorder_delay: Duration,
    pub duplicate_rate: f64,
    /// One-way delay applied to every message.
    pub latency: Duration,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(50),
            duplicate_rate: 0.0,
            latency: Duration::from_millis(10),
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        for (name, p) in [
            ("loss_rate", self.loss_rate),
            ("reorder_rate", self.reorder_rate),
            ("duplicate_rate", self.duplicate_rate),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(TransportError::config(format!(
                    "{name} must be within [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// Which end of the simulated link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub delivered: u64,
    pub timeouts: u64,
}

/// Two sessions joined by a lossy virtual network.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    now: Instant,
    a: SimSession,
    b: SimSession,
    /// `(delivery time, tiebreak) -> (destination, message)`
    in_flight: BTreeMap<(Instant, u64), (Side, Message)>,
    next_id: u64,
    stats: SimStats,
}

impl Simulator {
    /// Join `a` and `b`.  Virtual time starts at `start`.
    pub fn new(
        config: SimulatorConfig,
        a: SimSession,
        b: SimSession,
        start: Instant,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            now: start,
            a,
            b,
            in_flight: BTreeMap::new(),
            next_id: 0,
            stats: SimStats::default(),
        })
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn session(&self, side: Side) -> &SimSession {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn session_mut(&mut self, side: Side) -> &mut SimSession {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    /// `true` when nothing is on the wire and no timer is pending.
    pub fn is_quiet(&self) -> bool {
        self.in_flight.is_empty()
            && self.a.link().is_empty()
            && self.b.link().is_empty()
            && self.a.next_deadline().is_none()
            && self.b.next_deadline().is_none()
    }

    /// Advance to the next event and process it.
    ///
    /// Returns `false` when the network is quiet.
    pub fn step(&mut self) -> Result<bool, TransportError> {
        self.collect(Side::A);
        self.collect(Side::B);

        let next_delivery = self.in_flight.keys().next().map(|(t, _)| *t);
        let next_timer = [self.a.next_deadline(), self.b.next_deadline()]
            .into_iter()
            .flatten()
            .min();
        let Some(at) = [next_delivery, next_timer].into_iter().flatten().min() else {
            return Ok(false);
        };
        if at > self.now {
            self.now = at;
        }

        if next_delivery.is_some_and(|t| t <= self.now) {
            if let Some((_, (to, message))) = self.in_flight.pop_first() {
                self.stats.delivered += 1;
                let now = self.now;
                self.session_mut(to).on_wire_message(message, now)?;
            }
        } else {
            for side in [Side::A, Side::B] {
                let now = self.now;
                let session = self.session_mut(side);
                if session.next_deadline().is_some_and(|d| d <= now) && session.on_timer(now)? {
                    self.stats.timeouts += 1;
                }
            }
        }
        Ok(true)
    }

    /// Step until quiet or `max_steps` is reached.  Returns `true` if the
    /// network went quiet.
    pub fn run(&mut self, max_steps: usize) -> Result<bool, TransportError> {
        for _ in 0..max_steps {
            if !self.step()? {
                log::debug!("[sim] quiet at {:?}: {:?}", self.now, self.stats);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Move `from`'s outbox onto the virtual wire.
    fn collect(&mut self, from: Side) {
        let outbox: Vec<Message> = self.session_mut(from).link_mut().drain(..).collect();
        for message in outbox {
            self.route(from.other(), message);
        }
    }

    fn route(&mut self, to: Side, message: Message) {
        self.stats.sent += 1;
        if self.rng.gen_bool(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::debug!("[sim] drop {} -> {to:?}", message.type_name());
            return;
        }

        let copies = if self.rng.gen_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };
        for _ in 0..copies {
            let mut delay = self.config.latency;
            if self.rng.gen_bool(self.config.reorder_rate) {
                self.stats.reordered += 1;
                delay += self
                    .rng
                    .gen_range(Duration::ZERO..=self.config.reorder_delay);
            }
            self.in_flight
                .insert((self.now + delay, self.next_id), (to, message.clone()));
            self.next_id += 1;
        }
    }
}
