//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides a [`Network`] joining two [`Connection`]s through a
//! pair of [`Endpoint`] channels, with a configurable fault model:
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Packet loss      | Drop a packet with probability `loss_rate`.        |
//! | Reordering       | Delay a packet by up to `reorder_delay_ms` extra,  |
//! |                  | letting later packets overtake it.                 |
//! | Duplication      | Deliver a packet twice.                            |
//! | MTU limit        | Reject datagrams above `mtu` with `TooLarge`.      |
//!
//! Time is a shared [`ManualClock`] advanced by [`Network::step`] straight
//! to the next interesting instant, so a multi-minute transfer runs in
//! milliseconds.  All randomness comes from a seeded [`StdRng`]; the same
//! seed replays the same run.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clock::ManualClock;
use crate::connection::{Channel, Connection, WriteResult};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a packet is held back.
    pub reorder_rate: f64,
    /// Maximum extra delay applied to reordered packets.
    pub reorder_delay_ms: u32,
    /// Probability that a packet is delivered twice.
    pub duplicate_rate: f64,
    /// One-way propagation delay.
    pub latency_ms: u32,
    /// Largest datagram the link carries (`None` = unlimited).
    pub mtu: Option<usize>,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the link is a transparent pipe.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay_ms: 0,
            duplicate_rate: 0.0,
            latency_ms: 10,
            mtu: None,
            seed: 0,
        }
    }
}

/// Which end of the link a datagram belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    fn peer(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Counters collected while the link runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Datagrams accepted from side A.
    pub sent_a: u64,
    /// Datagrams accepted from side B.
    pub sent_b: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub too_large: u64,
    pub delivered: u64,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct InFlight {
    deliver_at: u32,
    order: u64,
    to: Side,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct Link {
    config: SimulatorConfig,
    clock: ManualClock,
    rng: StdRng,
    queue: BinaryHeap<Reverse<InFlight>>,
    order: u64,
    stats: LinkStats,
}

impl Link {
    fn write(&mut self, from: Side, bytes: &[u8]) -> WriteResult {
        if self.config.mtu.is_some_and(|mtu| bytes.len() > mtu) {
            self.stats.too_large += 1;
            return WriteResult::TooLarge;
        }
        match from {
            Side::A => self.stats.sent_a += 1,
            Side::B => self.stats.sent_b += 1,
        }

        if self.rng.random_bool(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::trace!("[sim] drop {:?} len={}", from, bytes.len());
            return WriteResult::Success;
        }

        let now = self.clock.get();
        let mut delay = self.config.latency_ms;
        if self.config.reorder_delay_ms > 0 && self.rng.random_bool(self.config.reorder_rate) {
            delay += self.rng.random_range(1..=self.config.reorder_delay_ms);
            self.stats.reordered += 1;
        }
        self.enqueue(now + delay, from.peer(), bytes.to_vec());

        if self.rng.random_bool(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            self.enqueue(now + delay + 1, from.peer(), bytes.to_vec());
        }
        WriteResult::Success
    }

    fn enqueue(&mut self, deliver_at: u32, to: Side, bytes: Vec<u8>) {
        self.order += 1;
        self.queue.push(Reverse(InFlight {
            deliver_at,
            order: self.order,
            to,
            bytes,
        }));
    }

    fn pop_due(&mut self, now: u32) -> Option<InFlight> {
        if self.queue.peek()?.0.deliver_at > now {
            return None;
        }
        self.queue.pop().map(|Reverse(p)| p)
    }

    fn next_delivery(&self) -> Option<u32> {
        self.queue.peek().map(|Reverse(p)| p.deliver_at)
    }
}

/// One side's view of the link; hand it to [`Connection::new`].
#[derive(Debug, Clone)]
pub struct Endpoint {
    side: Side,
    link: Rc<RefCell<Link>>,
}

impl Channel for Endpoint {
    fn write_packet(&mut self, packet: &[u8]) -> WriteResult {
        self.link.borrow_mut().write(self.side, packet)
    }
}

/// A simulated link plus the clock both connections read.
#[derive(Debug)]
pub struct Network {
    link: Rc<RefCell<Link>>,
    clock: ManualClock,
}

impl Network {
    pub fn new(mut config: SimulatorConfig) -> Self {
        config.loss_rate = config.loss_rate.clamp(0.0, 1.0);
        config.reorder_rate = config.reorder_rate.clamp(0.0, 1.0);
        config.duplicate_rate = config.duplicate_rate.clamp(0.0, 1.0);

        let clock = ManualClock::new(1_000);
        let link = Link {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            clock: clock.clone(),
            queue: BinaryHeap::new(),
            order: 0,
            stats: LinkStats::default(),
        };
        Self {
            link: Rc::new(RefCell::new(link)),
            clock,
        }
    }

    /// Shared time source; give a clone to each connection.
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn endpoint(&self, side: Side) -> Endpoint {
        Endpoint {
            side,
            link: Rc::clone(&self.link),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.link.borrow().stats.clone()
    }

    /// Change the loss probability mid-run, e.g. to cut the link entirely.
    pub fn set_loss_rate(&self, rate: f64) {
        self.link.borrow_mut().config.loss_rate = rate.clamp(0.0, 1.0);
    }

    /// Datagrams still on the wire.
    pub fn in_flight(&self) -> usize {
        self.link.borrow().queue.len()
    }

    /// Deliver everything due, fire expired timers, then advance the clock
    /// to the next delivery or deadline.
    pub fn step(&self, a: &mut Connection, b: &mut Connection) {
        let now = self.clock.get();

        loop {
            // Release the borrow before delivering; the receiver may write.
            let due = self.link.borrow_mut().pop_due(now);
            let Some(packet) = due else { break };
            self.link.borrow_mut().stats.delivered += 1;
            match packet.to {
                Side::A => a.notify_packet(&packet.bytes),
                Side::B => b.notify_packet(&packet.bytes),
            };
        }

        for conn in [&mut *a, &mut *b] {
            if conn.next_tick_deadline(now).is_some_and(|d| d.is_zero()) {
                conn.notify_clock(now);
            }
        }

        let mut next = self.link.borrow().next_delivery();
        for conn in [&*a, &*b] {
            if let Some(d) = conn.next_tick_deadline(now) {
                let at = now + d.as_millis() as u32;
                next = Some(next.map_or(at, |n| n.min(at)));
            }
        }
        let next = next.unwrap_or(now + 1).max(now + 1);
        self.clock.set(next);
    }

    /// Step until `done` holds or `max_ms` of simulated time has passed.
    ///
    /// Returns whether `done` was reached.
    pub fn run_until<F>(
        &self,
        a: &mut Connection,
        b: &mut Connection,
        max_ms: u32,
        mut done: F,
    ) -> bool
    where
        F: FnMut(&mut Connection, &mut Connection) -> bool,
    {
        let deadline = self.clock.get() + max_ms;
        while self.clock.get() < deadline {
            if done(a, b) {
                return true;
            }
            self.step(a, b);
        }
        done(a, b)
    }
}
