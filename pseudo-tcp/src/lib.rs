//! `pseudo-tcp`: a TCP-like reliable byte stream over any unreliable
//! datagram channel.
//!
//! # Architecture
//!
//! ```text
//!      application: connect / send / recv / close
//!               │                       ▲ on_open / on_readable /
//!               ▼                       │ on_writable / on_closed
//!  ┌──────────────────────────────────────────────────────┐
//!  │                      Connection                      │
//!  │  state machine · timers · ack policy · MTU handling  │
//!  │ ┌───────────┐ ┌──────────┐ ┌────────────┐ ┌────────┐ │
//!  │ │ SendQueue │ │ Receiver │ │ Congestion │ │  Rto   │ │
//!  │ └───────────┘ └──────────┘ └────────────┘ └────────┘ │
//!  └───────┬──────────────────────────▲───────────────────┘
//!          │ write_packet             │ notify_packet / notify_clock
//!  ┌───────▼──────────────────────────┴───────┐
//!  │ Channel: UDP socket, simulator, anything │
//!  └──────────────────────────────────────────┘
//! ```
//!
//! The engine is sans-I/O: it never blocks, sleeps, or spawns.  The
//! embedding event loop feeds it datagrams and clock ticks and asks
//! [`Connection::next_tick_deadline`] when to call back.
//!
//! Each module has a single responsibility:
//! - [`packet`]      — wire format (serialise / deserialise)
//! - [`connection`]  — per-connection engine and application API
//! - [`state`]       — finite-state-machine types
//! - [`sender`]      — send buffer and segment list
//! - [`receiver`]    — receive buffer and out-of-order reassembly
//! - [`congestion`]  — slow start, avoidance, NewReno recovery
//! - [`timer`]       — RTT estimation and retransmission timeout
//! - [`mtu`]         — path-MTU table and MSS derivation
//! - [`clock`]       — injectable millisecond clock
//! - [`config`]      — tunable per-connection parameters
//! - [`simulator`]   — lossy/reordering in-memory link for testing
//! - [`socket`]      — async UDP transport and event loop

pub mod clock;
pub mod config;
pub mod congestion;
pub mod connection;
pub mod mtu;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use connection::{Channel, Connection, TcpError, TcpObserver, WriteResult};
pub use state::ConnectionState;
