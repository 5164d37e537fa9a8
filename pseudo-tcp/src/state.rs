//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy.  Transitions are implemented in [`crate::connection`]; the legal
//! ones are:
//!
//! ```text
//!            connect()                 CONNECT rcvd
//!  LISTEN ───────────────▶ SYN_SENT ──────────────────▶ ESTABLISHED
//!    │                                                      ▲
//!    │ CONNECT rcvd (echo CONNECT)          any other seg   │
//!    └──────────────────▶ SYN_RECEIVED ─────────────────────┘
//!
//!  any state ── RST / retransmit ceiling / stall / close(true) ──▶ CLOSED
//! ```
//!
//! `CLOSED` is terminal: no further state mutation happens once it is
//! entered.

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ConnectionState {
    /// Passive, waiting for a CONNECT from the peer or a local `connect()`.
    #[default]
    Listen,
    /// CONNECT has been queued; waiting for the peer's CONNECT.
    SynSent,
    /// Peer's CONNECT received and echoed; waiting for any further segment.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Terminal state.
    Closed,
}

impl ConnectionState {
    /// Retransmission attempts allowed per segment in this state.
    pub fn max_attempts(self) -> u32 {
        if self == Self::Established {
            30
        } else {
            15
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// What the application asked for via `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shutdown {
    #[default]
    None,
    /// Drain queued data and the pending ack, then go quiet.
    Graceful,
    /// Stop immediately.
    Forceful,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_listen() {
        assert_eq!(ConnectionState::default(), ConnectionState::Listen);
        assert_eq!(Shutdown::default(), Shutdown::None);
    }

    #[test]
    fn attempt_ceiling_depends_on_state() {
        assert_eq!(ConnectionState::SynSent.max_attempts(), 15);
        assert_eq!(ConnectionState::SynReceived.max_attempts(), 15);
        assert_eq!(ConnectionState::Established.max_attempts(), 30);
    }

    #[test]
    fn pre_established_states_order_before_established() {
        assert!(ConnectionState::SynReceived < ConnectionState::Established);
        assert!(ConnectionState::Listen < ConnectionState::SynSent);
    }

    #[test]
    fn display_uses_protocol_names() {
        assert_eq!(ConnectionState::SynReceived.to_string(), "SYN_RECEIVED");
        assert_eq!(ConnectionState::Closed.to_string(), "CLOSED");
    }
}
