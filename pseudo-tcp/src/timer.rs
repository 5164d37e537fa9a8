//! Retransmission-timeout estimation.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  [`RetransmitTimer`] tracks the
//! smoothed round-trip estimate that bound is derived from.  The timer
//! *anchors* (when the oldest unacked segment went out, when an ack became
//! pending) live on the connection; this module only owns the arithmetic.
//!
//! RTO is computed using Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + max(1, 4 × RTTVAR)`
//! clamped to [`MIN_RTO`, `MAX_RTO`], and doubles on each consecutive
//! timeout (exponential back-off).
//!
//! All durations are whole milliseconds.

/// Lower bound on the retransmission timeout.
pub const MIN_RTO: u32 = 250;
/// RTO before any sample, and the back-off ceiling before the handshake ends.
pub const DEF_RTO: u32 = 3_000;
/// Back-off ceiling once established.
pub const MAX_RTO: u32 = 60_000;
/// Default delay before a lone ack is flushed.
pub const DEF_ACK_DELAY: u32 = 100;

/// RTT estimator and current RTO for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitTimer {
    /// Current RTO, updated after each RTT sample.
    pub current_rto: u32,
    /// Smoothed RTT estimate (SRTT).
    pub srtt: Option<u32>,
    /// RTT variance estimate (RTTVAR).
    pub rttvar: Option<u32>,
}

impl Default for RetransmitTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self {
            current_rto: DEF_RTO,
            srtt: None,
            rttvar: None,
        }
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = (3·RTTVAR + |R − SRTT|) / 4
    ///                       SRTT   = (7·SRTT + R) / 8
    ///
    /// Arithmetic is done in `u64` so an absurd sample saturates the estimate
    /// instead of overflowing.
    pub fn record_rtt_sample(&mut self, rtt: u32) {
        let r = u64::from(rtt);
        let (srtt, rttvar) = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let srtt = u64::from(srtt);
                let err = r.abs_diff(srtt);
                let rttvar = (3 * u64::from(rttvar) + err) / 4;
                let srtt = (7 * srtt + r) / 8;
                (srtt, rttvar)
            }
            _ => (r, r / 2),
        };
        let rto = srtt + (4 * rttvar).max(1);
        self.srtt = Some(saturate(srtt));
        self.rttvar = Some(saturate(rttvar));
        self.current_rto = saturate(rto).clamp(MIN_RTO, MAX_RTO);
    }

    /// Double the RTO after a timeout, capped at `limit`.
    pub fn back_off(&mut self, limit: u32) {
        self.current_rto = self.current_rto.saturating_mul(2).min(limit);
    }
}

fn saturate(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}
