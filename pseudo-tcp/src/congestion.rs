//! Congestion window management.
//!
//! [`CongestionControl`] implements slow start and congestion avoidance
//! (RFC 5681), fast retransmit on the third duplicate ack, and NewReno fast
//! recovery (RFC 6582): a partial ack during recovery retransmits only the
//! next unacknowledged segment and recovery ends once everything outstanding
//! when it began has been acknowledged.
//!
//! All quantities are in bytes.  The caller supplies `mss` on every call
//! because it can shrink at any time.

use crate::sender::seq_le;

/// Duplicate acks that trigger fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionControl {
    /// Congestion window.
    pub cwnd: u32,
    /// Slow-start threshold.
    pub ssthresh: u32,
    /// Consecutive duplicate acks seen.
    pub dup_acks: u32,
    /// `snd_nxt` when fast recovery began; recovery ends once acked.
    pub recover: u32,
}

impl CongestionControl {
    pub fn new(mss: u32, ssthresh: u32) -> Self {
        Self {
            cwnd: mss.saturating_mul(2),
            ssthresh,
            dup_acks: 0,
            recover: 0,
        }
    }

    pub fn in_recovery(&self) -> bool {
        self.dup_acks >= DUP_ACK_THRESHOLD
    }

    /// Bytes the peer and the network allow in flight right now.
    ///
    /// The first two duplicate acks each admit one extra segment
    /// (limited transmit, RFC 3042).
    pub fn send_window(&self, snd_wnd: u32, mss: u32) -> u32 {
        let mut cwnd = self.cwnd;
        if self.dup_acks == 1 || self.dup_acks == 2 {
            cwnd = cwnd.saturating_add(self.dup_acks * mss);
        }
        snd_wnd.min(cwnd)
    }

    /// Account for an ack that moved `snd_una` forward by `acked` bytes.
    ///
    /// `in_flight` is measured after `snd_una` moved.  Returns `true` when
    /// the caller must retransmit the next unacknowledged segment (partial
    /// ack during recovery).
    pub fn on_new_ack(&mut self, acked: u32, snd_una: u32, in_flight: u32, mss: u32) -> bool {
        if self.in_recovery() {
            if seq_le(self.recover, snd_una) {
                self.cwnd = self.ssthresh.min(in_flight.saturating_add(mss));
                self.dup_acks = 0;
                log::debug!("[cc] recovery complete cwnd={}", self.cwnd);
                false
            } else {
                self.cwnd = (self.cwnd - acked.min(self.cwnd)).saturating_add(mss);
                log::debug!("[cc] partial ack acked={} cwnd={}", acked, self.cwnd);
                true
            }
        } else {
            self.dup_acks = 0;
            if self.cwnd < self.ssthresh {
                self.cwnd = self.cwnd.saturating_add(mss);
            } else {
                let step = (u64::from(mss) * u64::from(mss) / u64::from(self.cwnd.max(1))) as u32;
                self.cwnd = self.cwnd.saturating_add(step.max(1));
            }
            false
        }
    }

    /// Account for a pure duplicate ack while data is outstanding.
    ///
    /// Returns `true` exactly when fast retransmit must fire.
    pub fn on_dup_ack(&mut self, snd_nxt: u32, in_flight: u32, mss: u32) -> bool {
        self.dup_acks = self.dup_acks.saturating_add(1);
        if self.dup_acks == DUP_ACK_THRESHOLD {
            self.recover = snd_nxt;
            self.ssthresh = (in_flight / 2).max(mss.saturating_mul(2));
            self.cwnd = self.ssthresh.saturating_add(mss.saturating_mul(3));
            log::debug!(
                "[cc] fast retransmit recover={} ssthresh={} cwnd={}",
                self.recover,
                self.ssthresh,
                self.cwnd
            );
            true
        } else {
            if self.dup_acks > DUP_ACK_THRESHOLD {
                self.cwnd = self.cwnd.saturating_add(mss);
            }
            false
        }
    }

    /// A pure ack arrived with nothing outstanding.
    pub fn reset_dup_acks(&mut self) {
        self.dup_acks = 0;
    }

    /// Retransmission timeout fired.
    pub fn on_timeout(&mut self, in_flight: u32, mss: u32) {
        self.ssthresh = (in_flight / 2).max(mss.saturating_mul(2));
        self.cwnd = mss;
    }

    /// The link sat idle for longer than one RTO; restart from one segment.
    pub fn restart_after_idle(&mut self, mss: u32) {
        self.cwnd = mss;
    }

    /// MSS shrank because the channel rejected a packet as too large.
    pub fn on_mss_shrink(&mut self, mss: u32) {
        self.cwnd = mss.saturating_mul(2);
    }

    /// Keep both windows at least two segments after an MSS change.
    pub fn clamp_to_mss(&mut self, mss: u32) {
        self.ssthresh = self.ssthresh.max(mss.saturating_mul(2));
        self.cwnd = self.cwnd.max(mss.saturating_mul(2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u32 = 1000;

    #[test]
    fn initial_window_is_two_segments() {
        let cc = CongestionControl::new(MSS, 60_000);
        assert_eq!(cc.cwnd, 2 * MSS);
        assert_eq!(cc.ssthresh, 60_000);
        assert!(!cc.in_recovery());
    }

    #[test]
    fn slow_start_adds_one_mss_per_ack() {
        let mut cc = CongestionControl::new(MSS, 10_000);
        for _ in 0..3 {
            assert!(!cc.on_new_ack(MSS, 0, 0, MSS));
        }
        assert_eq!(cc.cwnd, 5 * MSS);
    }

    #[test]
    fn congestion_avoidance_grows_sublinearly() {
        let mut cc = CongestionControl::new(MSS, 2 * MSS);
        cc.on_new_ack(MSS, 0, 0, MSS);
        // cwnd == ssthresh: 1000² / 2000 = 500
        assert_eq!(cc.cwnd, 2_500);
        cc.on_new_ack(MSS, 0, 0, MSS);
        assert_eq!(cc.cwnd, 2_900);
    }

    #[test]
    fn avoidance_step_is_at_least_one_byte() {
        let mut cc = CongestionControl::new(10, 0);
        cc.cwnd = 1_000;
        cc.on_new_ack(10, 0, 0, 10);
        assert_eq!(cc.cwnd, 1_001);
    }

    #[test]
    fn limited_transmit_bonus() {
        let mut cc = CongestionControl::new(MSS, 60_000);
        assert_eq!(cc.send_window(100_000, MSS), 2 * MSS);
        cc.on_dup_ack(10_000, 8_000, MSS);
        assert_eq!(cc.send_window(100_000, MSS), 3 * MSS);
        cc.on_dup_ack(10_000, 8_000, MSS);
        assert_eq!(cc.send_window(100_000, MSS), 4 * MSS);
        assert_eq!(cc.send_window(1_500, MSS), 1_500);
    }

    #[test]
    fn third_dup_ack_enters_fast_recovery() {
        let mut cc = CongestionControl::new(MSS, 60_000);
        cc.cwnd = 10_000;
        assert!(!cc.on_dup_ack(20_000, 10_000, MSS));
        assert!(!cc.on_dup_ack(20_000, 10_000, MSS));
        assert!(cc.on_dup_ack(20_000, 10_000, MSS));
        assert!(cc.in_recovery());
        assert_eq!(cc.recover, 20_000);
        assert_eq!(cc.ssthresh, 5_000);
        assert_eq!(cc.cwnd, 8_000);

        assert!(!cc.on_dup_ack(20_000, 10_000, MSS));
        assert_eq!(cc.cwnd, 9_000);
    }

    #[test]
    fn partial_ack_deflates_and_requests_retransmit() {
        let mut cc = CongestionControl::new(MSS, 60_000);
        cc.cwnd = 10_000;
        for _ in 0..3 {
            cc.on_dup_ack(20_000, 10_000, MSS);
        }
        assert!(cc.on_new_ack(2_000, 12_000, 8_000, MSS));
        assert_eq!(cc.cwnd, 8_000 - 2_000 + MSS);
        assert!(cc.in_recovery());
    }

    #[test]
    fn full_ack_exits_recovery() {
        let mut cc = CongestionControl::new(MSS, 60_000);
        cc.cwnd = 10_000;
        for _ in 0..3 {
            cc.on_dup_ack(20_000, 10_000, MSS);
        }
        assert!(!cc.on_new_ack(10_000, 20_000, 0, MSS));
        assert_eq!(cc.cwnd, MSS);
        assert!(!cc.in_recovery());
    }

    #[test]
    fn endless_dup_acks_saturate_cwnd() {
        let mss = 65_419;
        let mut cc = CongestionControl::new(mss, u32::MAX);
        for _ in 0..200_000 {
            cc.on_dup_ack(1_000_000, 500_000, mss);
        }
        assert_eq!(cc.cwnd, u32::MAX);
        assert!(cc.in_recovery());

        // A full ack still collapses the window to something sane.
        assert!(!cc.on_new_ack(1, 1_000_000, 0, mss));
        assert_eq!(cc.cwnd, mss);
    }

    #[test]
    fn timeout_collapses_window() {
        let mut cc = CongestionControl::new(MSS, 60_000);
        cc.cwnd = 16_000;
        cc.on_timeout(16_000, MSS);
        assert_eq!(cc.ssthresh, 8_000);
        assert_eq!(cc.cwnd, MSS);

        cc.on_timeout(1_000, MSS);
        assert_eq!(cc.ssthresh, 2 * MSS);
    }

    #[test]
    fn clamp_keeps_two_segments() {
        let mut cc = CongestionControl::new(100, 150);
        cc.cwnd = 100;
        cc.clamp_to_mss(1_000);
        assert_eq!(cc.ssthresh, 2_000);
        assert_eq!(cc.cwnd, 2_000);
    }
}
