//! Path-MTU tracking and MSS derivation.
//!
//! The embedding application may supply an MTU hint; the channel may also
//! report that a datagram was too large.  [`MtuProber`] turns both into the
//! maximum segment size (payload bytes per packet) by walking a descending
//! table of standard path MTUs (RFC 1191).

use crate::packet::HEADER_LEN;

/// Standard path MTUs, largest first.
pub const PACKET_MAXIMUMS: [u32; 10] = [
    65_535, // Hyperchannel
    32_000, //
    17_914, // 16Mb IBM Token Ring
    8_166,  // IEEE 802.4
    4_352,  // FDDI
    2_002,  // IEEE 802.5 (4Mb max)
    1_492,  // IEEE 802.3
    1_006,  // SLIP, ARPANET
    508,    // IEEE 802/Source-Rt Bridge, ARCNET
    296,    // Point-to-Point (low delay)
];

/// Smallest packet every path is assumed to carry.
pub const MIN_PACKET: u32 = 296;

const UDP_HEADER_SIZE: u32 = 8;
const IP_HEADER_SIZE: u32 = 20;
/// Allowance for relay/tunnel framing added by the datagram channel.
const RELAY_HEADER_SIZE: u32 = 64;

/// Bytes of every packet that are not segment payload.
pub const PACKET_OVERHEAD: u32 =
    HEADER_LEN as u32 + UDP_HEADER_SIZE + IP_HEADER_SIZE + RELAY_HEADER_SIZE;

/// Current MSS plus the position in [`PACKET_MAXIMUMS`] it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtuProber {
    mss: u32,
    level: usize,
    mtu_advise: u32,
}

impl Default for MtuProber {
    fn default() -> Self {
        Self::new()
    }
}

impl MtuProber {
    /// Start at the conservative minimum MSS with no hint beyond the
    /// largest table entry.
    pub fn new() -> Self {
        Self {
            mss: MIN_PACKET - PACKET_OVERHEAD,
            level: 0,
            mtu_advise: PACKET_MAXIMUMS[0],
        }
    }

    pub fn mss(&self) -> u32 {
        self.mss
    }

    pub fn mtu_hint(&self) -> u32 {
        self.mtu_advise
    }

    /// Index into [`PACKET_MAXIMUMS`] of the current level.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Remember an externally supplied MTU; takes effect on [`adjust`].
    ///
    /// [`adjust`]: MtuProber::adjust
    pub fn set_hint(&mut self, mtu: u32) {
        self.mtu_advise = mtu;
    }

    /// Recompute the table level and MSS from the current hint.
    pub fn adjust(&mut self) -> u32 {
        self.level = 0;
        while self.level + 1 < PACKET_MAXIMUMS.len() {
            if PACKET_MAXIMUMS[self.level] <= self.mtu_advise {
                break;
            }
            self.level += 1;
        }
        self.mss = self.mtu_advise.saturating_sub(PACKET_OVERHEAD).max(1);
        self.mss
    }

    /// Step down the table until the MSS is smaller than `chunk`.
    ///
    /// Returns the new MSS, or `None` once the table is exhausted.
    pub fn shrink_below(&mut self, chunk: u32) -> Option<u32> {
        loop {
            if self.level + 1 >= PACKET_MAXIMUMS.len() {
                return None;
            }
            self.level += 1;
            self.mss = PACKET_MAXIMUMS[self.level] - PACKET_OVERHEAD;
            if self.mss < chunk {
                return Some(self.mss);
            }
        }
    }
}
