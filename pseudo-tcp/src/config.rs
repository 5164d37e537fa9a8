//! Tunable connection parameters.

use crate::timer::DEF_ACK_DELAY;

/// Default receive buffer capacity in bytes.
pub const DEFAULT_RCV_BUF_SIZE: usize = 60 * 1024;
/// Default send buffer capacity in bytes.
pub const DEFAULT_SND_BUF_SIZE: usize = 90 * 1024;

/// Per-connection configuration, fixed at construction.
///
/// `no_delay` and `ack_delay_ms` can also be changed on a live connection;
/// buffer sizes only while it is still listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Disable Nagle's algorithm (send sub-MSS chunks while data is in flight).
    pub no_delay: bool,
    /// How long a lone ack may be held back; `0` acks every segment at once.
    pub ack_delay_ms: u32,
    /// Send buffer capacity in bytes.
    pub send_buffer_size: usize,
    /// Receive buffer capacity in bytes.
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            no_delay: false,
            ack_delay_ms: DEF_ACK_DELAY,
            send_buffer_size: DEFAULT_SND_BUF_SIZE,
            recv_buffer_size: DEFAULT_RCV_BUF_SIZE,
        }
    }
}
