//! Outbound byte buffer and segment bookkeeping.
//!
//! [`SendQueue`] holds every byte from `snd_una` onwards (sent but
//! unacknowledged, then not yet sent) in one fixed-capacity buffer, plus a
//! list of [`SendSegment`] records that carve that byte range into
//! transmission units.  Segments are plain `(seq, len)` ranges into the
//! buffer; no payload is copied until a segment is actually written to the
//! channel.
//!
//! It does **not** decide when to send; window, Nagle, and retransmission
//! rules live in [`crate::connection::Connection`].
//!
//! # Sequence-number layout
//!
//! ```text
//!  snd_una          snd_nxt                 snd_una + buffered
//!     │                │                          │
//!  ───┼────────────────┼──────────────────────────┼──▶ seq space
//!     │ <── in flight ▶│ <── queued, unsent ─────▶│
//! ```

use std::collections::VecDeque;

/// Returns `true` when sequence number `a` is < `b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) >= 0
}

/// One transmission unit of the send buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSegment {
    /// Sequence number of the first byte.
    pub seq: u32,
    /// Number of bytes covered.
    pub len: u32,
    /// Carries a control opcode rather than stream data.
    pub ctrl: bool,
    /// Number of times this segment has been handed to the channel.
    pub xmit: u32,
}

impl SendSegment {
    /// First sequence number after this segment.
    pub fn end(&self) -> u32 {
        self.seq.wrapping_add(self.len)
    }
}

/// Fixed-capacity send buffer plus its segment list.
#[derive(Debug)]
pub struct SendQueue {
    buf: VecDeque<u8>,
    capacity: usize,
    segments: VecDeque<SendSegment>,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            segments: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes held (in flight plus unsent).
    pub fn buffered(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Room left for new application bytes.
    pub fn write_remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Append up to [`write_remaining`] bytes of `data` as `ctrl` or stream data.
    ///
    /// New bytes extend the tail segment when it is of the same class and
    /// has never been transmitted; otherwise they start a new segment at
    /// `snd_una + buffered`.  Returns the number of bytes accepted.
    ///
    /// [`write_remaining`]: SendQueue::write_remaining
    pub fn queue(&mut self, data: &[u8], ctrl: bool, snd_una: u32) -> usize {
        let n = data.len().min(self.write_remaining());
        if n == 0 {
            return 0;
        }
        match self.segments.back_mut() {
            Some(tail) if tail.ctrl == ctrl && tail.xmit == 0 => tail.len += n as u32,
            _ => self.segments.push_back(SendSegment {
                seq: snd_una.wrapping_add(self.buffered()),
                len: n as u32,
                ctrl,
                xmit: 0,
            }),
        }
        self.buf.extend(&data[..n]);
        n
    }

    /// Drop `acked` bytes from the front of the buffer and segment list.
    ///
    /// A segment that is only partly covered keeps its unacked tail.
    pub fn consume_acked(&mut self, acked: u32) {
        let acked = acked.min(self.buffered());
        self.buf.drain(..acked as usize);

        let mut remaining = acked;
        while remaining > 0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            if remaining < front.len {
                front.seq = front.seq.wrapping_add(remaining);
                front.len -= remaining;
                remaining = 0;
            } else {
                remaining -= front.len;
                self.segments.pop_front();
            }
        }
    }

    /// Copy `len` bytes starting `offset` bytes past `snd_una`.
    pub fn read(&self, offset: u32, len: u32) -> Vec<u8> {
        let start = offset as usize;
        let end = (start + len as usize).min(self.buf.len());
        self.buf.range(start..end).copied().collect()
    }

    /// Cut segment `idx` so it covers only its first `at` bytes; the rest
    /// becomes a new segment right after it with the same attempt count.
    pub fn split(&mut self, idx: usize, at: u32) {
        let seg = self.segments[idx];
        if at == 0 || at >= seg.len {
            return;
        }
        self.segments[idx].len = at;
        self.segments.insert(
            idx + 1,
            SendSegment {
                seq: seg.seq.wrapping_add(at),
                len: seg.len - at,
                ctrl: seg.ctrl,
                xmit: seg.xmit,
            },
        );
    }

    /// Index of the oldest segment that has never been transmitted.
    pub fn first_unsent(&self) -> Option<usize> {
        self.segments.iter().position(|s| s.xmit == 0)
    }

    pub fn segment(&self, idx: usize) -> Option<&SendSegment> {
        self.segments.get(idx)
    }

    pub fn segment_mut(&mut self, idx: usize) -> Option<&mut SendSegment> {
        self.segments.get_mut(idx)
    }

    pub fn segments(&self) -> impl Iterator<Item = &SendSegment> {
        self.segments.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Forget every queued byte and segment.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.segments.clear();
    }
}
