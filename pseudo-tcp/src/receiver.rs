//! Inbound segment reassembly and receive-window management.
//!
//! The [`Receiver`] is responsible for everything that happens *after* a
//! datagram is decoded into a [`crate::packet::Packet`] and *before* the
//! application reads contiguous bytes:
//! - Trimming a segment to `[rcv_nxt, rcv_nxt + free space)`.
//! - Writing payload straight to its final offset in the receive buffer.
//! - Recording out-of-order ranges until the gap before them is filled.
//! - Delivering in-order data and reporting the advertised window.
//!
//! The [`Receiver`] does **not** send ACKs itself; it reports what happened
//! so that [`crate::connection::Connection`] can pick the ack urgency.

use crate::sender::{seq_le, seq_lt};

/// A range that has been written to the buffer but is not yet contiguous
/// with `rcv_nxt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvSegment {
    pub seq: u32,
    pub len: u32,
}

impl RecvSegment {
    fn end(&self) -> u32 {
        self.seq.wrapping_add(self.len)
    }
}

/// Outcome of feeding one segment to the [`Receiver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// New contiguous bytes became readable.
    pub new_data: bool,
    /// A stored out-of-order range was spliced onto the contiguous prefix.
    pub merged: bool,
}

/// Fixed-capacity ring holding contiguous readable bytes followed by the
/// free region that out-of-order data is written into.
#[derive(Debug)]
struct RingBuffer {
    data: Vec<u8>,
    read_pos: usize,
    len: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            read_pos: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn write_remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Write `bytes` starting `offset` bytes past the readable region.
    fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.write_remaining());
        let cap = self.capacity();
        let pos = (self.read_pos + self.len + offset) % cap;
        let first = bytes.len().min(cap - pos);
        self.data[pos..pos + first].copy_from_slice(&bytes[..first]);
        self.data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
    }

    /// Make `n` already-written bytes readable.
    fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.write_remaining());
        self.len += n;
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        let cap = self.capacity();
        let first = n.min(cap - self.read_pos);
        out[..first].copy_from_slice(&self.data[self.read_pos..self.read_pos + first]);
        out[first..n].copy_from_slice(&self.data[..n - first]);
        self.read_pos = (self.read_pos + n) % cap;
        self.len -= n;
        n
    }
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct Receiver {
    /// Next expected sequence number (`RCV.NXT`).
    pub rcv_nxt: u32,
    buffer: RingBuffer,
    /// Out-of-order ranges in ascending sequence order.
    out_of_order: Vec<RecvSegment>,
}

impl Receiver {
    pub fn new(rcv_nxt: u32, capacity: usize) -> Self {
        Self {
            rcv_nxt,
            buffer: RingBuffer::new(capacity),
            out_of_order: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Contiguous bytes waiting for the application (`rlen`).
    pub fn readable(&self) -> usize {
        self.buffer.len
    }

    /// Advertised receive window (`rcv_wnd`): capacity minus `rlen`.
    pub fn window(&self) -> u32 {
        self.buffer.write_remaining() as u32
    }

    pub fn out_of_order(&self) -> &[RecvSegment] {
        &self.out_of_order
    }

    /// Process an inbound segment's payload.
    ///
    /// With `discard` set the bytes are acknowledged but not stored: an
    /// in-order segment still advances `rcv_nxt`.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8], discard: bool) -> Delivery {
        let mut seq = seq;
        let mut data = payload;

        // Stale prefix.
        if seq_lt(seq, self.rcv_nxt) {
            let adjust = self.rcv_nxt.wrapping_sub(seq) as usize;
            if adjust < data.len() {
                seq = self.rcv_nxt;
                data = &data[adjust..];
            } else {
                data = &[];
            }
        }

        // Whatever does not fit the free space.
        let offset = seq.wrapping_sub(self.rcv_nxt) as usize;
        let free = self.buffer.write_remaining();
        if offset + data.len() > free {
            let adjust = offset + data.len() - free;
            if adjust < data.len() {
                data = &data[..data.len() - adjust];
            } else {
                data = &[];
            }
        }

        if data.is_empty() {
            return Delivery::default();
        }

        if discard {
            if offset == 0 {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(data.len() as u32);
            }
            return Delivery::default();
        }

        self.buffer.write_at(offset, data);

        if offset != 0 {
            let seg = RecvSegment {
                seq,
                len: data.len() as u32,
            };
            if self
                .out_of_order
                .iter()
                .any(|s| seq_le(s.seq, seg.seq) && seq_le(seg.end(), s.end()))
            {
                log::trace!("[recv] seq={} len={} already held", seg.seq, seg.len);
                return Delivery::default();
            }
            let at = self
                .out_of_order
                .iter()
                .position(|s| !seq_lt(s.seq, seg.seq))
                .unwrap_or(self.out_of_order.len());
            self.out_of_order.insert(at, seg);
            log::debug!(
                "[recv] out-of-order seq={} len={} (rcv_nxt={}, {} held)",
                seg.seq,
                seg.len,
                self.rcv_nxt,
                self.out_of_order.len()
            );
            return Delivery::default();
        }

        self.advance(data.len() as u32);
        let mut delivery = Delivery {
            new_data: true,
            merged: false,
        };

        while let Some(first) = self.out_of_order.first().copied() {
            if !seq_le(first.seq, self.rcv_nxt) {
                break;
            }
            if seq_lt(self.rcv_nxt, first.end()) {
                let adjust = first.end().wrapping_sub(self.rcv_nxt);
                self.advance(adjust);
                delivery.merged = true;
            }
            self.out_of_order.remove(0);
        }
        delivery
    }

    fn advance(&mut self, n: u32) {
        self.buffer.commit(n as usize);
        self.rcv_nxt = self.rcv_nxt.wrapping_add(n);
    }

    /// Copy up to `buf.len()` readable bytes into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        self.buffer.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(r: &mut Receiver) -> Vec<u8> {
        let mut buf = vec![0u8; r.readable()];
        let n = r.read(&mut buf);
        buf.truncate(n);
        buf
    }

    fn assert_window_invariant(r: &Receiver) {
        assert_eq!(r.window() as usize + r.readable(), r.capacity());
    }

    #[test]
    fn initial_state() {
        let r = Receiver::new(42, 64);
        assert_eq!(r.rcv_nxt, 42);
        assert_eq!(r.readable(), 0);
        assert_eq!(r.window(), 64);
    }

    #[test]
    fn in_order_segment_accepted() {
        let mut r = Receiver::new(100, 64);
        let d = r.on_segment(100, b"hello", false);
        assert!(d.new_data);
        assert!(!d.merged);
        assert_eq!(r.rcv_nxt, 105);
        assert_eq!(r.window(), 59);
        assert_eq!(drain(&mut r), b"hello");
        assert_window_invariant(&r);
    }

    #[test]
    fn out_of_order_held_until_gap_fills() {
        let mut r = Receiver::new(0, 64);
        let d = r.on_segment(5, b"world", false);
        assert_eq!(d, Delivery::default());
        assert_eq!(r.rcv_nxt, 0);
        assert_eq!(r.out_of_order(), &[RecvSegment { seq: 5, len: 5 }]);
        assert_eq!(r.window(), 64);

        let d = r.on_segment(0, b"hello", false);
        assert!(d.new_data);
        assert!(d.merged);
        assert_eq!(r.rcv_nxt, 10);
        assert!(r.out_of_order().is_empty());
        assert_eq!(drain(&mut r), b"helloworld");
    }

    #[test]
    fn out_of_order_list_kept_sorted() {
        let mut r = Receiver::new(0, 64);
        r.on_segment(20, b"cc", false);
        r.on_segment(10, b"bb", false);
        r.on_segment(30, b"dd", false);
        let seqs: Vec<u32> = r.out_of_order().iter().map(|s| s.seq).collect();
        assert_eq!(seqs, vec![10, 20, 30]);
    }

    #[test]
    fn repeated_out_of_order_segment_held_once() {
        let mut r = Receiver::new(0, 64);
        for _ in 0..10 {
            r.on_segment(10, b"world", false);
        }
        // Contained in the held range.
        r.on_segment(11, b"or", false);
        assert_eq!(r.out_of_order(), &[RecvSegment { seq: 10, len: 5 }]);

        r.on_segment(0, b"0123456789", false);
        assert!(r.out_of_order().is_empty());
        assert_eq!(drain(&mut r), b"0123456789world");
    }

    #[test]
    fn duplicate_segment_is_trimmed_away() {
        let mut r = Receiver::new(0, 64);
        r.on_segment(0, b"hello", false);
        let d = r.on_segment(0, b"hello", false);
        assert_eq!(d, Delivery::default());
        assert_eq!(r.rcv_nxt, 5);
        assert_eq!(drain(&mut r), b"hello");
    }

    #[test]
    fn overlapping_segment_delivers_only_new_tail() {
        let mut r = Receiver::new(0, 64);
        r.on_segment(0, b"abc", false);
        let d = r.on_segment(1, b"bcdef", false);
        assert!(d.new_data);
        assert_eq!(r.rcv_nxt, 6);
        assert_eq!(drain(&mut r), b"abcdef");
    }

    #[test]
    fn segment_clamped_to_free_space() {
        let mut r = Receiver::new(0, 8);
        r.on_segment(0, b"0123456789", false);
        assert_eq!(r.rcv_nxt, 8);
        assert_eq!(r.window(), 0);
        assert_window_invariant(&r);

        // Nothing fits until the application reads.
        let d = r.on_segment(8, b"89", false);
        assert_eq!(d, Delivery::default());
        assert_eq!(drain(&mut r), b"01234567");
        assert_eq!(r.window(), 8);
    }

    #[test]
    fn ring_wraps_around() {
        let mut r = Receiver::new(0, 8);
        r.on_segment(0, b"abcdef", false);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), 4);
        // Write position is now at index 6; this wraps.
        r.on_segment(8, b"ij", false);
        r.on_segment(6, b"gh", false);
        assert_eq!(r.rcv_nxt, 10);
        assert_eq!(drain(&mut r), b"efghij");
    }

    #[test]
    fn discard_advances_rcv_nxt_without_buffering() {
        let mut r = Receiver::new(0, 64);
        let d = r.on_segment(0, b"ignored", true);
        assert_eq!(d, Delivery::default());
        assert_eq!(r.rcv_nxt, 7);
        assert_eq!(r.readable(), 0);
    }

    #[test]
    fn seq_wrap_around() {
        let start = u32::MAX - 2;
        let mut r = Receiver::new(start, 64);
        r.on_segment(start.wrapping_add(5), b"fg", false);
        r.on_segment(start, b"abcde", false);
        assert_eq!(r.rcv_nxt, start.wrapping_add(7));
        assert_eq!(drain(&mut r), b"abcdefg");
    }
}
