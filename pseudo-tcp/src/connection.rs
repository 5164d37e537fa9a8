//! Per-connection protocol engine.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! stream.  Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Coordinating the [`crate::sender::SendQueue`] and
//!   [`crate::receiver::Receiver`].
//! - Retransmission, delayed acks, and zero-window probing.
//! - Feeding acks to [`crate::congestion::CongestionControl`] and RTT samples
//!   to [`crate::timer::RetransmitTimer`].
//! - Exposing a non-blocking read/write API to application code.
//!
//! The engine never blocks and owns no threads.  Everything happens inside
//! one of the entry points:
//!
//! | Entry point | Driven by |
//! |---|---|
//! | [`Connection::notify_packet`] | a datagram arrived on the channel |
//! | [`Connection::notify_clock`] | the deadline from [`Connection::next_tick_deadline`] passed |
//! | [`Connection::send`] / [`Connection::recv`] / [`Connection::close`] | the application |
//!
//! Outbound datagrams go to the injected [`Channel`]; state changes are
//! reported to an optional [`TcpObserver`] after the entry point has finished
//! its work, so observers may call straight back into `send`, `recv`, or
//! `close`.  The channel must not call back into the connection.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;

use crate::clock::{time_diff, Clock};
use crate::config::Config;
use crate::congestion::CongestionControl;
use crate::mtu::MtuProber;
use crate::packet::{flags, Header, Packet, CTL_CONNECT, MAX_PACKET};
use crate::receiver::Receiver;
use crate::sender::{seq_le, seq_lt, SendQueue};
use crate::state::{ConnectionState, Shutdown};
use crate::timer::{RetransmitTimer, DEF_RTO, MAX_RTO};

/// Upper bound on the interval reported by [`Connection::next_tick_deadline`].
pub const DEFAULT_TIMEOUT: u32 = 4_000;
/// Tick interval reported once the connection is closed.
pub const CLOSED_TIMEOUT: u32 = 60 * 1_000;
/// Silence during a zero-window stall after which the connection aborts.
pub const ZERO_WINDOW_STALL: u32 = 15_000;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Result of handing one datagram to the [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Success,
    /// The channel could not send; the attempt is lost.
    Failed,
    /// The datagram exceeds the path MTU; shrink and retry.
    TooLarge,
}

/// Unreliable, unordered datagram channel the stream runs over.
pub trait Channel {
    fn write_packet(&mut self, packet: &[u8]) -> WriteResult;
}

/// Application notifications.
///
/// Every method has an empty default so observers only implement what they
/// need.  Each receives the connection so it can react in place.
pub trait TcpObserver {
    fn on_open(&mut self, _tcp: &mut Connection) {}
    fn on_readable(&mut self, _tcp: &mut Connection) {}
    fn on_writable(&mut self, _tcp: &mut Connection) {}
    fn on_closed(&mut self, _tcp: &mut Connection, _err: TcpError) {}
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced to the application.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TcpError {
    /// `send`/`recv` outside ESTABLISHED (ENOTCONN).
    #[error("connection is not established")]
    NotConnected,
    /// Send buffer full or receive buffer empty (EWOULDBLOCK).
    #[error("operation would block")]
    WouldBlock,
    /// Operation not valid in the current state (EINVAL).
    #[error("invalid operation for the current state")]
    InvalidState,
    /// Peer sent RST (ECONNRESET).
    #[error("connection reset by peer")]
    ConnectionReset,
    /// Retransmission ceiling, zero-window stall, or channel failure
    /// (ECONNABORTED).
    #[error("connection aborted")]
    ConnectionAborted,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckUrgency {
    None,
    Delayed,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Open,
    Readable,
    Writable,
    Closed(TcpError),
}

/// A single reliable stream over a datagram [`Channel`].
pub struct Connection {
    conv: u32,
    state: ConnectionState,
    shutdown: Shutdown,
    error: Option<TcpError>,
    config: Config,

    channel: Box<dyn Channel>,
    clock: Box<dyn Clock>,
    observer: Option<Box<dyn TcpObserver>>,
    events: VecDeque<Event>,
    dispatching: bool,

    // Send side.
    send: SendQueue,
    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u32,
    write_enable: bool,

    // Receive side.
    recv: Receiver,
    read_enable: bool,
    last_advertised_wnd: u32,

    // Timestamps (ms).
    ts_recent: u32,
    ts_lastack: u32,
    last_send: u32,
    last_recv: u32,
    last_traffic: u32,
    /// When the oldest unacked segment went out; `None` when idle.
    rto_base: Option<u32>,
    /// When an ack became owed; `None` when nothing is owed.
    ack_pending_since: Option<u32>,

    timer: RetransmitTimer,
    cc: CongestionControl,
    mtu: MtuProber,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Create a connection in [`ConnectionState::Listen`].
    ///
    /// Both ends of a stream must use the same `conv`.
    pub fn new<C, K>(conv: u32, config: Config, channel: C, clock: K) -> Self
    where
        C: Channel + 'static,
        K: Clock + 'static,
    {
        let now = clock.now_ms();
        let send_size = config.send_buffer_size.max(1);
        let recv_size = config.recv_buffer_size.max(1);
        let mtu = MtuProber::new();
        let recv = Receiver::new(0, recv_size);
        Self {
            conv,
            state: ConnectionState::Listen,
            shutdown: Shutdown::None,
            error: None,
            config,
            channel: Box::new(channel),
            clock: Box::new(clock),
            observer: None,
            events: VecDeque::new(),
            dispatching: false,
            send: SendQueue::new(send_size),
            snd_una: 0,
            snd_nxt: 0,
            snd_wnd: 1,
            write_enable: false,
            last_advertised_wnd: recv.window(),
            recv,
            read_enable: true,
            ts_recent: 0,
            ts_lastack: 0,
            last_send: now,
            last_recv: now,
            last_traffic: now,
            rto_base: None,
            ack_pending_since: None,
            timer: RetransmitTimer::new(),
            cc: CongestionControl::new(mtu.mss(), recv_size as u32),
            mtu,
        }
    }

    /// Attach the application observer.
    pub fn with_observer<O: TcpObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    // -----------------------------------------------------------------------
    // Application API
    // -----------------------------------------------------------------------

    /// Active open: LISTEN → SYN_SENT and send CONNECT.
    pub fn connect(&mut self) -> Result<(), TcpError> {
        if self.state != ConnectionState::Listen {
            return self.fail(TcpError::InvalidState);
        }
        self.set_state(ConnectionState::SynSent);
        self.queue_connect_message();
        self.attempt_send(AckUrgency::None);
        self.dispatch_events();
        Ok(())
    }

    /// Queue as much of `data` as the send buffer holds.
    ///
    /// Returns the number of bytes accepted, or [`TcpError::WouldBlock`] when
    /// the buffer is full; [`TcpObserver::on_writable`] then fires once room
    /// opens up.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, TcpError> {
        if self.state != ConnectionState::Established {
            return self.fail(TcpError::NotConnected);
        }
        if self.send.write_remaining() == 0 {
            self.write_enable = true;
            return self.fail(TcpError::WouldBlock);
        }
        let written = self.send.queue(data, false, self.snd_una);
        self.attempt_send(AckUrgency::None);
        self.dispatch_events();
        Ok(written)
    }

    /// Read contiguous received bytes into `buf`.
    ///
    /// Returns [`TcpError::WouldBlock`] when nothing is readable;
    /// [`TcpObserver::on_readable`] then fires once data arrives.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TcpError> {
        if self.state != ConnectionState::Established {
            return self.fail(TcpError::NotConnected);
        }
        if self.recv.readable() == 0 {
            self.read_enable = true;
            return self.fail(TcpError::WouldBlock);
        }
        let read = self.recv.read(buf);

        // Reopen a window the peer last saw as closed.
        let threshold = (self.recv.capacity() as u32 / 2).min(self.mtu.mss());
        if self.last_advertised_wnd == 0 && self.recv.window() >= threshold {
            self.attempt_send(AckUrgency::Immediate);
        }
        self.dispatch_events();
        Ok(read)
    }

    /// Stop the connection.
    ///
    /// With `force` the connection becomes CLOSED at once and queued data is
    /// dropped.  Otherwise queued data and the pending ack keep draining;
    /// [`Connection::next_tick_deadline`] returns `None` once they have.
    pub fn close(&mut self, force: bool) {
        log::debug!("[tcp] close(force={force}) in {}", self.state);
        if force {
            self.shutdown = Shutdown::Forceful;
            if self.state != ConnectionState::Closed {
                self.send.clear();
                self.rto_base = None;
                self.ack_pending_since = None;
                self.set_state(ConnectionState::Closed);
            }
        } else {
            self.shutdown = Shutdown::Graceful;
        }
    }

    /// Most recent error returned or reported by this connection.
    pub fn error(&self) -> Option<TcpError> {
        self.error
    }

    /// Supply an MTU hint for the path.  Applied immediately once
    /// established, otherwise when the handshake completes.
    pub fn notify_mtu(&mut self, mtu: u16) {
        self.mtu.set_hint(u32::from(mtu));
        if self.state == ConnectionState::Established {
            self.adjust_mtu();
        }
    }

    /// Disable (or re-enable) Nagle's algorithm.
    pub fn set_no_delay(&mut self, no_delay: bool) {
        self.config.no_delay = no_delay;
    }

    /// Change how long a lone ack may be delayed; `0` disables delaying.
    pub fn set_ack_delay(&mut self, ms: u32) {
        self.config.ack_delay_ms = ms;
    }

    /// Resize both buffers.  Only allowed before the handshake starts.
    pub fn set_buffer_sizes(&mut self, send: usize, recv: usize) -> Result<(), TcpError> {
        if self.state != ConnectionState::Listen {
            return self.fail(TcpError::InvalidState);
        }
        self.config.send_buffer_size = send.max(1);
        self.config.recv_buffer_size = recv.max(1);
        self.send = SendQueue::new(self.config.send_buffer_size);
        self.recv = Receiver::new(self.recv.rcv_nxt, self.config.recv_buffer_size);
        self.last_advertised_wnd = self.recv.window();
        self.cc.ssthresh = self.config.recv_buffer_size as u32;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event-loop API
    // -----------------------------------------------------------------------

    /// Feed one datagram received from the channel.
    ///
    /// Returns `false` when the datagram was dropped (malformed, wrong
    /// conversation, or received after close).
    pub fn notify_packet(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > MAX_PACKET {
            log::warn!("[tcp] dropping oversize datagram of {} bytes", bytes.len());
            return false;
        }
        let accepted = match Packet::decode(bytes) {
            Ok(packet) => self.process(packet),
            Err(e) => {
                log::debug!("[tcp] dropping datagram: {e}");
                false
            }
        };
        self.dispatch_events();
        accepted
    }

    /// Run whatever timers have expired at `now`.
    pub fn notify_clock(&mut self, now: u32) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.run_timers(now);
        self.dispatch_events();
    }

    /// How long until [`Connection::notify_clock`] should next be called.
    ///
    /// `None` means no further ticks are needed: a graceful close has
    /// drained.  After a forceful close or any other closedown this reports
    /// the long [`CLOSED_TIMEOUT`].
    pub fn next_tick_deadline(&self, now: u32) -> Option<Duration> {
        if self.shutdown == Shutdown::Forceful {
            return Some(Duration::from_millis(u64::from(CLOSED_TIMEOUT)));
        }
        if self.shutdown == Shutdown::Graceful
            && (self.state != ConnectionState::Established
                || (self.send.buffered() == 0 && self.ack_pending_since.is_none()))
        {
            return None;
        }
        if self.state == ConnectionState::Closed {
            return Some(Duration::from_millis(u64::from(CLOSED_TIMEOUT)));
        }

        let rto = self.timer.current_rto;
        let mut timeout = DEFAULT_TIMEOUT as i32;
        if let Some(since) = self.ack_pending_since {
            timeout = timeout.min(time_diff(since.wrapping_add(self.config.ack_delay_ms), now));
        }
        if let Some(base) = self.rto_base {
            timeout = timeout.min(time_diff(base.wrapping_add(rto), now));
        }
        if self.snd_wnd == 0 {
            timeout = timeout.min(time_diff(self.last_send.wrapping_add(rto), now));
        }
        Some(Duration::from_millis(timeout.max(0) as u64))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn conv(&self) -> u32 {
        self.conv
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mss(&self) -> u32 {
        self.mtu.mss()
    }

    pub fn cwnd(&self) -> u32 {
        self.cc.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.cc.ssthresh
    }

    pub fn dup_acks(&self) -> u32 {
        self.cc.dup_acks
    }

    pub fn rto(&self) -> u32 {
        self.timer.current_rto
    }

    pub fn srtt(&self) -> Option<u32> {
        self.timer.srtt
    }

    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    pub fn snd_wnd(&self) -> u32 {
        self.snd_wnd
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.recv.rcv_nxt
    }

    /// Advertised receive window (`rcv_wnd`).
    pub fn rcv_wnd(&self) -> u32 {
        self.recv.window()
    }

    pub fn recv_buffer_capacity(&self) -> usize {
        self.recv.capacity()
    }

    /// Bytes received in order but not yet read (`rlen`).
    pub fn recv_buffered(&self) -> usize {
        self.recv.readable()
    }

    /// Bytes queued or in flight (`slen`).
    pub fn send_buffered(&self) -> u32 {
        self.send.buffered()
    }

    pub fn in_flight(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    /// Milliseconds since anything was sent or received.
    pub fn idle_ms(&self, now: u32) -> u32 {
        time_diff(now, self.last_traffic).max(0) as u32
    }

    // -----------------------------------------------------------------------
    // Receive path
    // -----------------------------------------------------------------------

    fn process(&mut self, packet: Packet) -> bool {
        let Packet { header, payload } = packet;
        let Header {
            conv,
            seq,
            ack,
            window,
            tsval,
            tsecr,
            ..
        } = header;

        if conv != self.conv {
            log::debug!("[recv] conversation {conv} does not match {}", self.conv);
            return false;
        }

        let now = self.clock.now_ms();
        self.last_traffic = now;
        self.last_recv = now;

        if self.state == ConnectionState::Closed {
            return false;
        }

        if header.is_rst() {
            self.closedown(TcpError::ConnectionReset);
            return false;
        }

        let mut connect = false;
        if header.is_ctl() {
            match payload.first() {
                None => return false,
                Some(&CTL_CONNECT) => {
                    connect = true;
                    match self.state {
                        ConnectionState::Listen => {
                            self.set_state(ConnectionState::SynReceived);
                            self.queue_connect_message();
                        }
                        ConnectionState::SynSent => self.establish(),
                        _ => {}
                    }
                }
                Some(op) => {
                    log::debug!("[recv] unknown control opcode {op}");
                    return false;
                }
            }
        }

        let seg_len = payload.len() as u32;

        // Remember the peer's timestamp if this segment covers the byte our
        // last ack pointed at.
        if seq_le(seq, self.ts_lastack) && seq_lt(self.ts_lastack, seq.wrapping_add(seg_len)) {
            self.ts_recent = tsval;
        }

        if seq_lt(self.snd_una, ack) && seq_le(ack, self.snd_nxt) {
            if tsecr != 0 {
                let rtt = time_diff(now, tsecr);
                if rtt >= 0 {
                    self.timer.record_rtt_sample(rtt as u32);
                } else {
                    log::warn!("[recv] negative rtt sample {rtt}");
                }
            }

            self.snd_wnd = u32::from(window);

            let acked = ack.wrapping_sub(self.snd_una);
            self.snd_una = ack;
            self.rto_base = if self.snd_una == self.snd_nxt {
                None
            } else {
                Some(now)
            };
            self.send.consume_acked(acked);

            let retransmit =
                self.cc
                    .on_new_ack(acked, self.snd_una, self.in_flight(), self.mtu.mss());
            if retransmit && !self.transmit(0, now) {
                self.closedown(TcpError::ConnectionAborted);
                return false;
            }
        } else if ack == self.snd_una {
            // A window update rides on a duplicate ack; take it.
            self.snd_wnd = u32::from(window);

            if seg_len > 0 {
                // Carries data; not a loss signal.
            } else if self.snd_una != self.snd_nxt {
                let fast_retransmit =
                    self.cc
                        .on_dup_ack(self.snd_nxt, self.in_flight(), self.mtu.mss());
                if fast_retransmit && !self.transmit(0, now) {
                    self.closedown(TcpError::ConnectionAborted);
                    return false;
                }
            } else {
                self.cc.reset_dup_acks();
            }
        }

        if self.state == ConnectionState::SynReceived && !connect {
            self.establish();
        }

        // Tell a blocked writer once half of both buffers' worth is free.
        let ideal_refill = (self.send.capacity() + self.recv.capacity()) / 2;
        if self.write_enable && (self.send.buffered() as usize) < ideal_refill {
            self.write_enable = false;
            self.events.push_back(Event::Writable);
        }

        // Ack at once if the segment was too old or too new; delay it if it
        // simply carried data.
        let mut urgency = if seq != self.recv.rcv_nxt {
            AckUrgency::Immediate
        } else if seg_len != 0 {
            if self.config.ack_delay_ms == 0 {
                AckUrgency::Immediate
            } else {
                AckUrgency::Delayed
            }
        } else {
            AckUrgency::None
        };

        let discard = header.is_ctl() || self.shutdown != Shutdown::None;
        let delivery = self.recv.on_segment(seq, &payload, discard);
        if delivery.merged {
            urgency = AckUrgency::Immediate;
        }

        self.attempt_send(urgency);

        if delivery.new_data && self.read_enable {
            self.read_enable = false;
            self.events.push_back(Event::Readable);
        }
        true
    }

    // -----------------------------------------------------------------------
    // Send path
    // -----------------------------------------------------------------------

    fn queue_connect_message(&mut self) {
        self.snd_wnd = 1;
        self.send.queue(&[CTL_CONNECT], true, self.snd_una);
    }

    /// Send as much queued data as the windows allow, then settle any ack
    /// owed according to `urgency`.
    fn attempt_send(&mut self, mut urgency: AckUrgency) {
        let now = self.clock.now_ms();
        let mss = self.mtu.mss();

        if time_diff(now, self.last_send) > self.timer.current_rto as i32 {
            self.cc.restart_after_idle(mss);
        }

        loop {
            let window = self.cc.send_window(self.snd_wnd, mss);
            let in_flight = self.in_flight();
            let useable = window.saturating_sub(in_flight);
            let unsent = self.send.buffered().saturating_sub(in_flight);

            let mut available = unsent.min(mss);
            if available > useable {
                // Silly-window avoidance (RFC 813).
                available = if useable * 4 < window { 0 } else { useable };
            }

            if available == 0 {
                match urgency {
                    AckUrgency::None => {}
                    AckUrgency::Immediate => {
                        self.packet(self.snd_nxt, 0, 0, 0);
                    }
                    AckUrgency::Delayed => {
                        // The second delayed ack goes out at once.
                        if self.ack_pending_since.is_some() {
                            self.packet(self.snd_nxt, 0, 0, 0);
                        } else {
                            self.ack_pending_since = Some(now);
                        }
                    }
                }
                return;
            }

            // Nagle: hold back a runt while anything is unacknowledged.
            if !self.config.no_delay && seq_lt(self.snd_una, self.snd_nxt) && available < mss {
                return;
            }

            let Some(idx) = self.send.first_unsent() else {
                return;
            };
            if self.send.segment(idx).is_some_and(|s| s.len > available) {
                self.send.split(idx, available);
            }

            if !self.transmit(idx, now) {
                log::debug!("[send] transmit failed");
                return;
            }
            urgency = AckUrgency::None;
        }
    }

    /// Hand segment `idx` to the channel, shrinking the MSS on `TooLarge`.
    ///
    /// Returns `false` when the segment has hit its attempt ceiling, the
    /// channel failed, or the MTU table is exhausted.
    fn transmit(&mut self, idx: usize, now: u32) -> bool {
        let Some(seg) = self.send.segment(idx).copied() else {
            return false;
        };
        let max_attempts = self.state.max_attempts();
        if seg.xmit >= max_attempts {
            log::warn!(
                "[send] seq={} reached {} attempts in {}",
                seg.seq,
                seg.xmit,
                self.state
            );
            return false;
        }

        let flags = if seg.ctrl { flags::CTL } else { 0 };
        let offset = seg.seq.wrapping_sub(self.snd_una);
        let mut len = seg.len.min(self.mtu.mss());
        loop {
            match self.packet(seg.seq, flags, offset, len) {
                WriteResult::Success => break,
                WriteResult::Failed => return false,
                WriteResult::TooLarge => match self.mtu.shrink_below(len) {
                    Some(mss) => {
                        log::debug!("[send] packet too large; mss {len} -> {mss}");
                        self.cc.on_mss_shrink(mss);
                        len = mss;
                    }
                    None => {
                        log::warn!("[send] no smaller MTU left to try");
                        return false;
                    }
                },
            }
        }

        if len < seg.len {
            self.send.split(idx, len);
        }
        if let Some(sent) = self.send.segment_mut(idx) {
            if sent.xmit == 0 {
                self.snd_nxt = self.snd_nxt.wrapping_add(sent.len);
            }
            sent.xmit += 1;
        }
        if self.rto_base.is_none() {
            self.rto_base = Some(now);
        }
        true
    }

    /// Encode and write one segment carrying `len` bytes from `offset` past
    /// `snd_una`.
    ///
    /// Pure acks (`len == 0`) are treated as sent whatever the channel says:
    /// nothing retries them, and a lost ack is indistinguishable from a
    /// dropped one.
    fn packet(&mut self, seq: u32, flags: u8, offset: u32, len: u32) -> WriteResult {
        let now = self.clock.now_ms();
        let window = self.recv.window().min(u32::from(u16::MAX));
        let payload = if len > 0 {
            self.send.read(offset, len)
        } else {
            Vec::new()
        };
        let packet = Packet {
            header: Header {
                conv: self.conv,
                seq,
                ack: self.recv.rcv_nxt,
                flags,
                window: window as u16,
                tsval: now,
                tsecr: self.ts_recent,
            },
            payload,
        };
        self.ts_lastack = self.recv.rcv_nxt;

        let result = self.channel.write_packet(&packet.encode());
        log::debug!(
            "[send] → seq={} ack={} len={} flags={:#04x} wnd={} {:?}",
            seq,
            packet.header.ack,
            len,
            flags,
            window,
            result
        );
        if result != WriteResult::Success && len != 0 {
            return result;
        }

        self.ack_pending_since = None;
        self.last_advertised_wnd = window;
        if len > 0 {
            self.last_send = now;
        }
        self.last_traffic = now;
        WriteResult::Success
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn run_timers(&mut self, now: u32) {
        let rto = self.timer.current_rto;

        if let Some(base) = self.rto_base {
            if time_diff(base.wrapping_add(rto), now) <= 0 {
                if self.send.is_empty() {
                    self.rto_base = None;
                } else {
                    log::debug!(
                        "[tcp] rto {}ms expired; retransmitting seq={}",
                        rto,
                        self.snd_una
                    );
                    if !self.transmit(0, now) {
                        self.closedown(TcpError::ConnectionAborted);
                        return;
                    }
                    self.cc.on_timeout(self.in_flight(), self.mtu.mss());
                    let limit = if self.state < ConnectionState::Established {
                        DEF_RTO
                    } else {
                        MAX_RTO
                    };
                    self.timer.back_off(limit);
                    self.rto_base = Some(now);
                }
            }
        }

        if self.snd_wnd == 0
            && time_diff(self.last_send.wrapping_add(self.timer.current_rto), now) <= 0
        {
            if time_diff(now, self.last_recv) >= ZERO_WINDOW_STALL as i32 {
                log::warn!("[tcp] peer window closed and silent for 15s");
                self.closedown(TcpError::ConnectionAborted);
                return;
            }
            // An empty segment below snd_nxt draws an immediate ack carrying
            // the peer's current window.
            self.packet(self.snd_nxt.wrapping_sub(1), 0, 0, 0);
            self.last_send = now;
            self.timer.back_off(MAX_RTO);
        }

        if let Some(since) = self.ack_pending_since {
            if time_diff(since.wrapping_add(self.config.ack_delay_ms), now) <= 0 {
                self.packet(self.snd_nxt, 0, 0, 0);
            }
        }
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    fn set_state(&mut self, state: ConnectionState) {
        log::debug!("[tcp] conv={} {} -> {}", self.conv, self.state, state);
        self.state = state;
    }

    fn establish(&mut self) {
        self.set_state(ConnectionState::Established);
        self.adjust_mtu();
        self.events.push_back(Event::Open);
    }

    fn adjust_mtu(&mut self) {
        let mss = self.mtu.adjust();
        self.cc.clamp_to_mss(mss);
        log::debug!(
            "[tcp] mtu hint {} -> mss {} (cwnd={} ssthresh={})",
            self.mtu.mtu_hint(),
            mss,
            self.cc.cwnd,
            self.cc.ssthresh
        );
    }

    /// Single exit for every fatal condition.
    fn closedown(&mut self, err: TcpError) {
        if self.state == ConnectionState::Closed {
            return;
        }
        log::warn!("[tcp] conv={} closing: {err}", self.conv);
        self.send.clear();
        self.rto_base = None;
        self.ack_pending_since = None;
        self.error = Some(err);
        self.set_state(ConnectionState::Closed);
        self.events.push_back(Event::Closed(err));
    }

    fn fail<T>(&mut self, err: TcpError) -> Result<T, TcpError> {
        self.error = Some(err);
        Err(err)
    }

    /// Deliver queued notifications.  Calls made from inside an observer
    /// only queue; the outermost dispatch drains everything.
    fn dispatch_events(&mut self) {
        if self.dispatching {
            return;
        }
        let Some(mut observer) = self.observer.take() else {
            self.events.clear();
            return;
        };
        self.dispatching = true;
        while let Some(event) = self.events.pop_front() {
            match event {
                Event::Open => observer.on_open(self),
                Event::Readable => observer.on_readable(self),
                Event::Writable => observer.on_writable(self),
                Event::Closed(err) => observer.on_closed(self, err),
            }
        }
        self.dispatching = false;
        self.observer = Some(observer);
    }
}
