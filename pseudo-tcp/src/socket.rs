//! Async UDP transport for a [`Connection`].
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket`.  It hands out
//! a [`UdpChannel`] that the connection writes datagrams through, and
//! [`Socket::drive`] runs the event loop: feed inbound datagrams to
//! [`Connection::notify_packet`] and call [`Connection::notify_clock`]
//! whenever [`Connection::next_tick_deadline`] elapses.
//!
//! All protocol logic lives in the connection; this module owns only byte
//! I/O and timing.  Everything is single-threaded, so the socket is shared
//! with `Rc`.

use std::cell::Cell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::clock::Clock;
use crate::connection::{Channel, Connection, WriteResult, CLOSED_TIMEOUT};
use crate::packet::MAX_PACKET;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Datagram channel to one remote peer.
///
/// The peer address may be unknown at construction (a listening server);
/// [`Socket::drive`] fills it in from the first datagram that arrives.
/// Writes before then fail.
#[derive(Debug, Clone)]
pub struct UdpChannel {
    socket: Rc<UdpSocket>,
    peer: Rc<Cell<Option<SocketAddr>>>,
}

impl Channel for UdpChannel {
    fn write_packet(&mut self, packet: &[u8]) -> WriteResult {
        let Some(peer) = self.peer.get() else {
            return WriteResult::Failed;
        };
        match self.socket.try_send_to(packet, peer) {
            Ok(_) => WriteResult::Success,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => WriteResult::Failed,
            Err(e) => {
                log::warn!("[udp] send to {peer} failed: {e}");
                WriteResult::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async UDP socket carrying one connection.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: Rc<UdpSocket>,
    peer: Rc<Cell<Option<SocketAddr>>>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner: Rc::new(inner),
            peer: Rc::new(Cell::new(None)),
        })
    }

    /// Fix the remote address; datagrams from anyone else are ignored.
    pub fn set_peer(&self, peer: SocketAddr) {
        self.peer.set(Some(peer));
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.get()
    }

    /// A [`Channel`] writing to this socket's peer.
    pub fn channel(&self) -> UdpChannel {
        UdpChannel {
            socket: Rc::clone(&self.inner),
            peer: Rc::clone(&self.peer),
        }
    }

    /// Run `conn` until `pump` returns `true` or a graceful close drains.
    ///
    /// `pump` is called before every wait so the caller can move data in and
    /// out of the connection.  `clock` must be the same time source the
    /// connection was built with.
    pub async fn drive<K, F>(
        &self,
        conn: &mut Connection,
        clock: &K,
        mut pump: F,
    ) -> Result<(), SocketError>
    where
        K: Clock,
        F: FnMut(&mut Connection) -> bool,
    {
        let mut buf = vec![0u8; MAX_PACKET];
        loop {
            if pump(conn) {
                return Ok(());
            }
            let Some(wait) = conn.next_tick_deadline(clock.now_ms()) else {
                log::debug!("[udp] connection drained");
                return Ok(());
            };
            let wait = wait.min(Duration::from_millis(u64::from(CLOSED_TIMEOUT)));

            tokio::select! {
                received = self.inner.recv_from(&mut buf) => {
                    let (n, from) = received?;
                    match self.peer.get() {
                        None => {
                            log::info!("[udp] peer is {from}");
                            self.peer.set(Some(from));
                        }
                        Some(peer) if peer != from => {
                            log::debug!("[udp] ignoring datagram from {from}");
                            continue;
                        }
                        Some(_) => {}
                    }
                    conn.notify_packet(&buf[..n]);
                }
                _ = tokio::time::sleep(wait) => {
                    conn.notify_clock(clock.now_ms());
                }
            }
        }
    }
}
