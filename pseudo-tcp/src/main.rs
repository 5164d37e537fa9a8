//! Entry point for `pseudo-tcp`.
//!
//! Parses CLI arguments and dispatches into **server**, **client**, or
//! **simulate** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing) and the
//! small framing used by the demo: the client sends an 8-byte big-endian
//! length followed by that many bytes, and the server reads exactly that.

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::{Rng, SeedableRng};

use pseudo_tcp::simulator::{Network, Side, SimulatorConfig};
use pseudo_tcp::socket::Socket;
use pseudo_tcp::{Config, Connection, ConnectionState, SystemClock, TcpError};

/// TCP-like reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept one stream and report what arrived.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        #[command(flatten)]
        tcp: TcpArgs,
    },
    /// Connect to a server and send a stream of random bytes.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Local address to bind.
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Payload size in bytes.
        #[arg(long, default_value_t = 1 << 20)]
        bytes: u64,
        #[command(flatten)]
        tcp: TcpArgs,
    },
    /// Run a transfer between two in-memory peers over a faulty link.
    Simulate {
        /// Payload size in bytes.
        #[arg(long, default_value_t = 256 * 1024)]
        bytes: usize,
        /// Packet loss probability.
        #[arg(long, default_value_t = 0.05)]
        loss: f64,
        /// Reorder probability.
        #[arg(long, default_value_t = 0.05)]
        reorder: f64,
        /// Duplication probability.
        #[arg(long, default_value_t = 0.01)]
        duplicate: f64,
        /// One-way latency in milliseconds.
        #[arg(long, default_value_t = 20)]
        latency: u32,
        /// RNG seed for the link and the payload.
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[command(flatten)]
        tcp: TcpArgs,
    },
}

/// Per-connection tuning shared by every mode.
#[derive(Args, Clone)]
struct TcpArgs {
    /// Conversation id; both peers must agree.
    #[arg(long, default_value_t = 1)]
    conv: u32,
    /// Disable Nagle's algorithm.
    #[arg(long)]
    no_delay: bool,
    /// Delayed-ack interval in milliseconds (0 acks immediately).
    #[arg(long, default_value_t = pseudo_tcp::timer::DEF_ACK_DELAY)]
    ack_delay: u32,
    /// Path MTU hint.
    #[arg(long)]
    mtu: Option<u16>,
    /// Send buffer size in bytes.
    #[arg(long, default_value_t = pseudo_tcp::config::DEFAULT_SND_BUF_SIZE)]
    send_buffer: usize,
    /// Receive buffer size in bytes.
    #[arg(long, default_value_t = pseudo_tcp::config::DEFAULT_RCV_BUF_SIZE)]
    recv_buffer: usize,
}

impl TcpArgs {
    fn config(&self) -> Config {
        Config {
            no_delay: self.no_delay,
            ack_delay_ms: self.ack_delay,
            send_buffer_size: self.send_buffer,
            recv_buffer_size: self.recv_buffer,
        }
    }

    fn apply(&self, conn: &mut Connection) {
        if let Some(mtu) = self.mtu {
            conn.notify_mtu(mtu);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server { bind, tcp } => run_server(bind, &tcp).await,
        Mode::Client {
            server,
            bind,
            bytes,
            tcp,
        } => run_client(server, bind, bytes, &tcp).await,
        Mode::Simulate {
            bytes,
            loss,
            reorder,
            duplicate,
            latency,
            seed,
            tcp,
        } => {
            let link = SimulatorConfig {
                loss_rate: loss,
                reorder_rate: reorder,
                reorder_delay_ms: latency * 2,
                duplicate_rate: duplicate,
                latency_ms: latency,
                mtu: None,
                seed,
            };
            run_simulation(link, bytes, &tcp)
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

async fn run_server(bind: SocketAddr, tcp: &TcpArgs) -> Result<()> {
    let socket = Socket::bind(bind).await.context("bind server socket")?;
    log::info!("listening on {}", socket.local_addr);

    let clock = SystemClock::new();
    let mut conn = Connection::new(tcp.conv, tcp.config(), socket.channel(), clock.clone());
    tcp.apply(&mut conn);

    let mut header = Vec::with_capacity(8);
    let mut expected: Option<u64> = None;
    let mut received: u64 = 0;
    let mut buf = vec![0u8; 64 * 1024];
    let mut started: Option<Instant> = None;

    socket
        .drive(&mut conn, &clock, |conn| {
            loop {
                match conn.recv(&mut buf) {
                    Ok(n) => {
                        started.get_or_insert_with(Instant::now);
                        let mut chunk = &buf[..n];
                        if expected.is_none() {
                            let need = 8 - header.len();
                            let take = need.min(chunk.len());
                            header.extend_from_slice(&chunk[..take]);
                            chunk = &chunk[take..];
                            if header.len() == 8 {
                                let mut len = [0u8; 8];
                                len.copy_from_slice(&header);
                                expected = Some(u64::from_be_bytes(len));
                            }
                        }
                        received += chunk.len() as u64;
                    }
                    Err(TcpError::WouldBlock | TcpError::NotConnected) => break,
                    Err(e) => {
                        log::warn!("recv failed: {e}");
                        return true;
                    }
                }
            }
            if conn.state() == ConnectionState::Closed {
                return true;
            }
            if expected.is_some_and(|n| received >= n) {
                conn.close(false);
            }
            false
        })
        .await?;

    if let Some(err) = conn.error().filter(|_| conn.state() == ConnectionState::Closed) {
        bail!("connection failed after {received} bytes: {err}");
    }
    let elapsed = started.map(|s| s.elapsed()).unwrap_or_default();
    log::info!(
        "received {received} bytes in {:.2}s from {:?}",
        elapsed.as_secs_f64(),
        socket.peer()
    );
    println!("{received}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

async fn run_client(server: SocketAddr, bind: SocketAddr, bytes: u64, tcp: &TcpArgs) -> Result<()> {
    let socket = Socket::bind(bind).await.context("bind client socket")?;
    socket.set_peer(server);
    log::info!("connecting {} -> {server}", socket.local_addr);

    let clock = SystemClock::new();
    let mut conn = Connection::new(tcp.conv, tcp.config(), socket.channel(), clock.clone());
    tcp.apply(&mut conn);
    conn.connect().context("start handshake")?;

    let mut rng = rand::rng();
    let mut pending: Vec<u8> = bytes.to_be_bytes().to_vec();
    let mut remaining = bytes;
    let started = Instant::now();

    socket
        .drive(&mut conn, &clock, |conn| {
            if conn.state() == ConnectionState::Closed {
                return true;
            }
            if conn.state() != ConnectionState::Established {
                return false;
            }
            loop {
                if pending.is_empty() && remaining > 0 {
                    let n = remaining.min(16 * 1024) as usize;
                    pending = (0..n).map(|_| rng.random()).collect();
                    remaining -= n as u64;
                }
                if pending.is_empty() {
                    break;
                }
                match conn.send(&pending) {
                    Ok(n) => {
                        pending.drain(..n);
                    }
                    Err(_) => break,
                }
            }
            if pending.is_empty() && remaining == 0 && conn.send_buffered() == 0 {
                conn.close(false);
            }
            false
        })
        .await?;

    if conn.state() == ConnectionState::Closed {
        if let Some(err) = conn.error() {
            bail!("connection failed: {err}");
        }
    }
    log::info!(
        "sent {bytes} bytes in {:.2}s (rto={}ms mss={})",
        started.elapsed().as_secs_f64(),
        conn.rto(),
        conn.mss()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

fn run_simulation(link: SimulatorConfig, bytes: usize, tcp: &TcpArgs) -> Result<()> {
    let mut payload_rng = rand::rngs::StdRng::seed_from_u64(link.seed);
    let payload: Vec<u8> = (0..bytes).map(|_| payload_rng.random()).collect();

    let net = Network::new(link);
    let mut a = Connection::new(tcp.conv, tcp.config(), net.endpoint(Side::A), net.clock());
    let mut b = Connection::new(tcp.conv, tcp.config(), net.endpoint(Side::B), net.clock());
    tcp.apply(&mut a);
    tcp.apply(&mut b);
    a.connect().context("start handshake")?;

    let start = net.clock().get();
    let mut sent = 0;
    let mut received = Vec::with_capacity(bytes);
    let mut buf = vec![0u8; 64 * 1024];

    let done = net.run_until(&mut a, &mut b, 30 * 60 * 1000, |a, b| {
        if a.state() == ConnectionState::Established && sent < payload.len() {
            if let Ok(n) = a.send(&payload[sent..]) {
                sent += n;
            }
        }
        while let Ok(n) = b.recv(&mut buf) {
            received.extend_from_slice(&buf[..n]);
        }
        received.len() == payload.len()
            || a.state() == ConnectionState::Closed
            || b.state() == ConnectionState::Closed
    });

    let elapsed = net.clock().get() - start;
    let stats = net.stats();
    println!("transferred  {} / {} bytes", received.len(), payload.len());
    println!("sim time     {elapsed} ms");
    println!(
        "datagrams    a={} b={} dropped={} dup={} reordered={}",
        stats.sent_a, stats.sent_b, stats.dropped, stats.duplicated, stats.reordered
    );
    println!(
        "sender       cwnd={} ssthresh={} rto={}ms mss={}",
        a.cwnd(),
        a.ssthresh(),
        a.rto(),
        a.mss()
    );

    if !done || received != payload {
        bail!(
            "transfer incomplete (a={}, b={}, error={:?})",
            a.state(),
            b.state(),
            a.error().or(b.error())
        );
    }
    Ok(())
}
