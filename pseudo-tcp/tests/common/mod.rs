//! Helpers shared by the integration tests.

#![allow(dead_code)]

use pseudo_tcp::simulator::{Network, Side, SimulatorConfig};
use pseudo_tcp::{Config, Connection, ConnectionState};

pub const CONV: u32 = 42;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two connections joined by a simulated link; `a` is the active side.
pub fn pair(link: SimulatorConfig, config: Config) -> (Network, Connection, Connection) {
    init_logging();
    let net = Network::new(link);
    let a = Connection::new(CONV, config.clone(), net.endpoint(Side::A), net.clock());
    let b = Connection::new(CONV, config, net.endpoint(Side::B), net.clock());
    (net, a, b)
}

/// Connect `a` to `b` and wait for both to reach ESTABLISHED.
pub fn establish(net: &Network, a: &mut Connection, b: &mut Connection) {
    a.connect().expect("connect from LISTEN");
    let ok = net.run_until(a, b, 120_000, |a, b| {
        a.state() == ConnectionState::Established && b.state() == ConnectionState::Established
    });
    assert!(ok, "handshake did not complete: a={} b={}", a.state(), b.state());
}

/// Deterministic payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Push `data` from `a` to `b`, reading at most `read_chunk` bytes per step.
///
/// Returns what `b` received once it has everything, either side closes, or
/// `max_ms` of simulated time runs out.
pub fn transfer(
    net: &Network,
    a: &mut Connection,
    b: &mut Connection,
    data: &[u8],
    read_chunk: usize,
    max_ms: u32,
) -> Vec<u8> {
    let mut sent = 0;
    let mut received = Vec::with_capacity(data.len());
    let mut buf = vec![0u8; read_chunk];
    net.run_until(a, b, max_ms, |a, b| {
        if sent < data.len() {
            if let Ok(n) = a.send(&data[sent..]) {
                sent += n;
            }
        }
        if let Ok(n) = b.recv(&mut buf) {
            received.extend_from_slice(&buf[..n]);
        }
        received.len() == data.len()
            || a.state() == ConnectionState::Closed
            || b.state() == ConnectionState::Closed
    });
    received
}
