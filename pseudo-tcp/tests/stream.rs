//! Integration tests for bulk transfer over the simulated link.
//!
//! Every test is deterministic: the link draws its faults from a seeded RNG
//! and time only moves when the simulator advances it.

mod common;

use std::time::Duration;

use pseudo_tcp::connection::CLOSED_TIMEOUT;
use pseudo_tcp::simulator::SimulatorConfig;
use pseudo_tcp::{Config, ConnectionState, TcpError};

use common::{establish, pair, payload, transfer};

const MINUTE: u32 = 60 * 1_000;

// ---------------------------------------------------------------------------
// Byte fidelity
// ---------------------------------------------------------------------------

#[test]
fn transfer_over_clean_link() {
    let (net, mut a, mut b) = pair(SimulatorConfig::default(), Config::default());
    a.notify_mtu(1_400);
    b.notify_mtu(1_400);
    establish(&net, &mut a, &mut b);

    let data = payload(200_000);
    let got = transfer(&net, &mut a, &mut b, &data, 64 * 1024, 10 * MINUTE);
    assert_eq!(got.len(), data.len());
    assert!(got == data, "stream corrupted");
    assert_eq!(net.stats().dropped, 0);
}

#[test]
fn transfer_survives_loss_duplication_and_reordering() {
    for seed in 1..=3 {
        let link = SimulatorConfig {
            loss_rate: 0.05,
            duplicate_rate: 0.05,
            reorder_rate: 0.1,
            reorder_delay_ms: 30,
            seed,
            ..SimulatorConfig::default()
        };
        let (net, mut a, mut b) = pair(link, Config::default());
        a.notify_mtu(1_400);
        b.notify_mtu(1_400);
        establish(&net, &mut a, &mut b);

        let data = payload(64 * 1024);
        let got = transfer(&net, &mut a, &mut b, &data, 64 * 1024, 30 * MINUTE);
        assert!(got == data, "seed {seed}: received {} of {} bytes", got.len(), data.len());

        let stats = net.stats();
        assert!(stats.dropped > 0, "seed {seed}: no loss injected");
        assert!(stats.reordered > 0, "seed {seed}: no reordering injected");
    }
}

#[test]
fn every_datagram_duplicated_is_delivered_once() {
    let link = SimulatorConfig {
        duplicate_rate: 1.0,
        ..SimulatorConfig::default()
    };
    let (net, mut a, mut b) = pair(link, Config::default());
    a.notify_mtu(1_400);
    b.notify_mtu(1_400);
    establish(&net, &mut a, &mut b);

    let data = payload(32 * 1024);
    let got = transfer(&net, &mut a, &mut b, &data, 64 * 1024, 10 * MINUTE);
    assert!(got == data);
    assert_eq!(b.recv_buffered(), 0);
}

#[test]
fn no_delay_transfer() {
    let config = Config {
        no_delay: true,
        ack_delay_ms: 0,
        ..Config::default()
    };
    let (net, mut a, mut b) = pair(SimulatorConfig::default(), config);
    establish(&net, &mut a, &mut b);

    let data = payload(10_000);
    let got = transfer(&net, &mut a, &mut b, &data, 64 * 1024, 10 * MINUTE);
    assert!(got == data);
}

// ---------------------------------------------------------------------------
// Flow control
// ---------------------------------------------------------------------------

#[test]
fn receive_window_tracks_buffer_with_slow_reader() {
    let config = Config {
        recv_buffer_size: 8 * 1024,
        ..Config::default()
    };
    let (net, mut a, mut b) = pair(SimulatorConfig::default(), config);
    a.notify_mtu(1_400);
    b.notify_mtu(1_400);
    establish(&net, &mut a, &mut b);

    let data = payload(60_000);
    let mut sent = 0;
    let mut received = Vec::new();
    let mut buf = vec![0u8; 1_500];
    let mut reader_lagged = false;

    let done = net.run_until(&mut a, &mut b, 30 * MINUTE, |a, b| {
        assert_eq!(
            b.rcv_wnd() as usize + b.recv_buffered(),
            b.recv_buffer_capacity()
        );
        reader_lagged |= b.rcv_wnd() < 1_500;

        if sent < data.len() {
            if let Ok(n) = a.send(&data[sent..]) {
                sent += n;
            }
        }
        if let Ok(n) = b.recv(&mut buf) {
            received.extend_from_slice(&buf[..n]);
        }
        received.len() == data.len() || a.state() == ConnectionState::Closed
    });

    assert!(done);
    assert!(received == data);
    assert!(reader_lagged, "reader never fell behind");
    assert_eq!(a.state(), ConnectionState::Established);
}

// ---------------------------------------------------------------------------
// Congestion control
// ---------------------------------------------------------------------------

fn congestion_trace(seed: u64) -> Vec<(u32, u32, u32)> {
    let link = SimulatorConfig {
        loss_rate: 0.05,
        seed,
        ..SimulatorConfig::default()
    };
    let (net, mut a, mut b) = pair(link, Config::default());
    a.notify_mtu(1_400);
    b.notify_mtu(1_400);
    establish(&net, &mut a, &mut b);

    let data = payload(256 * 1024);
    let clock = net.clock();
    let mut sent = 0;
    let mut received = 0;
    let mut buf = vec![0u8; 64 * 1024];
    let mut trace = Vec::new();

    net.run_until(&mut a, &mut b, 30 * MINUTE, |a, b| {
        trace.push((clock.get(), a.cwnd(), a.ssthresh()));
        if sent < data.len() {
            if let Ok(n) = a.send(&data[sent..]) {
                sent += n;
            }
        }
        while let Ok(n) = b.recv(&mut buf) {
            received += n;
        }
        received == data.len()
    });
    assert_eq!(received, data.len());
    trace
}

#[test]
fn congestion_trajectory_is_reproducible() {
    let first = congestion_trace(9);
    let second = congestion_trace(9);
    assert_eq!(first, second);

    let (_, initial_cwnd, initial_ssthresh) = first[0];
    assert!(
        first.iter().any(|&(_, cwnd, _)| cwnd > initial_cwnd),
        "window never grew"
    );
    assert!(
        first.iter().any(|&(_, _, ssthresh)| ssthresh < initial_ssthresh),
        "loss never lowered ssthresh"
    );
}

// ---------------------------------------------------------------------------
// MTU
// ---------------------------------------------------------------------------

#[test]
fn oversize_datagrams_shrink_mss() {
    let link = SimulatorConfig {
        mtu: Some(1_400),
        ..SimulatorConfig::default()
    };
    let (net, mut a, mut b) = pair(link, Config::default());
    establish(&net, &mut a, &mut b);
    assert_eq!(a.mss(), 65_535 - 116);

    let data = payload(20_000);
    let got = transfer(&net, &mut a, &mut b, &data, 64 * 1024, 10 * MINUTE);
    assert!(got == data);
    assert_eq!(a.mss(), 1_492 - 116);
    assert!(net.stats().too_large > 0);
}

// ---------------------------------------------------------------------------
// Retransmission bound
// ---------------------------------------------------------------------------

#[test]
fn dead_link_aborts_after_thirty_attempts() {
    let (net, mut a, mut b) = pair(SimulatorConfig::default(), Config::default());
    establish(&net, &mut a, &mut b);
    net.run_until(&mut a, &mut b, MINUTE, |_, _| net.in_flight() == 0);

    net.set_loss_rate(1.0);
    let before = net.stats().sent_a;
    a.send(b"0123456789").unwrap();

    let closed = net.run_until(&mut a, &mut b, 60 * MINUTE, |a, _| {
        a.state() == ConnectionState::Closed
    });
    assert!(closed);
    assert_eq!(a.error(), Some(TcpError::ConnectionAborted));
    assert_eq!(net.stats().sent_a - before, 30);
    assert_eq!(b.state(), ConnectionState::Established);
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[test]
fn graceful_close_drains_queue() {
    let (net, mut a, mut b) = pair(SimulatorConfig::default(), Config::default());
    a.notify_mtu(1_400);
    b.notify_mtu(1_400);
    establish(&net, &mut a, &mut b);

    let data = payload(30_000);
    assert_eq!(a.send(&data), Ok(data.len()));
    a.close(false);

    let clock = net.clock();
    let mut received = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    let drained = net.run_until(&mut a, &mut b, 10 * MINUTE, |a, b| {
        while let Ok(n) = b.recv(&mut buf) {
            received.extend_from_slice(&buf[..n]);
        }
        a.next_tick_deadline(clock.get()).is_none()
    });

    assert!(drained);
    assert!(received == data);
    assert_eq!(a.send_buffered(), 0);
    assert_eq!(a.state(), ConnectionState::Established);
}

#[test]
fn forceful_close_is_immediate() {
    let (net, mut a, mut b) = pair(SimulatorConfig::default(), Config::default());
    establish(&net, &mut a, &mut b);

    a.send(&payload(30_000)).unwrap();
    a.close(true);
    assert_eq!(a.state(), ConnectionState::Closed);
    assert_eq!(a.send_buffered(), 0);
    assert_eq!(
        a.next_tick_deadline(net.clock().get()),
        Some(Duration::from_millis(u64::from(CLOSED_TIMEOUT)))
    );
    assert_eq!(a.send(b"more"), Err(TcpError::NotConnected));

    // Whatever is still on the wire reaches B; A answers nothing.
    net.run_until(&mut a, &mut b, MINUTE, |_, _| net.in_flight() == 0);
    let sent_a = net.stats().sent_a;
    net.run_until(&mut a, &mut b, MINUTE, |_, _| false);
    assert_eq!(net.stats().sent_a, sent_a);
}
