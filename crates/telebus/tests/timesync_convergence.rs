// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end "time-sync convergence" scenario: a loopback server and client
//! should converge to an offset within a couple of milliseconds of zero,
//! since both sides share the same local clock.
//!
//! Deliberately never calls `stop::stop_all()`: the stop flag is
//! process-global with no reset (see `stop.rs`), and flipping it here would
//! break every other worker-thread test sharing this test binary. The
//! spawned server/client threads are left running for the rest of the
//! process instead.

use std::sync::Arc;
use std::time::Duration;

use telebus::config::Endpoint;
use telebus::timesync::{TimeSyncClient, TimeSyncOptions};

fn unique_port() -> u16 {
    10_000 + (std::process::id() as u16 % 20_000)
}

#[test]
fn loopback_offset_converges_near_zero() {
    let port = unique_port();
    let endpoint: Endpoint = format!("udp://127.0.0.1:{port}").parse().unwrap();

    let server_endpoint = endpoint.clone();
    std::thread::spawn(move || {
        let _ = telebus::timesync::server::run(&server_endpoint);
    });
    std::thread::sleep(Duration::from_millis(100));

    let client = Arc::new(TimeSyncClient::new(TimeSyncOptions::default()));
    let worker_client = client.clone();
    let worker_endpoint = endpoint;
    std::thread::spawn(move || {
        let _ = telebus::timesync::client::run(&worker_client, &worker_endpoint);
    });

    std::thread::sleep(Duration::from_millis(500));
    let offset_ms = client.estimate_offset_ms();
    assert!(offset_ms.abs() <= 2, "expected |offset| <= 2ms, got {offset_ms}ms");
}
