// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Time-sync client: blasts nonces at the server, keeps a sliding window of
//! round-trip samples, and maintains the estimated offset as an atomic i64
//! so the hot query path never takes a lock.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::clock::ProcessClock;
use crate::config::Endpoint;
use crate::error::TransportError;

/// Burst size per loop iteration.
pub const DEFAULT_BLAST_SIZE: usize = 20;
/// Samples older than this (relative to the most recent receipt) are evicted.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1250);

#[derive(Clone, Copy, Debug)]
pub struct TimeSyncOptions {
    pub window: Duration,
    pub blast_size: usize,
}

impl Default for TimeSyncOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            blast_size: DEFAULT_BLAST_SIZE,
        }
    }
}

/// One round-trip measurement: local send/receive times bracket the
/// server's own timestamp reading.
#[derive(Clone, Copy, Debug)]
struct Sample {
    local_send_us: u64,
    local_recv_us: u64,
    server_us: u64,
}

impl Sample {
    /// Estimated offset at the midpoint of the round trip: positive means
    /// the server clock reads ahead of ours.
    fn offset_us(&self) -> i64 {
        let midpoint = (self.local_send_us + self.local_recv_us) / 2;
        self.server_us as i64 - midpoint as i64
    }
}

/// Client-side time-sync state, shared between the worker thread and every
/// thread that queries the estimated offset.
pub struct TimeSyncClient {
    clock: ProcessClock,
    offset_us: AtomicI64,
    foreign_offsets: Mutex<HashMap<u64, i64>>,
    options: TimeSyncOptions,
}

impl TimeSyncClient {
    pub fn new(options: TimeSyncOptions) -> Self {
        Self {
            clock: ProcessClock::new(),
            offset_us: AtomicI64::new(0),
            foreign_offsets: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Starts without contacting the server and pins the process id to a
    /// recorded value, used by playback so replayed timestamps read as if
    /// freshly produced by the recorded process.
    pub fn start_without_time_server(process_id: u64, options: TimeSyncOptions) -> Self {
        Self {
            clock: ProcessClock::with_process_id(process_id),
            offset_us: AtomicI64::new(0),
            foreign_offsets: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn estimate_offset_us(&self) -> i64 {
        self.offset_us.load(Ordering::Acquire)
    }

    pub fn estimate_offset_ms(&self) -> i64 {
        self.estimate_offset_us() / 1000
    }

    pub fn estimate_time_server_timestamp_us(&self) -> u64 {
        let now = self.clock.process_time_us() as i64;
        (now + self.estimate_offset_us()).max(0) as u64
    }

    pub fn estimate_time_server_timestamp_ms(&self) -> u64 {
        self.estimate_time_server_timestamp_us() / 1000
    }

    /// Estimate the server timestamp corresponding to a foreign process's own
    /// local timestamp, using that process's recorded offset if known, else
    /// falling back to this client's own offset.
    pub fn estimate_foreign_time_server_timestamp_us(&self, process_id: u64, process_time_us: u64) -> u64 {
        let offset = self
            .foreign_offsets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&process_id)
            .copied()
            .unwrap_or_else(|| self.estimate_offset_us());
        (process_time_us as i64 + offset).max(0) as u64
    }

    pub fn estimate_foreign_time_server_timestamp_ms(&self, process_id: u64, process_time_ms: u64) -> u64 {
        self.estimate_foreign_time_server_timestamp_us(process_id, process_time_ms * 1000) / 1000
    }

    /// Explicit bookkeeping entry point for a foreign process's offset: the
    /// wire protocol carries no `process_id`, so this registry can only be
    /// populated by an external observer (e.g. playback priming it from
    /// recorded metadata), not by snooping time-sync traffic itself.
    pub fn register_foreign_offset(&self, process_id: u64, offset_us: i64) {
        self.foreign_offsets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(process_id, offset_us);
    }

    pub fn process_id(&self) -> u64 {
        self.clock.process_id()
    }
}

fn new_client_socket() -> io::Result<UdpSocket> {
    let addr: std::net::SocketAddr = "0.0.0.0:0".parse().unwrap();
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Worker loop: blasts `options.blast_size` nonces at `server`, collects
/// replies, and refreshes `client`'s offset estimate, until `stop_all()`.
/// Intended to be the entire body of a dedicated thread.
pub fn run(client: &TimeSyncClient, server: &Endpoint) -> Result<(), TransportError> {
    let Endpoint::Udp { host, port } = server else {
        return Err(TransportError::Connect {
            endpoint: server.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "time-sync client requires a udp:// endpoint"),
        });
    };
    let addr_str = format!("{host}:{port}");
    let peer: std::net::SocketAddr = addr_str.parse().map_err(|_| TransportError::Connect {
        endpoint: addr_str.clone(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "unparseable server address"),
    })?;
    let socket = new_client_socket().map_err(|source| TransportError::Connect {
        endpoint: addr_str.clone(),
        source,
    })?;
    socket
        .set_read_timeout(Some(Duration::from_millis(50)))
        .map_err(TransportError::Recv)?;

    let mut samples: VecDeque<Sample> = VecDeque::new();
    let mut nonce_counter: u64 = 0;

    while !crate::stop::should_stop_all() {
        let mut pending: HashMap<u64, u64> = HashMap::with_capacity(client.options.blast_size);
        for _ in 0..client.options.blast_size {
            let nonce = nonce_counter;
            nonce_counter = nonce_counter.wrapping_add(1);
            let send_us = client.clock.process_time_us();
            if socket.send_to(&nonce.to_le_bytes(), peer).is_ok() {
                pending.insert(nonce, send_us);
            }
        }

        let deadline = std::time::Instant::now() + Duration::from_millis(200);
        let mut buf = [0u8; 16];
        while !pending.is_empty() && std::time::Instant::now() < deadline {
            match socket.recv_from(&mut buf) {
                Ok((16, from)) if from == peer => {
                    let nonce = u64::from_le_bytes(buf[0..8].try_into().unwrap());
                    let server_us = u64::from_le_bytes(buf[8..16].try_into().unwrap());
                    if let Some(send_us) = pending.remove(&nonce) {
                        let recv_us = client.clock.process_time_us();
                        samples.push_back(Sample {
                            local_send_us: send_us,
                            local_recv_us: recv_us,
                            server_us,
                        });
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => {
                    log::warn!("[telebus/timesync] client recv failed: {e}");
                    break;
                }
            }
        }

        evict_stale(&mut samples, client.options.window);
        if let Some(offset) = samples.iter().map(Sample::offset_us).min() {
            client.offset_us.store(offset, Ordering::Release);
        }
    }
    log::debug!("[telebus/timesync] client stopped");
    Ok(())
}

fn evict_stale(samples: &mut VecDeque<Sample>, window: Duration) {
    let Some(newest) = samples.iter().map(|s| s.local_recv_us).max() else {
        return;
    };
    let window_us = window.as_micros() as u64;
    let cutoff = newest.saturating_sub(window_us);
    samples.retain(|s| s.local_recv_us >= cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_minimum_over_samples() {
        let mut samples = VecDeque::new();
        samples.push_back(Sample {
            local_send_us: 1000,
            local_recv_us: 1100,
            server_us: 1100,
        });
        samples.push_back(Sample {
            local_send_us: 2000,
            local_recv_us: 2200,
            server_us: 2080,
        });
        let offset = samples.iter().map(Sample::offset_us).min().unwrap();
        assert_eq!(offset, 2080 - 2100);
    }

    #[test]
    fn evict_stale_drops_old_samples() {
        let mut samples = VecDeque::new();
        samples.push_back(Sample {
            local_send_us: 0,
            local_recv_us: 0,
            server_us: 0,
        });
        samples.push_back(Sample {
            local_send_us: 2_000_000,
            local_recv_us: 2_000_000,
            server_us: 2_000_000,
        });
        evict_stale(&mut samples, Duration::from_millis(1250));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].local_recv_us, 2_000_000);
    }

    #[test]
    fn foreign_offset_falls_back_to_own_offset() {
        let client = TimeSyncClient::new(TimeSyncOptions::default());
        client.offset_us.store(500, Ordering::Release);
        let estimate = client.estimate_foreign_time_server_timestamp_us(99, 1000);
        assert_eq!(estimate, 1500);

        client.register_foreign_offset(99, -200);
        let estimate = client.estimate_foreign_time_server_timestamp_us(99, 1000);
        assert_eq!(estimate, 800);
    }

    #[test]
    fn start_without_time_server_pins_process_id() {
        let client = TimeSyncClient::start_without_time_server(777, TimeSyncOptions::default());
        assert_eq!(client.process_id(), 777);
        assert_eq!(client.estimate_offset_us(), 0);
    }
}
