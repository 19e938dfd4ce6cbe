// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stateless UDP echo server: reply to every client nonce with the server's
//! own process time.

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::clock::ProcessClock;
use crate::config::Endpoint;
use crate::error::TransportError;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Request payload: an 8-byte little-endian client nonce.
const REQUEST_SIZE: usize = 8;

fn new_udp_socket(bind_addr: &str) -> io::Result<UdpSocket> {
    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "unparseable bind address"))?;
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Runs the time-sync echo server until `should_stop_all()` is observed.
/// Blocking, intended to be the entire body of a dedicated thread.
pub fn run(endpoint: &Endpoint) -> Result<(), TransportError> {
    let Endpoint::Udp { host, port } = endpoint else {
        return Err(TransportError::Bind {
            endpoint: endpoint.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "time-sync server requires a udp:// endpoint"),
        });
    };
    let addr_str = format!("{host}:{port}");
    let socket = new_udp_socket(&addr_str).map_err(|source| TransportError::Bind {
        endpoint: addr_str.clone(),
        source,
    })?;
    socket
        .set_read_timeout(Some(RECV_TIMEOUT))
        .map_err(TransportError::Recv)?;
    log::info!("[telebus/timesync] server listening on {addr_str}");

    let clock = ProcessClock::new();
    let mut buf = [0u8; REQUEST_SIZE];
    while !crate::stop::should_stop_all() {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if n != REQUEST_SIZE {
                    log::warn!("[telebus/timesync] malformed request from {from} ({n} bytes)");
                    continue;
                }
                let mut reply = [0u8; 16];
                reply[0..8].copy_from_slice(&buf);
                reply[8..16].copy_from_slice(&clock.process_time_us().to_le_bytes());
                if let Err(err) = socket.send_to(&reply, from) {
                    log::warn!("[telebus/timesync] reply send failed: {err}");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(TransportError::Recv(e)),
        }
    }
    log::debug!("[telebus/timesync] server stopped");
    Ok(())
}
