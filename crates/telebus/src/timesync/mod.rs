// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Time synchronization: a stateless UDP echo server and a client that
//! estimates the offset between the local monotonic clock and the server's.

pub mod client;
pub mod server;

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::Endpoint;

pub use client::{TimeSyncClient, TimeSyncOptions};

/// Owns the time-sync client worker thread. Construct with [`TimeSync::init`]
/// (contacts a server) or [`TimeSync::start_without_time_server`] (playback).
pub struct TimeSync {
    client: Arc<TimeSyncClient>,
    thread: Option<JoinHandle<()>>,
}

impl TimeSync {
    /// Starts the client worker thread against `server`.
    pub fn init(server: Endpoint, options: TimeSyncOptions) -> Self {
        let client = Arc::new(TimeSyncClient::new(options));
        let thread = {
            let client = client.clone();
            std::thread::Builder::new()
                .name("telebus-timesync-client".into())
                .spawn(move || {
                    if let Err(err) = client::run(&client, &server) {
                        log::error!("[telebus/timesync] client worker exited: {err}");
                    }
                })
                .expect("failed to spawn time-sync client thread")
        };
        Self {
            client,
            thread: Some(thread),
        }
    }

    /// Playback mode: no server contact, process id pinned to the recorded
    /// value, offset fixed at zero.
    pub fn start_without_time_server(process_id: u64, options: TimeSyncOptions) -> Self {
        Self {
            client: Arc::new(TimeSyncClient::start_without_time_server(process_id, options)),
            thread: None,
        }
    }

    pub fn handle(&self) -> Arc<TimeSyncClient> {
        self.client.clone()
    }

    pub fn estimate_offset_us(&self) -> i64 {
        self.client.estimate_offset_us()
    }

    pub fn estimate_time_server_timestamp_us(&self) -> u64 {
        self.client.estimate_time_server_timestamp_us()
    }

    /// Stops the global shutdown flag (shared with the rest of the process)
    /// and joins the worker thread, if one was started.
    pub fn cleanup(&mut self) {
        crate::stop::stop_all();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Runs a time-sync server on `endpoint` until the process-wide stop flag is
/// set. Intended to be the entire body of a dedicated thread or the
/// `telebus-timesync` server subcommand.
pub fn run_server(endpoint: &Endpoint) {
    if let Err(err) = server::run(endpoint) {
        log::error!("[telebus/timesync] server exited: {err}");
    }
}
