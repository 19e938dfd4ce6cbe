// SPDX-License-Identifier: Apache-2.0 OR MIT

//! telebus-timesync - run a time-sync server or client from the command line.
//!
//! Usage:
//!   telebus-timesync server --bind udp://0.0.0.0:7000
//!   telebus-timesync client --server udp://127.0.0.1:7000

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use telebus::timesync::{TimeSync, TimeSyncOptions};
use telebus::Endpoint;

#[derive(Parser, Debug)]
#[command(name = "telebus-timesync")]
#[command(about = "Run a telebus time-sync server or client")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the stateless UDP echo server
    Server {
        /// Endpoint to bind, e.g. udp://0.0.0.0:7000
        #[arg(short, long)]
        bind: Endpoint,
    },
    /// Run the client and print the estimated offset periodically
    Client {
        /// Server endpoint to contact, e.g. udp://127.0.0.1:7000
        #[arg(short, long)]
        server: Endpoint,

        /// Burst size per loop iteration
        #[arg(long, default_value_t = telebus::timesync::client::DEFAULT_BLAST_SIZE)]
        blast_size: usize,

        /// Sliding sample window, in milliseconds
        #[arg(long, default_value_t = telebus::timesync::client::DEFAULT_WINDOW.as_millis() as u64)]
        window_ms: u64,

        /// How often to print the current estimate, in milliseconds
        #[arg(long, default_value = "1000")]
        report_ms: u64,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
        telebus::stop::stop_all();
    })?;

    match args.mode {
        Mode::Server { bind } => run_server(bind, running),
        Mode::Client {
            server,
            blast_size,
            window_ms,
            report_ms,
        } => run_client(server, blast_size, window_ms, report_ms, running),
    }
}

fn run_server(bind: Endpoint, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    log::info!("telebus-timesync server listening on {bind}");
    let thread = std::thread::spawn(move || telebus::timesync::run_server(&bind));
    while running.load(Ordering::SeqCst) && !telebus::stop::should_stop_all() {
        std::thread::sleep(Duration::from_millis(100));
    }
    telebus::stop::stop_all();
    let _ = thread.join();
    Ok(())
}

fn run_client(server: Endpoint, blast_size: usize, window_ms: u64, report_ms: u64, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let options = TimeSyncOptions {
        window: Duration::from_millis(window_ms),
        blast_size,
    };
    log::info!("telebus-timesync client contacting {server}");
    let mut timesync = TimeSync::init(server, options);

    while running.load(Ordering::SeqCst) && !telebus::stop::should_stop_all() {
        std::thread::sleep(Duration::from_millis(report_ms));
        println!(
            "offset_us={} server_timestamp_us={}",
            timesync.estimate_offset_us(),
            timesync.estimate_time_server_timestamp_us()
        );
    }

    timesync.cleanup();
    Ok(())
}
