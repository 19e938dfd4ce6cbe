// SPDX-License-Identifier: Apache-2.0 OR MIT

//! telebus-record - record bus traffic to a columnar log file.
//!
//! Usage:
//!   telebus-record --config-name sensor --dir ./captures
//!   telebus-record --config-name sensor --dir ./captures --name run_1.telebus
//!   telebus-record --config-name sensor --duration 60

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "telebus-record")]
#[command(about = "Record telebus traffic to a columnar log file")]
#[command(version)]
struct Args {
    /// Network config profile name (`<home>/.network_config/<name>.json`)
    #[arg(short, long)]
    config_name: Option<String>,

    /// System key within the config profile to bind/connect
    #[arg(long, default_value = "telebus")]
    system: String,

    /// Output directory (defaults to the home directory)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Output file name (defaults to a timestamped name)
    #[arg(short, long)]
    name: Option<String>,

    /// Duration to record, in seconds (0 = indefinite, stop with Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(filter).with_target(false).init();

    let bus = telebus::Bus::init();

    if let Some(profile) = &args.config_name {
        let config = telebus::config::load_network_config(profile)?;
        let endpoints = telebus::config::system(&config, profile, &args.system)?;
        if let Some(endpoint) = endpoints.bind_endpoint()? {
            bus.bind(endpoint);
        }
        if let Some(endpoint) = endpoints.connect_endpoint()? {
            bus.connect(endpoint);
        }
    }

    bus.enable_recording(args.dir.as_deref(), args.name.as_deref());
    info!("telebus-record v{}", env!("CARGO_PKG_VERSION"));
    info!("recording started, press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
        telebus::stop::stop_all();
    })?;

    let start = Instant::now();
    while running.load(Ordering::SeqCst) && !telebus::stop::should_stop_all() {
        if args.duration > 0 && start.elapsed() >= Duration::from_secs(args.duration) {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("stopping recorder");
    bus.disable_recording();
    bus.cleanup();
    Ok(())
}
