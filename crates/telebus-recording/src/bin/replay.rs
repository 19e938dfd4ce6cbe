// SPDX-License-Identifier: Apache-2.0 OR MIT

//! telebus-replay - replay a recorded columnar log through a bus.
//!
//! Usage:
//!   telebus-replay --input capture.telebus
//!   telebus-replay --input capture.telebus --speed 2.0
//!   telebus-replay --input capture.telebus --loop

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use telebus_recording::{PlaybackSpeed, Player, PlayerConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "telebus-replay")]
#[command(about = "Replay a recorded telebus log")]
#[command(version)]
struct Args {
    /// Input recording file (.telebus)
    #[arg(short, long)]
    input: PathBuf,

    /// Network config profile name (`<home>/.network_config/<name>.json`)
    #[arg(short, long)]
    config_name: Option<String>,

    /// System key within the config profile to bind/connect
    #[arg(long, default_value = "telebus")]
    system: String,

    /// Playback speed multiplier (1.0 = realtime, 0 = unlimited)
    #[arg(short, long, default_value = "1.0")]
    speed: f64,

    /// Loop playback indefinitely
    #[arg(short, long)]
    loop_playback: bool,

    /// Topics to treat as keyframed for backward-seek recovery (comma-separated)
    #[arg(long)]
    keyframe_topics: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Quiet mode (minimal output)
    #[arg(short, long)]
    quiet: bool,

    /// Show recording info and exit
    #[arg(long)]
    info_only: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(filter).with_target(false).init();

    if !args.input.exists() {
        anyhow::bail!("input file not found: {}", args.input.display());
    }

    let speed = if args.speed <= 0.0 {
        PlaybackSpeed::Unlimited
    } else if (args.speed - 1.0).abs() < 0.001 {
        PlaybackSpeed::Realtime
    } else {
        PlaybackSpeed::Speed(args.speed)
    };

    let config = PlayerConfig::new(&args.input).speed(speed).loop_playback(args.loop_playback);
    let mut player = Player::open(config)?;

    if let Some(pattern) = &args.keyframe_topics {
        for topic in pattern.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            player.register_keyframe_topic(topic.to_string());
        }
    }

    if !args.quiet || args.info_only {
        let (min, max) = player.time_bounds();
        info!("telebus-replay v{}", env!("CARGO_PKG_VERSION"));
        info!("input: {}", args.input.display());
        info!("recording process id: {}", player.metadata().this_process_id);
        info!("total messages: {}", player.total_messages());
        info!("time bounds: {min}us - {max}us ({:.1}s)", (max.saturating_sub(min)) as f64 / 1_000_000.0);
        info!("playback speed: {}", format_speed(speed));
        if args.loop_playback {
            info!("loop: enabled");
        }
    }

    if args.info_only {
        return Ok(());
    }

    // Adopt the recording's own process identity so replayed headers' sequence
    // space does not collide with a live publisher on the same bus.
    let clock = Arc::new(telebus::ProcessClock::with_process_id(player.metadata().this_process_id));
    let bus = telebus::Bus::init_with_clock(clock);

    if let Some(profile) = &args.config_name {
        let net_config = telebus::config::load_network_config(profile)?;
        let endpoints = telebus::config::system(&net_config, profile, &args.system)?;
        if let Some(endpoint) = endpoints.bind_endpoint()? {
            bus.bind(endpoint);
        }
        if let Some(endpoint) = endpoints.connect_endpoint()? {
            bus.connect(endpoint);
        }
    }

    if !args.quiet {
        info!("starting playback, press Ctrl+C to stop");
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
        telebus::stop::stop_all();
    })?;

    player.run_realtime(&bus);

    let stats = player.stats();
    if !args.quiet {
        info!("playback complete");
        info!("  messages played: {}", stats.messages_played);
        if stats.loops_completed > 0 {
            info!("  loops completed: {}", stats.loops_completed);
        }
    }

    bus.cleanup();
    Ok(())
}

fn format_speed(speed: PlaybackSpeed) -> String {
    match speed {
        PlaybackSpeed::Realtime => "1.0x (realtime)".to_string(),
        PlaybackSpeed::Speed(s) => format!("{s:.1}x"),
        PlaybackSpeed::Unlimited => "unlimited".to_string(),
    }
}
