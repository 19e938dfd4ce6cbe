// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Replay a `telebus` recording: sequential real-time playback for the
//! `telebus-replay` CLI, plus a seek API (`advance_to`/`seek_to`) for a
//! scrubbable player that performs keyframe recovery on backward seeks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use telebus::bus::Bus;
use telebus::error::PlaybackError;
use telebus::recorder::{self, LogRow, RecorderMetadata};

/// How fast to advance the playback cursor relative to recorded time.
#[derive(Debug, Clone, Copy, Default)]
pub enum PlaybackSpeed {
    #[default]
    Realtime,
    Speed(f64),
    Unlimited,
}

impl PlaybackSpeed {
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Realtime => 1.0,
            Self::Speed(s) => *s,
            Self::Unlimited => f64::INFINITY,
        }
    }

    /// Real sleep duration for a recorded-time delta of `delta_us` microseconds.
    pub fn delay_for(&self, delta_us: u64) -> Option<Duration> {
        match self {
            Self::Unlimited => None,
            Self::Realtime => Some(Duration::from_micros(delta_us)),
            Self::Speed(s) if *s > 0.0 => Some(Duration::from_micros((delta_us as f64 / s) as u64)),
            Self::Speed(_) => None,
        }
    }
}

/// Recovery window: a keyframe older than this many microseconds before the
/// seek target is not considered a valid reference frame.
const KEYFRAME_RECOVERY_WINDOW_US: u64 = 5_000_000;

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub input_path: PathBuf,
    pub speed: PlaybackSpeed,
    pub loop_playback: bool,
}

impl PlayerConfig {
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            speed: PlaybackSpeed::Realtime,
            loop_playback: false,
        }
    }

    pub fn speed(mut self, speed: PlaybackSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub fn loop_playback(mut self, enable: bool) -> Self {
        self.loop_playback = enable;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    pub messages_played: u64,
    pub loops_completed: u32,
}

/// Reads a recording into memory and replays it, either sequentially in
/// real time (`run_realtime`) or under explicit cursor control
/// (`advance_to`/`seek_to`) for a scrubbable player.
pub struct Player {
    config: PlayerConfig,
    metadata: RecorderMetadata,
    rows: Vec<LogRow>,
    keyframe_topics: HashSet<String>,
    cursor_us: u64,
    stats: PlaybackStats,
}

impl Player {
    /// Loads the entire recording into memory and sorts rows by recorded
    /// time. Matches the recorder's own scope decision to keep playback
    /// in-memory rather than maintain a persisted seek index.
    pub fn open(config: PlayerConfig) -> Result<Self, PlaybackError> {
        let (metadata, mut rows) = recorder::read_all(&config.input_path)?;
        rows.sort_by_key(|r| r.this_process_time_us);
        let cursor_us = rows.first().map(|r| r.this_process_time_us.saturating_sub(1)).unwrap_or(0);
        Ok(Self {
            config,
            metadata,
            rows,
            keyframe_topics: HashSet::new(),
            cursor_us,
            stats: PlaybackStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.input_path
    }

    pub fn metadata(&self) -> &RecorderMetadata {
        &self.metadata
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    pub fn total_messages(&self) -> usize {
        self.rows.len()
    }

    /// Registers a topic whose streams are keyframed, so that a backward
    /// seek or large forward jump recovers from the nearest preceding
    /// keyframe rather than replaying from the beginning. An explicit,
    /// runtime-registered set rather than a hard-coded topic list.
    pub fn register_keyframe_topic(&mut self, topic: impl Into<String>) {
        self.keyframe_topics.insert(topic.into());
    }

    /// `(earliest, latest)` recorded timestamps, in `this_process_time_us`.
    pub fn time_bounds(&self) -> (u64, u64) {
        let min = self.rows.first().map(|r| r.this_process_time_us).unwrap_or(0);
        let max = self.rows.last().map(|r| r.this_process_time_us).unwrap_or(0);
        (min, max)
    }

    /// Normal forward tick: every row with `this_process_time_us` in
    /// `(prev_cursor, new_cursor]`, in ascending order. Returns nothing if
    /// `new_cursor_us` does not advance the cursor.
    pub fn advance_to(&mut self, new_cursor_us: u64) -> Vec<LogRow> {
        let prev = self.cursor_us;
        self.cursor_us = new_cursor_us;
        if new_cursor_us <= prev {
            return Vec::new();
        }
        self.rows
            .iter()
            .filter(|r| r.this_process_time_us > prev && r.this_process_time_us <= new_cursor_us)
            .cloned()
            .collect()
    }

    /// Backward seek or large forward jump: first clears `bus`'s publisher
    /// request queue, so any publish requests still pending from before the
    /// jump don't get flushed out with post-seek timing, then performs
    /// keyframe recovery. For each registered keyframe topic, recovery
    /// starts from the most recent keyframe at or before `new_cursor_us`
    /// (within the recovery window); topics with no keyframe registration
    /// simply resume from the seek target with no backfill. Rows for all
    /// topics between their respective recovery points and `new_cursor_us`
    /// are returned in ascending time order, keyframe rows first within a
    /// topic.
    pub fn seek_to(&mut self, bus: &Bus, new_cursor_us: u64) -> Vec<LogRow> {
        bus.clear_publisher_queue();
        self.cursor_us = new_cursor_us;

        let topics: HashSet<&str> = self.rows.iter().map(|r| r.topic.as_str()).collect();
        let mut out: Vec<LogRow> = Vec::new();

        for topic in topics {
            let recovery_start = if self.keyframe_topics.contains(topic) {
                self.rows
                    .iter()
                    .filter(|r| {
                        r.topic == topic
                            && r.is_keyframe()
                            && r.this_process_time_us <= new_cursor_us
                            && r.this_process_time_us + KEYFRAME_RECOVERY_WINDOW_US >= new_cursor_us
                    })
                    .max_by_key(|r| r.message_id)
                    .map(|r| r.this_process_time_us)
            } else {
                None
            };
            let start = recovery_start.unwrap_or(new_cursor_us);

            out.extend(
                self.rows
                    .iter()
                    .filter(|r| r.topic == topic && r.this_process_time_us >= start && r.this_process_time_us <= new_cursor_us)
                    .cloned(),
            );
        }

        out.sort_by_key(|r| r.this_process_time_us);
        out
    }

    /// Plays the whole recording sequentially in real time (scaled by
    /// `config.speed`), publishing each row verbatim through `bus`. Loops
    /// if `config.loop_playback` is set. Returns once playback completes, or
    /// as soon as `telebus::stop::should_stop_all()` becomes true.
    pub fn run_realtime(&mut self, bus: &Bus) {
        'playback: loop {
            let mut last_timestamp = self.rows.first().map(|r| r.this_process_time_us).unwrap_or(0);
            for row in &self.rows {
                if telebus::stop::should_stop_all() {
                    break 'playback;
                }
                if row.this_process_time_us > last_timestamp {
                    let delta = row.this_process_time_us - last_timestamp;
                    if let Some(delay) = self.config.speed.delay_for(delta) {
                        std::thread::sleep(delay);
                    }
                }
                last_timestamp = row.this_process_time_us;
                publish_row(bus, row);
                self.stats.messages_played += 1;
            }

            if !self.config.loop_playback {
                break;
            }
            self.stats.loops_completed += 1;
            tracing::debug!(loop_count = self.stats.loops_completed, "restarting playback");
        }
    }
}

fn publish_row(bus: &Bus, row: &LogRow) {
    let header = telebus::message::MessageHeader {
        sender_process_id: row.sender_process_id,
        sender_sequence_id: row.sender_sequence_id,
        sender_process_time_us: row.sender_process_time_us,
        protocol_version: row.protocol_version,
        message_version: row.message_version,
        flags: row.flags,
    };
    bus.publish_verbatim(row.topic.clone(), header, row.frames.clone());
}
