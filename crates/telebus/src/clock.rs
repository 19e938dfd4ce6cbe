// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic process clock and the 64-bit logical process identifier.
//!
//! Every process participating in the bus gets one [`ProcessClock`], created
//! once at startup. Its `process_id` is normally random, but playback forces
//! it to a recorded value so replayed messages appear to originate from the
//! process that was actually recorded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::RngCore;

/// Monotonic clock anchored to process start, plus a logical process id.
#[derive(Debug)]
pub struct ProcessClock {
    start: Instant,
    process_id: AtomicU64,
}

impl ProcessClock {
    /// Create a clock with a freshly randomized process id.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            process_id: AtomicU64::new(random_process_id()),
        }
    }

    /// Create a clock whose process id is pinned to a recorded value.
    ///
    /// Used by playback to re-adopt the identity of the process that was
    /// originally recorded, so replayed headers read as if freshly sent by it.
    pub fn with_process_id(process_id: u64) -> Self {
        Self {
            start: Instant::now(),
            process_id: AtomicU64::new(process_id),
        }
    }

    /// Microseconds elapsed since this clock's process start.
    pub fn process_time_us(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Milliseconds elapsed since this clock's process start.
    pub fn process_time_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Wall-clock milliseconds since the Unix epoch.
    pub fn system_time_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// This process's logical 64-bit identifier.
    pub fn process_id(&self) -> u64 {
        self.process_id.load(Ordering::Relaxed)
    }

    /// Override the process id (playback re-adoption).
    pub fn set_process_id(&self, process_id: u64) {
        self.process_id.store(process_id, Ordering::Relaxed);
    }
}

impl Default for ProcessClock {
    fn default() -> Self {
        Self::new()
    }
}

fn random_process_id() -> u64 {
    rand::thread_rng().next_u64()
}
