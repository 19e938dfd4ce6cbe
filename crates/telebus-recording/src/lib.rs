// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # telebus-recording
//!
//! Replay tooling for `telebus` recordings. The recorder itself lives in
//! [`telebus::recorder`], owned by the `Bus`'s own recorder worker thread;
//! this crate is the consumer side: a [`player::Player`] that reads a
//! recording back and re-publishes it through a `Bus` with backward-seek
//! keyframe recovery, plus the `telebus-record`/`telebus-replay` CLI
//! front-ends under `src/bin/`.
//!
//! # Quick start
//!
//! ```bash
//! telebus-record --config-name sensor --dir ./captures
//! telebus-replay --config-name sensor --input ./captures/12345_9876.telebus
//! ```

pub mod player;

pub use player::{PlaybackSpeed, Player, PlayerConfig};
