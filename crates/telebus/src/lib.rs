// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # telebus
//!
//! Messaging and logging substrate for a multi-process real-time sensor
//! system: a thread-safe publish/subscribe bus over a datagram transport, a
//! time-synchronization client/server, and an on-disk recorder that persists
//! every observed message for later deterministic replay.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telebus::bus::Bus;
//! use telebus::message::Message;
//! use telebus::ring::RingBuffer;
//!
//! let bus = Bus::init();
//! let buffer = Arc::new(RingBuffer::new(64));
//! bus.subscribe("sensor/", buffer.clone());
//! bus.publish_frames("sensor/depth/0", 1, vec![b"payload".to_vec()], 0);
//!
//! if let Some(message) = buffer.read(true) {
//!     println!("received {} bytes on {}", message.frames.len(), message.topic);
//! }
//! bus.cleanup();
//! ```
//!
//! ## Modules
//!
//! - [`bus`] - pub/sub core: publisher/subscriber worker threads, topic routing
//! - [`ring`] - bounded SPSC queue used for subscriptions and worker request queues
//! - [`single_item`] - triple-buffered latest-value mailbox
//! - [`clock`] - monotonic process clock and logical process id
//! - [`stop`] - process-wide cooperative shutdown
//! - [`message`] - wire message header, frame builder, CBOR helpers
//! - [`cbor`] - generic CBOR encode/decode over `serde`
//! - [`config`] - endpoint grammar and JSON network configuration loader
//! - [`recorder`] - columnar on-disk recording format and writer
//! - [`timesync`] - UDP echo time-sync client/server
//! - [`error`] - typed error taxonomy shared across the crate

pub mod bus;
pub mod cbor;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod recorder;
pub mod ring;
pub mod single_item;
pub mod stop;
pub mod timesync;

pub use bus::Bus;
pub use clock::ProcessClock;
pub use config::{Endpoint, NetworkConfig};
pub use error::{ConfigurationError, DecodeError, PlaybackError, RecorderError, TransportError};
pub use message::{Message, MessageFrames, MessageHeader};
pub use ring::RingBuffer;
pub use single_item::SingleItem;

/// telebus crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
