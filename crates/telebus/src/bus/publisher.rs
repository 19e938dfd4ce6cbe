// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Publisher worker thread: drains publish requests, stamps headers, sends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bus::transport::DatagramContext;
use crate::clock::ProcessClock;
use crate::config::Endpoint;
use crate::message::{Message, MessageHeader};
use crate::ring::RingBuffer;

/// One request enqueued by `publish_frames`/`publish_verbatim`/`bind`.
///
/// The original carries an optional `bind_address` folded into one struct;
/// here a bind request and a publish request are distinct variants, which
/// rules out the "topic must be empty when bind_address is set" invariant
/// by construction instead of by convention.
pub enum PublisherRequest {
    Bind(Endpoint),
    Publish {
        topic: String,
        message_version: u16,
        flags: u16,
        frames: Vec<Vec<u8>>,
    },
    /// Ships a caller-provided header verbatim, bypassing sequence-stamping.
    /// Used exclusively by playback to re-publish recorded messages with
    /// their original headers intact.
    PublishVerbatim {
        topic: String,
        header: MessageHeader,
        frames: Vec<Vec<u8>>,
    },
}

pub struct PublisherState {
    pub context: Arc<DatagramContext>,
    pub clock: Arc<ProcessClock>,
    pub requests: Arc<RingBuffer<PublisherRequest>>,
    pub recorder_ring: Arc<RingBuffer<Message>>,
    pub recording_enabled: Arc<std::sync::atomic::AtomicBool>,
    pub sequence: AtomicU64,
}

impl PublisherState {
    pub fn new(
        context: Arc<DatagramContext>,
        clock: Arc<ProcessClock>,
        requests: Arc<RingBuffer<PublisherRequest>>,
        recorder_ring: Arc<RingBuffer<Message>>,
        recording_enabled: Arc<std::sync::atomic::AtomicBool>,
    ) -> Self {
        Self {
            context,
            clock,
            requests,
            recorder_ring,
            recording_enabled,
            sequence: AtomicU64::new(0),
        }
    }
}

/// Publisher worker main loop. Exits once `requests.read(true)` returns
/// `None`, which happens after `requests.stop()` drains any waiter.
pub fn run(state: Arc<PublisherState>) {
    while let Some(request) = state.requests.read(true) {
        match request {
            PublisherRequest::Bind(endpoint) => {
                if let Err(err) = state.context.bind(&endpoint) {
                    log::error!("[telebus/publisher] bind failed: {err}");
                }
            }
            PublisherRequest::Publish {
                topic,
                message_version,
                flags,
                frames,
            } => {
                let sequence_id = state.sequence.fetch_add(1, Ordering::Relaxed);
                let header = MessageHeader {
                    sender_process_id: state.clock.process_id(),
                    sender_sequence_id: sequence_id,
                    sender_process_time_us: state.clock.process_time_us(),
                    protocol_version: MessageHeader::CURRENT_PROTOCOL_VERSION,
                    message_version,
                    flags,
                };
                send_and_maybe_record(&state, topic, header, frames);
            }
            PublisherRequest::PublishVerbatim { topic, header, frames } => {
                send_and_maybe_record(&state, topic, header, frames);
            }
        }
    }
    log::debug!("[telebus/publisher] worker stopped");
}

fn send_and_maybe_record(state: &PublisherState, topic: String, header: MessageHeader, frames: Vec<Vec<u8>>) {
    let header_bytes = header.to_wire_bytes();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(2 + frames.len());
    parts.push(topic.as_bytes());
    parts.push(&header_bytes);
    for frame in &frames {
        parts.push(frame);
    }

    if let Err(err) = state.context.send_multipart(&parts) {
        log::warn!("[telebus/publisher] send failed for topic '{topic}': {err}");
        return;
    }

    if state.recording_enabled.load(Ordering::Acquire) {
        let message = Message::new(topic, header, frames);
        if !state.recorder_ring.write(message) {
            log::warn!("[telebus/publisher] recorder ring full, dropping message");
        }
    }
}
