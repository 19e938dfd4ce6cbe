// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Subscriber worker thread: owns topic routing and sink delivery.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::transport::DatagramContext;
use crate::config::Endpoint;
use crate::error::TransportError;
use crate::message::{topic_matches, Message, MessageHeader};
use crate::ring::RingBuffer;
use crate::single_item::SingleItem;

/// Receive timeout between stop-flag checks, matching the 1 s the bus design
/// uses so the subscriber loop can keep polling the request queue and the
/// process-wide stop flag without blocking forever on an idle socket.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Destination for a delivered [`Message`]: a buffered queue, a latest-value
/// slot, or both (two separate subscriptions against the same prefix).
pub enum Sink {
    Buffer(Arc<RingBuffer<Message>>),
    Latest(Arc<SingleItem<Message>>),
}

impl Sink {
    fn deliver(&self, message: Message) {
        match self {
            Sink::Buffer(ring) => {
                if !ring.write(message) {
                    log::warn!("[telebus/subscriber] buffer full, dropping newest message");
                }
            }
            Sink::Latest(item) => item.write(message),
        }
    }
}

pub enum SubscriberRequest {
    Connect(Endpoint),
    Subscribe { prefix: String, sink: Sink },
}

struct Subscription {
    prefix: String,
    sink: Sink,
}

pub struct SubscriberState {
    pub context: Arc<DatagramContext>,
    pub requests: Arc<RingBuffer<SubscriberRequest>>,
    pub recorder_ring: Arc<RingBuffer<Message>>,
    pub recording_enabled: Arc<std::sync::atomic::AtomicBool>,
}

/// Subscriber worker main loop. Owns the subscription list exclusively; no
/// other thread ever touches it.
///
/// Exits once `state.requests` is stopped (via [`RingBuffer::stop`]), not on
/// the process-wide `stop::should_stop_all` flag: that flag never resets for
/// the life of the process (see `stop.rs`), so a `Bus` instance built after
/// some earlier, unrelated `Bus` called `cleanup` would otherwise see it
/// already tripped and exit before ever processing a `Subscribe`/`Connect`
/// request. Mirrors `publisher::run`'s `requests.read(true)` exit.
pub fn run(state: Arc<SubscriberState>) {
    let mut subscriptions: Vec<Subscription> = Vec::new();

    while !state.requests.is_stopped() {
        while let Some(request) = state.requests.read(false) {
            match request {
                SubscriberRequest::Connect(endpoint) => {
                    if let Err(err) = state.context.connect(&endpoint) {
                        log::error!("[telebus/subscriber] connect failed: {err}");
                    }
                }
                SubscriberRequest::Subscribe { prefix, sink } => {
                    subscriptions.push(Subscription { prefix, sink });
                }
            }
        }

        match state.context.recv_multipart(RECV_TIMEOUT) {
            Ok(Some(parts)) => handle_datagram(&state, &subscriptions, parts),
            Ok(None) => continue,
            Err(TransportError::Shutdown) => break,
            Err(err) => {
                log::error!("[telebus/subscriber] recv failed: {err}");
            }
        }
    }
    log::debug!("[telebus/subscriber] worker stopped");
}

fn handle_datagram(state: &SubscriberState, subscriptions: &[Subscription], parts: Vec<Vec<u8>>) {
    if parts.len() < 2 {
        log::warn!("[telebus/subscriber] datagram with fewer than 2 frames, discarding");
        return;
    }
    let topic = match String::from_utf8(parts[0].clone()) {
        Ok(topic) => topic,
        Err(_) => {
            log::warn!("[telebus/subscriber] topic frame is not valid UTF-8, discarding");
            return;
        }
    };
    let header = match MessageHeader::from_wire_bytes(&parts[1]) {
        Ok(header) => header,
        Err(err) => {
            log::error!("[telebus/subscriber] header decode failed on topic '{topic}': {err}");
            return;
        }
    };
    let frames: Vec<Vec<u8>> = parts[2..].to_vec();

    for subscription in subscriptions {
        if topic_matches(&subscription.prefix, &topic) {
            subscription
                .sink
                .deliver(Message::new(topic.clone(), header, frames.clone()));
        }
    }

    if state.recording_enabled.load(Ordering::Acquire) {
        let message = Message::new(topic, header, frames);
        if !state.recorder_ring.write(message) {
            log::warn!("[telebus/subscriber] recorder ring full, dropping message");
        }
    }
}
