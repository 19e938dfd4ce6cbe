// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pub/sub core: topic-prefix routing over a datagram transport, with one
//! publisher thread, one subscriber thread, and one recorder thread sharing
//! a process-wide [`Bus`] handle.
//!
//! Grounded on the teacher's `Hub`/`Subscriber` broadcast pattern
//! (mutex-guarded subscriber list, lossy-on-full delivery) generalized from
//! an in-process event broadcaster to a networked multi-frame pub/sub bus.
//! Sinks are held as `Arc`-owned, reference-counted handles rather than
//! borrowed pointers, so subscribers do not need to outlive the bus by
//! convention alone.

pub mod publisher;
pub mod subscriber;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::clock::ProcessClock;
use crate::config::{Endpoint, DEFAULT_INPROC_ENDPOINT};
use crate::message::{Message, MessageHeader};
use crate::recorder::Recorder;
use crate::ring::RingBuffer;
use crate::single_item::SingleItem;
use crate::stop;

use publisher::{PublisherRequest, PublisherState};
use subscriber::{Sink, SubscriberRequest, SubscriberState};
use transport::DatagramContext;

const PUBLISHER_QUEUE_DEPTH: usize = 1024;
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;
const RECORDER_QUEUE_DEPTH: usize = 4096;

/// Fatal internal-invariant violation: double-init, use-before-init, or
/// cleanup called on a bus that was never started. Per the error design,
/// these abort the process rather than return a typed error.
fn fatal_contract(message: &str) -> ! {
    panic!("telebus FatalContract violation: {message}");
}

struct Workers {
    publisher_state: Arc<PublisherState>,
    publisher_thread: Option<JoinHandle<()>>,
    subscriber_requests: Arc<RingBuffer<SubscriberRequest>>,
    subscriber_thread: Option<JoinHandle<()>>,
    recorder_ring: Arc<RingBuffer<Message>>,
    recorder_thread: Option<JoinHandle<()>>,
}

/// Process-wide pub/sub handle. Construct with [`Bus::init`]; every other
/// method panics (a `FatalContract` violation) if called before `init` or
/// after `cleanup`.
pub struct Bus {
    context: Arc<DatagramContext>,
    clock: Arc<ProcessClock>,
    recording_enabled: Arc<AtomicBool>,
    recorder: Arc<Mutex<Option<Recorder>>>,
    workers: Mutex<Option<Workers>>,
}

impl Bus {
    /// Start the publisher, subscriber, and recorder worker threads, and
    /// bind+connect the default in-process endpoint so a lone process can
    /// publish and subscribe to itself without any configuration.
    pub fn init() -> Arc<Self> {
        Self::init_with_clock(Arc::new(ProcessClock::new()))
    }

    /// Like [`Bus::init`], but with a caller-supplied clock. Playback uses
    /// this to re-adopt a recorded process's identity.
    pub fn init_with_clock(clock: Arc<ProcessClock>) -> Arc<Self> {
        let context = Arc::new(DatagramContext::new());
        let recording_enabled = Arc::new(AtomicBool::new(false));
        let recorder_ring = Arc::new(RingBuffer::new(RECORDER_QUEUE_DEPTH));
        let recorder: Arc<Mutex<Option<Recorder>>> = Arc::new(Mutex::new(None));

        let publisher_requests = Arc::new(RingBuffer::new(PUBLISHER_QUEUE_DEPTH));
        let publisher_state = Arc::new(PublisherState::new(
            context.clone(),
            clock.clone(),
            publisher_requests.clone(),
            recorder_ring.clone(),
            recording_enabled.clone(),
        ));
        let publisher_thread = {
            let state = publisher_state.clone();
            std::thread::Builder::new()
                .name("telebus-publisher".into())
                .spawn(move || publisher::run(state))
                .expect("failed to spawn publisher thread")
        };

        let subscriber_requests = Arc::new(RingBuffer::new(SUBSCRIBER_QUEUE_DEPTH));
        let subscriber_state = Arc::new(SubscriberState {
            context: context.clone(),
            requests: subscriber_requests.clone(),
            recorder_ring: recorder_ring.clone(),
            recording_enabled: recording_enabled.clone(),
        });
        let subscriber_thread = {
            let state = subscriber_state.clone();
            std::thread::Builder::new()
                .name("telebus-subscriber".into())
                .spawn(move || subscriber::run(state))
                .expect("failed to spawn subscriber thread")
        };

        let recorder_thread = {
            let recorder_ring = recorder_ring.clone();
            let recorder = recorder.clone();
            std::thread::Builder::new()
                .name("telebus-recorder".into())
                .spawn(move || run_recorder(recorder_ring, recorder))
                .expect("failed to spawn recorder thread")
        };

        let bus = Arc::new(Self {
            context,
            clock,
            recording_enabled,
            recorder,
            workers: Mutex::new(Some(Workers {
                publisher_state: publisher_state.clone(),
                publisher_thread: Some(publisher_thread),
                subscriber_requests: subscriber_requests.clone(),
                subscriber_thread: Some(subscriber_thread),
                recorder_ring,
                recorder_thread: Some(recorder_thread),
            })),
        });

        let default_endpoint: Endpoint = DEFAULT_INPROC_ENDPOINT
            .parse()
            .expect("DEFAULT_INPROC_ENDPOINT must parse");
        bus.bind(default_endpoint.clone());
        bus.connect(default_endpoint);

        bus
    }

    fn publisher_requests(&self) -> Arc<RingBuffer<PublisherRequest>> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        match workers.as_ref() {
            Some(w) => w.publisher_state.requests.clone(),
            None => fatal_contract("publish requested before init or after cleanup"),
        }
    }

    fn subscriber_requests(&self) -> Arc<RingBuffer<SubscriberRequest>> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        match workers.as_ref() {
            Some(w) => w.subscriber_requests.clone(),
            None => fatal_contract("subscribe requested before init or after cleanup"),
        }
    }

    /// Request the publisher worker to bind its side of the shared datagram
    /// context to `endpoint`.
    pub fn bind(&self, endpoint: Endpoint) {
        let requests = self.publisher_requests();
        if !requests.write(PublisherRequest::Bind(endpoint)) {
            log::warn!("[telebus/bus] publisher request ring full, dropping bind request");
        }
    }

    /// Drop every publish request still queued but not yet sent. Playback
    /// calls this before keyframe recovery on a backward seek or large
    /// forward jump, so requests queued against the pre-seek timeline don't
    /// get flushed out after the jump lands.
    pub fn clear_publisher_queue(&self) {
        self.publisher_requests().clear();
    }

    /// Number of publish requests currently queued but not yet sent.
    pub fn publisher_queue_len(&self) -> usize {
        self.publisher_requests().num_slots_filled()
    }

    /// Request the subscriber worker to connect its side of the shared
    /// datagram context to `endpoint`.
    pub fn connect(&self, endpoint: Endpoint) {
        let requests = self.subscriber_requests();
        if !requests.write(SubscriberRequest::Connect(endpoint)) {
            log::warn!("[telebus/bus] subscriber request ring full, dropping connect request");
        }
    }

    /// Publish a message, stamping a fresh header.
    pub fn publish_frames(&self, topic: impl Into<String>, message_version: u16, frames: Vec<Vec<u8>>, flags: u16) {
        let requests = self.publisher_requests();
        let request = PublisherRequest::Publish {
            topic: topic.into(),
            message_version,
            flags,
            frames,
        };
        if !requests.write(request) {
            log::warn!("[telebus/bus] publisher ring full, dropping publish request");
        }
    }

    /// Publish a message with a caller-provided header, bypassing
    /// sequence-stamping. Used by playback to re-inject recorded messages
    /// with their original headers intact.
    pub fn publish_verbatim(&self, topic: impl Into<String>, header: MessageHeader, frames: Vec<Vec<u8>>) {
        let requests = self.publisher_requests();
        let request = PublisherRequest::PublishVerbatim {
            topic: topic.into(),
            header,
            frames,
        };
        if !requests.write(request) {
            log::warn!("[telebus/bus] publisher ring full, dropping verbatim publish request");
        }
    }

    /// Receive every message whose topic starts with `prefix` into `buffer`.
    pub fn subscribe(&self, prefix: impl Into<String>, buffer: Arc<RingBuffer<Message>>) {
        let requests = self.subscriber_requests();
        let request = SubscriberRequest::Subscribe {
            prefix: prefix.into(),
            sink: Sink::Buffer(buffer),
        };
        if !requests.write(request) {
            log::warn!("[telebus/bus] subscriber request ring full, dropping subscribe request");
        }
    }

    /// Receive only the most recent message whose topic starts with `prefix`
    /// into `item`.
    pub fn subscribe_latest(&self, prefix: impl Into<String>, item: Arc<SingleItem<Message>>) {
        let requests = self.subscriber_requests();
        let request = SubscriberRequest::Subscribe {
            prefix: prefix.into(),
            sink: Sink::Latest(item),
        };
        if !requests.write(request) {
            log::warn!("[telebus/bus] subscriber request ring full, dropping subscribe request");
        }
    }

    /// Open a recording file and start forwarding every delivered message to
    /// it. `dir` defaults to the home directory and `name` to a timestamped
    /// file name when not given.
    pub fn enable_recording(&self, dir: Option<&std::path::Path>, name: Option<&str>) {
        let default_dir = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let dir = dir.unwrap_or(&default_dir);
        let owned_name;
        let name = match name {
            Some(n) => n,
            None => {
                owned_name = crate::recorder::default_file_name(&self.clock);
                &owned_name
            }
        };

        match Recorder::create(dir, name, &self.clock) {
            Ok(recorder) => {
                *self.recorder.lock().unwrap_or_else(|e| e.into_inner()) = Some(recorder);
                self.recording_enabled.store(true, Ordering::Release);
            }
            Err(err) => {
                log::error!("[telebus/bus] failed to open recording file: {err}");
            }
        }
    }

    /// Stop forwarding messages to the recorder, finalize the trailing index,
    /// and close the file.
    pub fn disable_recording(&self) {
        self.recording_enabled.store(false, Ordering::Release);
        let mut guard = self.recorder.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut recorder) = guard.take() {
            if let Err(err) = recorder.finalize() {
                log::error!("[telebus/bus] failed to finalize recording file: {err}");
            }
        }
    }

    /// Shut everything down: stop flag, datagram context, and all three
    /// worker threads, joined. Idempotent.
    pub fn cleanup(&self) {
        stop::stop_all();
        self.context.shutdown();

        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut w) = workers.take() {
            w.publisher_state.requests.stop();
            w.subscriber_requests.stop();
            w.recorder_ring.stop();
            if let Some(handle) = w.publisher_thread.take() {
                let _ = handle.join();
            }
            if let Some(handle) = w.subscriber_thread.take() {
                let _ = handle.join();
            }
            if let Some(handle) = w.recorder_thread.take() {
                let _ = handle.join();
            }
        }
        self.disable_recording();
    }
}

fn run_recorder(recorder_ring: Arc<RingBuffer<Message>>, recorder: Arc<Mutex<Option<Recorder>>>) {
    let clock = ProcessClock::new();
    while let Some(message) = recorder_ring.read(true) {
        let mut guard = recorder.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rec) = guard.as_mut() {
            if let Err(err) = rec.append(&message, clock.process_time_us()) {
                // Appender errors are fatal: the log file must never be
                // silently truncated.
                panic!("telebus recorder I/O failure: {err}");
            }
        }
    }
    log::debug!("[telebus/recorder] worker stopped");
}
