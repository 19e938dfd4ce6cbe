// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end "recorder session" scenario: enable recording on a live bus,
//! publish a known stream, close everything down, then read the file back
//! and check every row survived the round trip.
//!
//! Both the publisher and the subscriber worker threads push a clone of
//! every message into the recorder ring when recording is enabled (see
//! `DESIGN.md`), and `Bus::init` always binds+connects the default
//! `inproc://pubsub` self-loop, so each published message is observed (and
//! recorded) twice even with no explicit `subscribe` call: once on the way
//! out of the publisher, once on the way back in to the subscriber.

use std::sync::Arc;
use std::time::Duration;

use telebus::recorder;
use telebus::{Bus, RingBuffer};
use tempfile::tempdir;

#[test]
fn recorder_session_round_trips_one_hundred_messages() {
    let dir = tempdir().unwrap();
    let bus = Bus::init();
    let buffer = Arc::new(RingBuffer::new(200));
    bus.subscribe("t", buffer.clone());
    std::thread::sleep(Duration::from_millis(50));

    bus.enable_recording(Some(dir.path()), Some("session.telebus"));
    std::thread::sleep(Duration::from_millis(20));

    for i in 0..100u64 {
        bus.publish_frames("t", 0, vec![i.to_le_bytes().to_vec()], 0);
    }
    for _ in 0..100 {
        buffer.read(true).expect("message should be delivered to the live subscriber");
    }
    std::thread::sleep(Duration::from_millis(100));

    bus.disable_recording();
    bus.cleanup();

    let path = dir.path().join("session.telebus");
    let (_metadata, mut rows) = recorder::read_all(&path).unwrap();
    // 200, not 100: the publisher-side and subscriber-side recording paths
    // each record their own copy of every message over the default
    // self-loop endpoint.
    assert_eq!(rows.len(), 200);

    rows.sort_by_key(|r| r.message_id);
    let mut counts = [0u32; 100];
    for row in &rows {
        assert_eq!(row.topic, "t");
        assert_eq!(row.frames.len(), 1);
        let decoded = u64::from_le_bytes(row.frames[0].clone().try_into().unwrap());
        counts[decoded as usize] += 1;
    }
    assert!(counts.iter().all(|&c| c == 2), "every payload should appear exactly twice");
}
