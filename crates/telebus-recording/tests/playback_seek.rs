// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end "playback with seek" scenario: record a keyframed two-topic
//! stream, open it for playback, seek to t=7.0s, and check that the first
//! re-published row per topic is a keyframe at or before the seek target,
//! with every row interleaved in ascending recorded time up to the cursor.

use std::sync::Arc;
use std::time::Duration;

use telebus::clock::ProcessClock;
use telebus::message::{Message, MessageHeader, KEYFRAME_FLAG};
use telebus::recorder::Recorder;
use telebus::{Bus, RingBuffer};
use telebus_recording::{Player, PlayerConfig};
use tempfile::tempdir;

fn row_message(seq: u64, time_us: u64, keyframe: bool) -> Message {
    Message::new(
        "ignored",
        MessageHeader {
            sender_process_id: 7,
            sender_sequence_id: seq,
            sender_process_time_us: time_us,
            protocol_version: 0,
            message_version: 0,
            flags: if keyframe { KEYFRAME_FLAG } else { 0 },
        },
        vec![seq.to_le_bytes().to_vec()],
    )
}

fn write_keyframed_stream(dir: &std::path::Path) -> std::path::PathBuf {
    let clock = ProcessClock::with_process_id(7);
    let mut recorder = Recorder::create(dir, "seek_fixture.telebus", &clock).unwrap();

    for topic in ["v/d/1", "v/c/1"] {
        for frame in 0..100u64 {
            let time_us = frame * 100_000; // 10s of stream at 100ms steps
            let is_keyframe = frame % 10 == 0;
            let mut message = row_message(frame, time_us, is_keyframe);
            message.topic = topic.to_string();
            recorder.append(&message, time_us).unwrap();
        }
    }

    let path = recorder.path().to_path_buf();
    drop(recorder);
    path
}

#[test]
fn seek_to_seven_seconds_recovers_from_nearest_keyframe_per_topic() {
    let dir = tempdir().unwrap();
    let path = write_keyframed_stream(dir.path());

    let mut player = Player::open(PlayerConfig::new(&path)).unwrap();
    player.register_keyframe_topic("v/d/1");
    player.register_keyframe_topic("v/c/1");

    // Live bus used both to exercise seek_to's publisher-queue clearing and,
    // below, to republish the recovered rows through a subscriber.
    let bus = Bus::init();

    // Stale requests queued before the seek should not survive it.
    for i in 0..32u64 {
        bus.publish_frames("stale/topic", 0, vec![i.to_le_bytes().to_vec()], 0);
    }
    let recovered = player.seek_to(&bus, 7_000_000);
    assert_eq!(bus.publisher_queue_len(), 0, "seek should clear stale pending publisher requests");
    assert!(!recovered.is_empty());

    for topic in ["v/d/1", "v/c/1"] {
        let mut topic_rows: Vec<_> = recovered.iter().filter(|r| r.topic == topic).collect();
        topic_rows.sort_by_key(|r| r.this_process_time_us);
        let first = topic_rows.first().expect("topic should have recovered rows");
        assert!(first.is_keyframe(), "first replayed row per topic should be a keyframe");
        assert!(first.this_process_time_us <= 7_000_000);
        assert!(topic_rows.last().unwrap().this_process_time_us <= 7_000_000);
    }

    // Republish the recovered rows and confirm a subscriber observes the
    // same keyframe-first, ascending-time behavior.
    let buffer = Arc::new(RingBuffer::new(recovered.len()));
    bus.subscribe("v/", buffer.clone());
    std::thread::sleep(Duration::from_millis(50));

    let mut ordered = recovered.clone();
    ordered.sort_by_key(|r| r.this_process_time_us);
    for row in &ordered {
        let header = MessageHeader {
            sender_process_id: row.sender_process_id,
            sender_sequence_id: row.sender_sequence_id,
            sender_process_time_us: row.sender_process_time_us,
            protocol_version: row.protocol_version,
            message_version: row.message_version,
            flags: row.flags,
        };
        bus.publish_verbatim(row.topic.clone(), header, row.frames.clone());
    }

    let mut last_time = 0u64;
    for _ in 0..ordered.len() {
        let message = buffer.read(true).unwrap();
        assert!(message.header.sender_process_time_us >= last_time);
        last_time = message.header.sender_process_time_us;
    }

    bus.cleanup();
}
