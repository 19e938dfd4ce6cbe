// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end "bus echo" scenario: publish three messages on three topics
//! through the default in-process loopback and read them back in order.

use std::sync::Arc;
use std::time::Duration;

use telebus::{Bus, RingBuffer};

#[test]
fn bus_echo_round_trip() {
    let bus = Bus::init();
    let buffer = Arc::new(RingBuffer::new(4));
    bus.subscribe("", buffer.clone());
    std::thread::sleep(Duration::from_millis(50));

    bus.publish_frames("x", 0, vec![b"A".to_vec()], 0);
    bus.publish_frames("y/1", 0, vec![b"B".to_vec()], 0);
    bus.publish_frames("y/2", 0, vec![b"C".to_vec()], 0);

    let expected = [("x", b"A".to_vec(), 0u64), ("y/1", b"B".to_vec(), 1), ("y/2", b"C".to_vec(), 2)];
    for (topic, payload, seq) in expected {
        let message = buffer.read(true).expect("message should arrive");
        assert_eq!(message.topic, topic);
        assert_eq!(message.frames, vec![payload]);
        assert_eq!(message.header.sender_sequence_id, seq);
    }

    bus.cleanup();
}
