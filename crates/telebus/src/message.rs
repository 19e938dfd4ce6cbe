// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire message model: header, topic, frames.
//!
//! A [`Message`] is a topic string plus a [`MessageHeader`] plus an ordered
//! list of opaque frames. On the wire these travel as separate parts of one
//! multi-part datagram (see [`crate::bus::transport`]); in memory,
//! [`MessageFrames`] accumulates the frame list before it is handed to the
//! publisher.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::DecodeError;

/// Bit 0 of [`MessageHeader::flags`]: this message is a keyframe a stateful
/// decoder can resynchronize from.
pub const KEYFRAME_FLAG: u16 = 1 << 0;

/// Exact on-wire size of [`MessageHeader`] in bytes.
pub const HEADER_WIRE_SIZE: usize = 8 + 8 + 8 + 2 + 2 + 2;

/// Fixed-layout header stamped by the publisher at send time.
///
/// Byte layout is append-only across versions: new fields may only be added
/// at the end, so `from_wire_bytes` only ever needs `bytes.len() >=
/// HEADER_WIRE_SIZE` to stay forward-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub sender_process_id: u64,
    pub sender_sequence_id: u64,
    pub sender_process_time_us: u64,
    pub protocol_version: u16,
    pub message_version: u16,
    pub flags: u16,
}

impl MessageHeader {
    pub const CURRENT_PROTOCOL_VERSION: u16 = 0;

    pub fn is_keyframe(&self) -> bool {
        self.flags & KEYFRAME_FLAG != 0
    }

    /// Pack into the little-endian wire representation.
    pub fn to_wire_bytes(&self) -> [u8; HEADER_WIRE_SIZE] {
        let mut buf = [0u8; HEADER_WIRE_SIZE];
        {
            let mut w: &mut [u8] = &mut buf;
            w.write_u64::<LittleEndian>(self.sender_process_id).unwrap();
            w.write_u64::<LittleEndian>(self.sender_sequence_id).unwrap();
            w.write_u64::<LittleEndian>(self.sender_process_time_us).unwrap();
            w.write_u16::<LittleEndian>(self.protocol_version).unwrap();
            w.write_u16::<LittleEndian>(self.message_version).unwrap();
            w.write_u16::<LittleEndian>(self.flags).unwrap();
        }
        buf
    }

    /// Unpack from wire bytes. The receiver only requires `bytes.len() >=
    /// HEADER_WIRE_SIZE`; trailing bytes (from a future, larger header) are
    /// ignored, preserving forward compatibility.
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_WIRE_SIZE {
            return Err(DecodeError::HeaderSize {
                expected: HEADER_WIRE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut r = bytes;
        Ok(Self {
            sender_process_id: r.read_u64::<LittleEndian>().unwrap(),
            sender_sequence_id: r.read_u64::<LittleEndian>().unwrap(),
            sender_process_time_us: r.read_u64::<LittleEndian>().unwrap(),
            protocol_version: r.read_u16::<LittleEndian>().unwrap(),
            message_version: r.read_u16::<LittleEndian>().unwrap(),
            flags: r.read_u16::<LittleEndian>().unwrap(),
        })
    }
}

/// A topic, its stamped header, and an ordered list of opaque frames.
///
/// Zero frames is legal (a topic-only publish). By convention the header is
/// logically frame 0 on the wire, but callers work with it as a separate
/// field; [`Self::frames`] holds only the application frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub header: MessageHeader,
    pub frames: Vec<Vec<u8>>,
}

impl Message {
    pub fn new(topic: impl Into<String>, header: MessageHeader, frames: Vec<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            header,
            frames,
        }
    }
}

/// Whether `prefix` matches `topic` under bus subscription rules: `prefix`
/// must be a string-prefix of `topic`. The empty prefix matches every topic.
pub fn topic_matches(prefix: &str, topic: &str) -> bool {
    topic.starts_with(prefix)
}

/// Builder for the outgoing application frame list.
///
/// Supports appending a trivially-copyable value by byte reinterpretation,
/// a CBOR-serialized value, or a borrowed byte span whose ownership
/// transfers to the frame list.
#[derive(Debug, Default, Clone)]
pub struct MessageFrames {
    frames: Vec<Vec<u8>>,
}

impl MessageFrames {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Append a `Copy` value's raw little-endian byte representation as a
    /// frame. `T` must have no padding that would make the reinterpretation
    /// ambiguous across platforms; intended for plain numeric types and
    /// `#[repr(C)]` structs of such types.
    pub fn push_pod<T: Copy>(mut self, value: T) -> Self {
        let size = std::mem::size_of::<T>();
        let mut bytes = vec![0u8; size];
        // SAFETY: `value` is `Copy` and `bytes` has exactly `size_of::<T>()`
        // bytes reserved; this mirrors the reinterpret-cast the wire format
        // has always used for trivially-copyable application payloads.
        unsafe {
            std::ptr::copy_nonoverlapping(
                &value as *const T as *const u8,
                bytes.as_mut_ptr(),
                size,
            );
        }
        self.frames.push(bytes);
        self
    }

    /// Append a CBOR-serialized value as a frame.
    pub fn push_cbor<T: serde::Serialize>(mut self, value: &T) -> Result<Self, DecodeError> {
        let bytes = serde_cbor::to_vec(value)?;
        self.frames.push(bytes);
        Ok(self)
    }

    /// Append a raw byte span, taking ownership.
    pub fn push_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.frames.push(bytes.into());
        self
    }

    pub fn build(self) -> Vec<Vec<u8>> {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> MessageHeader {
        MessageHeader {
            sender_process_id: 0x1122_3344_5566_7788,
            sender_sequence_id: 42,
            sender_process_time_us: 123_456_789,
            protocol_version: 0,
            message_version: 7,
            flags: KEYFRAME_FLAG,
        }
    }

    #[test]
    fn header_round_trips_through_wire_bytes() {
        let header = sample_header();
        let bytes = header.to_wire_bytes();
        assert_eq!(bytes.len(), HEADER_WIRE_SIZE);
        let decoded = MessageHeader::from_wire_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_keyframe());
    }

    #[test]
    fn header_rejects_short_buffer() {
        let err = MessageHeader::from_wire_bytes(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, DecodeError::HeaderSize { .. }));
    }

    #[test]
    fn header_tolerates_trailing_bytes() {
        let header = sample_header();
        let mut bytes = header.to_wire_bytes().to_vec();
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let decoded = MessageHeader::from_wire_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn prefix_matching() {
        assert!(topic_matches("sensor/", "sensor/depth/42"));
        assert!(topic_matches("sensor/", "sensor/color/42"));
        assert!(!topic_matches("sensor/depth/", "sensor/color/42"));
        assert!(topic_matches("", "anything"));
    }

    #[test]
    fn frame_builder_assembles_mixed_frames() {
        let frames = MessageFrames::new()
            .push_pod(42u64)
            .push_bytes(b"hello".to_vec())
            .build();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 8);
        assert_eq!(frames[1], b"hello");
    }

    #[test]
    fn frame_builder_cbor_round_trips() {
        let frames = MessageFrames::new().push_cbor(&vec![1u32, 2, 3]).unwrap().build();
        let decoded: Vec<u32> = serde_cbor::from_slice(&frames[0]).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }
}
