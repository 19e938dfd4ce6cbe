// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CBOR encoding for persisted frames and the `publish_cbor` convenience path.
//!
//! Structs, enums, byte spans, and fixed-size arrays all encode through
//! `serde`'s derive machinery rather than hand-rolled reflection: the struct
//! field walk the original did at runtime, a derived `Serialize`/
//! `Deserialize` impl does at compile time, while still producing the same
//! self-describing key/value map on the wire.

use crate::error::DecodeError;

/// Encode any `Serialize` value to a CBOR byte buffer.
pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, DecodeError> {
    Ok(serde_cbor::to_vec(value)?)
}

/// Decode a CBOR byte buffer back into `T`.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_cbor::from_slice(bytes)?)
}

/// Encode the ordered frame list the recorder persists as a single CBOR
/// array of byte strings.
pub fn encode_frames(frames: &[Vec<u8>]) -> Result<Vec<u8>, DecodeError> {
    encode(&frames)
}

/// Decode a recorder frames blob back into the ordered frame list.
pub fn decode_frames(bytes: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Nested {
        label: String,
        value: f64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Kind {
        A,
        B(u32),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        scalar: i64,
        nested: Nested,
        kind: Kind,
        items: Vec<Nested>,
        bytes: Vec<u8>,
        fixed: [f32; 4],
    }

    #[test]
    fn struct_round_trips() {
        let sample = Sample {
            scalar: -7,
            nested: Nested {
                label: "n".into(),
                value: 3.5,
            },
            kind: Kind::B(9),
            items: vec![
                Nested {
                    label: "a".into(),
                    value: 1.0,
                },
                Nested {
                    label: "b".into(),
                    value: 2.0,
                },
            ],
            bytes: vec![1, 2, 3, 4],
            fixed: [1.0, 2.0, 3.0, 4.0],
        };

        let encoded = encode(&sample).unwrap();
        let decoded: Sample = decode(&encoded).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn frames_round_trip() {
        let frames = vec![vec![1u8, 2, 3], vec![], vec![9, 9]];
        let blob = encode_frames(&frames).unwrap();
        let decoded = decode_frames(&blob).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode::<Sample>(&[0xFF, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, DecodeError::Cbor(_)));
    }
}
