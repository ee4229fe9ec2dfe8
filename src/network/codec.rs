//! Payload Codec
//!
//! Thin bincode wrapper shared by both channels. Every payload on the wire
//! is a bincode-encoded struct from [`crate::network::protocol`]; framing
//! (opcode and length prefix) lives in the channel implementations.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Payload bytes did not match the expected schema.
///
/// On the control channel this is indistinguishable from losing frame
/// alignment and is treated as fatal; on the realtime channel a single bad
/// datagram is dropped.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoding a value failed. Only possible for pathological values.
    #[error("failed to encode payload: {0}")]
    Encode(bincode::Error),
    /// Bytes could not be decoded as the expected payload type.
    #[error("payload bytes do not match expected schema: {0}")]
    SchemaMismatch(bincode::Error),
}

/// Encode a payload for transmission.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(CodecError::Encode)
}

/// Decode a received payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::SchemaMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::Vec3;
    use crate::game::state::CharacterSnapshot;
    use proptest::prelude::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = CharacterSnapshot {
            position: Vec3::new(1.0, -2.5, 8.25),
            rotation: Vec3::new(0.0, 180.0, 0.0),
            velocity: Vec3::ZERO,
            dead: true,
        };
        let bytes = encode(&snapshot).unwrap();
        let parsed: CharacterSnapshot = decode(&bytes).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_truncated_payload_is_schema_mismatch() {
        let bytes = encode(&CharacterSnapshot::default()).unwrap();
        let err = decode::<CharacterSnapshot>(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::SchemaMismatch(_)));
    }

    proptest! {
        #[test]
        fn prop_snapshot_roundtrip(
            px in -1000.0f32..1000.0,
            py in -1000.0f32..1000.0,
            pz in -1000.0f32..1000.0,
            dead in proptest::bool::ANY,
        ) {
            let snapshot = CharacterSnapshot {
                position: Vec3::new(px, py, pz),
                rotation: Vec3::ZERO,
                velocity: Vec3::new(pz, px, py),
                dead,
            };
            let bytes = encode(&snapshot).unwrap();
            let parsed: CharacterSnapshot = decode(&bytes).unwrap();
            prop_assert_eq!(parsed, snapshot);
        }
    }
}
