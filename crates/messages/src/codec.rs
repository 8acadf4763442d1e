//! JSON wire encoding.
//!
//! Payloads are plain JSON documents. The subject, not the payload,
//! identifies the message type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Empty payload")]
    Empty,

    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("JSON encode error: {0}")]
    Encode(String),
}

/// Encode a payload to wire format.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(message).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a payload from wire format.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    if data.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimpleResponse;

    #[test]
    fn test_decode_rejects_empty_and_garbage() {
        assert!(matches!(decode::<SimpleResponse>(b""), Err(CodecError::Empty)));
        assert!(matches!(
            decode::<SimpleResponse>(b"not json"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_missing_required_field() {
        // `success` is required on every reply
        assert!(decode::<SimpleResponse>(br#"{"error":null}"#).is_err());
    }
}
