//! # Codec Core
//!
//! Deterministic encodings underpinning every hash and signature in the
//! protocol: the CBOR subset required by COSE, canonical JSON (the sole
//! pre-hash format), and unpadded base64url as specified by JOSE.

pub mod canonical;
pub mod cbor;

use base64ct::{Base64UrlUnpadded, Encoding};
use thiserror::Error;

/// A decoding failure, carrying the byte offset at which the input stopped
/// being well-formed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("codec error at offset {offset}: {reason}")]
pub struct CodecError {
    /// Byte offset of the malformed input.
    pub offset: usize,

    /// Human-readable description of the failure.
    pub reason: String,
}

impl CodecError {
    pub(crate) fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self { offset, reason: reason.into() }
    }
}

/// Encode bytes as unpadded base64url (JOSE).
#[must_use]
pub fn base64url(bytes: &[u8]) -> String {
    Base64UrlUnpadded::encode_string(bytes)
}

/// Decode unpadded base64url.
///
/// # Errors
///
/// Returns a [`CodecError`] when the input is not valid base64url.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, CodecError> {
    Base64UrlUnpadded::decode_vec(s).map_err(|e| CodecError::new(0, format!("invalid base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64url_round_trip() {
        let bytes = b"parley".to_vec();
        let encoded = base64url(&bytes);
        assert!(!encoded.contains('='), "base64url should be unpadded");
        let decoded = base64url_decode(&encoded).expect("should decode");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn base64url_rejects_garbage() {
        let err = base64url_decode("not*base64").expect_err("should fail");
        assert_eq!(err.offset, 0);
    }
}
