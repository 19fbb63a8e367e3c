//! # COSE_Sign1
//!
//! Single-signer COSE envelopes (RFC 9052 §4.2) over the in-crate CBOR
//! subset. Used for SCITT receipts and process-provenance step receipts.
//!
//! The structure is a 4-element array `[protected_bstr, unprotected_map,
//! payload_bstr, signature_bstr]`. Protected headers are serialized once,
//! embedded as a byte string, and bound into the signature through the
//! `Sig_structure` `["Signature1", protected, external_aad, payload]`.

use anyhow::Result;
use ed25519_dalek::VerifyingKey;

use crate::codec::cbor::{self, Value};
use crate::crypto::{self, Signer};

/// COSE header label for `alg`.
const HEADER_ALG: i64 = 1;

/// Build a COSE_Sign1 envelope over the payload. Protected headers carry
/// `{1: -8}` (EdDSA); unprotected headers are the empty map.
///
/// # Errors
///
/// Fails when the signer fails.
pub fn cose_sign1<S: Signer>(payload: &[u8], signer: &S) -> Result<Vec<u8>> {
    let protected = cbor::encode(&Value::Map(vec![(
        Value::Int(HEADER_ALG),
        Value::Int(signer.algorithm().cose()),
    )]));

    let sig_structure = sig_structure(&protected, payload);
    let signature = signer.try_sign(&cbor::encode(&sig_structure))?;

    let envelope = Value::Array(vec![
        Value::Bytes(protected),
        Value::Map(vec![]),
        Value::Bytes(payload.to_vec()),
        Value::Bytes(signature),
    ]);
    Ok(cbor::encode(&envelope))
}

/// Verify a COSE_Sign1 envelope, returning `(verified, payload)`.
///
/// Every failure mode — tampered payload, wrong key, malformed CBOR —
/// collapses to `(false, empty)`; nothing escapes.
#[must_use]
pub fn cose_verify1(bytes: &[u8], verifying_key: &VerifyingKey) -> (bool, Vec<u8>) {
    let Ok(Value::Array(items)) = cbor::decode(bytes) else {
        return (false, Vec::new());
    };
    let [Value::Bytes(protected), Value::Map(_), payload_item, Value::Bytes(signature)] =
        items.as_slice()
    else {
        return (false, Vec::new());
    };
    let payload = match payload_item {
        Value::Bytes(b) => b.clone(),
        Value::Null => Vec::new(),
        _ => return (false, Vec::new()),
    };

    let to_verify = cbor::encode(&sig_structure(protected, &payload));
    if crypto::verify_with_key(verifying_key, &to_verify, signature) {
        (true, payload)
    } else {
        (false, Vec::new())
    }
}

fn sig_structure(protected: &[u8], payload: &[u8]) -> Value {
    Value::Array(vec![
        Value::Text("Signature1".to_string()),
        Value::Bytes(protected.to_vec()),
        Value::Bytes(Vec::new()),
        Value::Bytes(payload.to_vec()),
    ])
}
