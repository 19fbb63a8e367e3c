//! # JOSE Envelopes
//!
//! Compact JWS assembly and unverified decoding shared by CPOE issuance,
//! verification, key attestations, freshness staples, and SCITT listing.
//! The signing input is the standard `base64url(header).base64url(payload)`.

use anyhow::{Result, anyhow};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codec;
use crate::crypto::{self, Signer};

/// A malformed compact JWS.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed JWT: {0}")]
pub struct JoseError(pub String);

/// Compact JWS protected header.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct JwsHeader {
    /// Signing algorithm. Always `EdDSA` here.
    pub alg: String,

    /// Token type, e.g. `vc+jwt` or `attestation+jwt`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Key identifier, e.g. `did:web:acme.com#key-1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl JwsHeader {
    /// A header for the given token type and key id.
    #[must_use]
    pub fn new(typ: impl Into<String>, kid: impl Into<String>) -> Self {
        Self { alg: "EdDSA".to_string(), typ: Some(typ.into()), kid: Some(kid.into()) }
    }
}

/// Encode and sign a three-segment JWT.
///
/// # Errors
///
/// Fails when serialization or signing fails.
pub fn encode<T: Serialize, S: Signer>(header: &JwsHeader, claims: &T, signer: &S) -> Result<String> {
    let header_b64 = codec::base64url(serde_json::to_vec(header)?.as_slice());
    let payload_b64 = codec::base64url(serde_json::to_vec(claims)?.as_slice());
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature = signer.try_sign(signing_input.as_bytes())?;
    if signature.is_empty() {
        // a signer returning nothing is a programming error, not a
        // verifier-observable state
        return Err(anyhow!("signer returned an empty signature"));
    }
    Ok(format!("{signing_input}.{}", codec::base64url(&signature)))
}

/// A decoded-but-unverified compact JWS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedJwt {
    /// The protected header.
    pub header: JwsHeader,

    /// The claims as raw JSON.
    pub claims: Value,

    /// The raw signature bytes.
    pub signature: Vec<u8>,

    /// `base64url(header).base64url(payload)` — the bytes the signature
    /// covers.
    pub signing_input: String,
}

impl DecodedJwt {
    /// Check the signature against a verifying key. Decoding a token proves
    /// nothing; call this (or a higher-level verifier) before trusting the
    /// claims.
    #[must_use]
    pub fn verify_signature(&self, key: &VerifyingKey) -> bool {
        crypto::verify_with_key(key, self.signing_input.as_bytes(), &self.signature)
    }
}

/// Split and decode a compact JWS without verifying anything.
///
/// # Errors
///
/// Fails when the token does not have three base64url JSON segments.
pub fn decode_unverified(jwt: &str) -> Result<DecodedJwt, JoseError> {
    let segments: Vec<&str> = jwt.split('.').collect();
    let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
        return Err(JoseError(format!("expected 3 segments, found {}", segments.len())));
    };

    let header_raw = codec::base64url_decode(header_b64)
        .map_err(|e| JoseError(format!("header: {e}")))?;
    let header: JwsHeader = serde_json::from_slice(&header_raw)
        .map_err(|e| JoseError(format!("header: {e}")))?;

    let payload_raw = codec::base64url_decode(payload_b64)
        .map_err(|e| JoseError(format!("payload: {e}")))?;
    let claims: Value = serde_json::from_slice(&payload_raw)
        .map_err(|e| JoseError(format!("payload: {e}")))?;

    let signature = codec::base64url_decode(signature_b64)
        .map_err(|e| JoseError(format!("signature: {e}")))?;

    Ok(DecodedJwt {
        header,
        claims,
        signature,
        signing_input: format!("{header_b64}.{payload_b64}"),
    })
}
