//! # JSON Web Keys
//!
//! The Ed25519 JWK representation shared by DID documents, key attestation
//! fingerprints, and JWT-VC verification.

use anyhow::{Result, anyhow};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::codec::canonical;
use crate::crypto;

/// An Ed25519 public key in JWK form (RFC 7517, `OKP`/`Ed25519`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublicKeyJwk {
    /// Key type. Always `OKP` for Ed25519.
    pub kty: String,

    /// Curve. Always `Ed25519`.
    pub crv: String,

    /// The public key, base64url-encoded.
    pub x: String,

    /// Key identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Intended algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

impl PublicKeyJwk {
    /// Build a JWK from a parsed verifying key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: codec::base64url(key.as_bytes()),
            kid: None,
            alg: None,
        }
    }

    /// Parse the JWK into a verifying key.
    ///
    /// # Errors
    ///
    /// Fails when the key type is not `OKP`/`Ed25519` or the `x` coordinate
    /// is not a valid 32-byte point.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey> {
        if self.kty != "OKP" || self.crv != "Ed25519" {
            return Err(anyhow!("unsupported key type {}/{}", self.kty, self.crv));
        }
        let raw = codec::base64url_decode(&self.x).map_err(|e| anyhow!("invalid `x`: {e}"))?;
        let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| anyhow!("`x` must be 32 bytes"))?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| anyhow!("invalid Ed25519 point: {e}"))
    }

    /// The deterministic fingerprint binding attestations to this key:
    /// SHA-256 over the canonical JSON of the JWK, lower-case hex.
    ///
    /// # Errors
    ///
    /// Fails when the JWK cannot be serialized.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = canonical::canonicalize(self)?;
        Ok(crypto::sha256_hex(canonical.as_bytes()))
    }
}
