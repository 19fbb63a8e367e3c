//! # Key Attestation Chain
//!
//! The certificate chain of trust: a root key attests that an org key is
//! authorized for a scope (frameworks, validity window), and org keys sign
//! CPOEs. Chain verification walks root → attestation → CPOE, binding the
//! org key by a deterministic JWK fingerprint.

use anyhow::Result;
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{PublicKeyJwk, Signer};
use crate::jose::{self, JwsHeader};
use crate::verify::{self, Verification};

/// The attestation claim type.
pub const ATTESTATION_TYPE: &str = "CorsairKeyAttestation";

/// What an org key is authorized to assert.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AttestationScope {
    /// Frameworks the key may claim; no list means no framework constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frameworks: Option<Vec<String>>,

    /// RFC 3339 start of the authorization window.
    pub valid_from: String,

    /// RFC 3339 end of the authorization window.
    pub valid_until: String,
}

/// Claims of a key attestation JWT.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttestationClaims {
    /// The attesting root DID.
    pub iss: String,

    /// The attested org DID.
    pub sub: String,

    /// Always `CorsairKeyAttestation`.
    #[serde(rename = "type")]
    pub type_: String,

    /// The authorized scope.
    pub scope: AttestationScope,

    /// SHA-256 hex fingerprint over the canonical JWK of the org key.
    pub org_key_fingerprint: String,

    /// Issued-at.
    #[serde(with = "ts_seconds")]
    pub iat: DateTime<Utc>,

    /// Expiry; equals the scope's `validUntil`.
    #[serde(with = "ts_seconds")]
    pub exp: DateTime<Utc>,
}

/// Chain verification failures.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChainFailure {
    /// The attestation signature, type, or window did not check out.
    AttestationInvalid,

    /// The org key is not the one the attestation binds.
    FingerprintMismatch,

    /// The CPOE claims a framework outside the attested scope.
    ScopeViolation,

    /// The CPOE itself did not verify under the org key.
    CpoeInvalid,
}

/// Trust level of a verified chain.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    /// The full root → attestation → CPOE chain verified.
    ChainVerified,

    /// The CPOE verified but carries no attestation chain.
    SelfSigned,

    /// The chain did not verify.
    Invalid,
}

/// Result of walking the chain of trust.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainResult {
    /// Whether the full chain verified.
    pub valid: bool,

    /// Links verified, in order, e.g. `["root", "attestation", "cpoe"]`.
    pub chain: Vec<String>,

    /// Trust level to display.
    pub trust_level: TrustLevel,

    /// The first failure, when invalid.
    pub reason: Option<ChainFailure>,
}

impl ChainResult {
    fn failed(chain: Vec<String>, reason: ChainFailure) -> Self {
        Self { valid: false, chain, trust_level: TrustLevel::Invalid, reason: Some(reason) }
    }
}

/// Issue a key attestation: the root key asserts that `org_jwk` may sign
/// CPOEs for `scope`.
///
/// # Errors
///
/// Fails when the scope window cannot be parsed, or signing fails.
pub fn attest_org_key<S: Signer>(
    org_did: &str, org_jwk: &PublicKeyJwk, scope: AttestationScope, root_signer: &S, root_did: &str,
) -> Result<String> {
    let exp = DateTime::parse_from_rfc3339(&scope.valid_until)?.with_timezone(&Utc);
    let claims = AttestationClaims {
        iss: root_did.to_string(),
        sub: org_did.to_string(),
        type_: ATTESTATION_TYPE.to_string(),
        org_key_fingerprint: org_jwk.fingerprint()?,
        scope,
        iat: Utc::now(),
        exp,
    };
    let header = JwsHeader::new("attestation+jwt", root_signer.verification_method());
    jose::encode(&header, &claims, root_signer)
}

/// Verify an attestation's signature, type, and expiry under the root key,
/// returning its claims.
///
/// # Errors
///
/// Returns [`ChainFailure::AttestationInvalid`] on any check failure.
pub fn verify_key_attestation(
    attestation_jwt: &str, root_jwk: &PublicKeyJwk, now: DateTime<Utc>,
) -> Result<AttestationClaims, ChainFailure> {
    let decoded =
        jose::decode_unverified(attestation_jwt).map_err(|_| ChainFailure::AttestationInvalid)?;
    let root_key = root_jwk.to_verifying_key().map_err(|_| ChainFailure::AttestationInvalid)?;
    if !decoded.verify_signature(&root_key) {
        return Err(ChainFailure::AttestationInvalid);
    }

    let claims: AttestationClaims =
        serde_json::from_value(decoded.claims).map_err(|_| ChainFailure::AttestationInvalid)?;
    if claims.type_ != ATTESTATION_TYPE {
        return Err(ChainFailure::AttestationInvalid);
    }
    if claims.exp <= now {
        return Err(ChainFailure::AttestationInvalid);
    }
    Ok(claims)
}

/// Walk the full chain: the attestation verifies under the root key, the
/// org key matches the attested fingerprint, the CPOE verifies under the
/// org key, its claimed frameworks lie within the attested scope, and the
/// current time lies within the authorization window.
#[must_use]
pub fn verify_chain(
    cpoe_jwt: &str, attestation_jwt: &str, root_jwk: &PublicKeyJwk, org_jwk: &PublicKeyJwk,
) -> ChainResult {
    verify_chain_at(cpoe_jwt, attestation_jwt, root_jwk, org_jwk, Utc::now())
}

/// [`verify_chain`] at a reference time.
#[must_use]
pub fn verify_chain_at(
    cpoe_jwt: &str, attestation_jwt: &str, root_jwk: &PublicKeyJwk, org_jwk: &PublicKeyJwk,
    now: DateTime<Utc>,
) -> ChainResult {
    let mut chain = Vec::with_capacity(3);

    let attestation = match verify_key_attestation(attestation_jwt, root_jwk, now) {
        Ok(claims) => claims,
        Err(reason) => return ChainResult::failed(chain, reason),
    };
    chain.push("root".to_string());

    let Ok(fingerprint) = org_jwk.fingerprint() else {
        return ChainResult::failed(chain, ChainFailure::FingerprintMismatch);
    };
    if fingerprint != attestation.org_key_fingerprint {
        return ChainResult::failed(chain, ChainFailure::FingerprintMismatch);
    }
    chain.push("attestation".to_string());

    let Ok(org_key) = org_jwk.to_verifying_key() else {
        return ChainResult::failed(chain, ChainFailure::CpoeInvalid);
    };
    let Verification::Valid(cpoe) = verify::verify_at(cpoe_jwt, &[org_key], now) else {
        return ChainResult::failed(chain, ChainFailure::CpoeInvalid);
    };

    if !window_contains(&attestation.scope, now) {
        return ChainResult::failed(chain, ChainFailure::AttestationInvalid);
    }

    if let Some(allowed) = &attestation.scope.frameworks {
        let claimed = claimed_frameworks(&cpoe.subject);
        if claimed.iter().any(|f| !allowed.contains(f)) {
            return ChainResult::failed(chain, ChainFailure::ScopeViolation);
        }
    }
    chain.push("cpoe".to_string());

    ChainResult { valid: true, chain, trust_level: TrustLevel::ChainVerified, reason: None }
}

fn window_contains(scope: &AttestationScope, now: DateTime<Utc>) -> bool {
    let Ok(from) = DateTime::parse_from_rfc3339(&scope.valid_from) else {
        return false;
    };
    let Ok(until) = DateTime::parse_from_rfc3339(&scope.valid_until) else {
        return false;
    };
    now >= from.with_timezone(&Utc) && now <= until.with_timezone(&Utc)
}

fn claimed_frameworks(subject: &Value) -> Vec<String> {
    subject
        .get("frameworks")
        .and_then(Value::as_array)
        .map(|frameworks| {
            frameworks.iter().filter_map(Value::as_str).map(String::from).collect()
        })
        .unwrap_or_default()
}
