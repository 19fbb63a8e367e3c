//! # Freshness Staples
//!
//! Short-lived JWTs (minutes to hours) signed by the same org key as the
//! CPOE, asserting that a MARQUE is still current — OCSP-style stapling.
//! Verifiers may demand a staple with `exp > now`; its absence degrades the
//! trust tier without invalidating the credential.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::crypto::Signer;
use crate::jose::{self, JwsHeader};

/// Stapled validity state.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StapleState {
    /// The MARQUE is still vouched for.
    Current,
    /// The issuer has withdrawn the MARQUE.
    Revoked,
}

/// Staple claims.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StapleClaims {
    /// The MARQUE this staple vouches for.
    pub marque_id: String,

    /// Current or revoked.
    pub state: StapleState,

    /// Issued-at, UNIX seconds.
    pub iat: i64,

    /// Expiry, UNIX seconds.
    pub exp: i64,
}

/// Issue a staple valid for `ttl`.
///
/// # Errors
///
/// Fails when signing fails.
pub fn issue_staple<S: Signer>(
    marque_id: &str, state: StapleState, ttl: Duration, signer: &S,
) -> Result<String> {
    let now = Utc::now();
    let claims = StapleClaims {
        marque_id: marque_id.to_string(),
        state,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    let header = JwsHeader::new("staple+jwt", signer.verification_method());
    jose::encode(&header, &claims, signer)
}

/// Outcome of checking a staple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StapleCheck {
    /// Signature and expiry check out.
    Fresh(StapleClaims),
    /// The staple has lapsed.
    Expired,
    /// Bad signature or malformed token.
    Invalid,
}

/// Verify a staple against the org key at a reference time.
#[must_use]
pub fn verify_staple(jwt: &str, key: &VerifyingKey, now: DateTime<Utc>) -> StapleCheck {
    let Ok(decoded) = jose::decode_unverified(jwt) else {
        return StapleCheck::Invalid;
    };
    if !decoded.verify_signature(key) {
        return StapleCheck::Invalid;
    }
    let Ok(claims) = serde_json::from_value::<StapleClaims>(decoded.claims) else {
        return StapleCheck::Invalid;
    };
    if claims.exp <= now.timestamp() {
        return StapleCheck::Expired;
    }
    StapleCheck::Fresh(claims)
}
