//! # CPOE Verification
//!
//! Verifies a MARQUE end-to-end: structure, expiry, signature, and required
//! W3C VC claims, in that order. Every failure is a discriminated value; the
//! verifier never unwinds on malformed input. The zero-trust path resolves
//! the signing key from the issuer's domain via `did:web`.

use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::did::{DidResolver, HttpFetcher};
use crate::jose;
use crate::staple::{StapleCheck, StapleState};

/// The W3C VC v2 context a CPOE must carry.
const REQUIRED_CONTEXT: &str = "https://www.w3.org/ns/credentials/v2";

/// Why verification failed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifyFailure {
    /// Not a three-segment JWT, or required VC claims are missing.
    SchemaInvalid,

    /// No trusted key verified the signature.
    SignatureInvalid,

    /// The credential's `exp` has passed.
    Expired,

    /// The issuer's key material could not be reached.
    Unverifiable,

    /// Structurally unusable input.
    Invalid,

    /// The caller cancelled the operation.
    Cancelled,
}

/// User-visible trust tier of an issuer.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssuerTier {
    /// Anchored under the Corsair root domain.
    CorsairVerified,

    /// A valid `did:web` issuer outside the Corsair root.
    SelfSigned,

    /// Identity could not be established.
    Unverifiable,

    /// Verification failed.
    Invalid,
}

/// Headline counts as claimed by the credential subject.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimedSummary {
    /// Controls exercised.
    pub controls_tested: usize,

    /// Controls that passed.
    pub controls_passed: usize,

    /// Controls that failed.
    pub controls_failed: usize,

    /// Claimed overall score.
    pub overall_score: u8,
}

/// A successfully verified MARQUE.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedCpoe {
    /// Issuer DID.
    pub issuer: String,

    /// Trust tier derived from the issuer.
    pub issuer_tier: IssuerTier,

    /// The MARQUE id (`jti`).
    pub marque_id: String,

    /// The claimed summary, when present.
    pub summary: Option<ClaimedSummary>,

    /// The full credential subject.
    pub subject: Value,

    /// The `parley` version as signed — `2.0` or `2.1`, preserved verbatim.
    pub parley_version: Option<String>,

    /// Expiry of the credential.
    pub expires_at: DateTime<Utc>,
}

/// Verification outcome: the verified credential or a reason.
#[derive(Clone, Debug, PartialEq)]
pub enum Verification {
    /// The credential verified.
    Valid(Box<VerifiedCpoe>),

    /// The credential did not verify.
    Failed {
        /// Why.
        reason: VerifyFailure,
    },
}

impl Verification {
    /// Whether the credential verified.
    #[must_use]
    pub const fn valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The failure reason, when failed.
    #[must_use]
    pub const fn reason(&self) -> Option<&VerifyFailure> {
        match self {
            Self::Valid(_) => None,
            Self::Failed { reason } => Some(reason),
        }
    }

    /// The display tier: the issuer tier when valid, `invalid` otherwise.
    #[must_use]
    pub fn tier(&self) -> IssuerTier {
        match self {
            Self::Valid(cpoe) => cpoe.issuer_tier,
            Self::Failed { reason } => match reason {
                VerifyFailure::Unverifiable | VerifyFailure::Cancelled => IssuerTier::Unverifiable,
                _ => IssuerTier::Invalid,
            },
        }
    }

    const fn failed(reason: VerifyFailure) -> Self {
        Self::Failed { reason }
    }
}

/// Derive the trust tier from an issuer identifier.
#[must_use]
pub fn issuer_tier(issuer: &str) -> IssuerTier {
    if issuer.starts_with("did:web:grcorsair.com") {
        IssuerTier::CorsairVerified
    } else if issuer.starts_with("did:web:") {
        IssuerTier::SelfSigned
    } else {
        IssuerTier::Unverifiable
    }
}

/// Verify a CPOE against a set of trusted keys, at the current time.
#[must_use]
pub fn verify(jwt: &str, trusted_keys: &[VerifyingKey]) -> Verification {
    verify_at(jwt, trusted_keys, Utc::now())
}

/// Verify a CPOE against a set of trusted keys at a reference time. Keys are
/// tried in order; the checks run structure, expiry, signature, claims.
#[must_use]
pub fn verify_at(jwt: &str, trusted_keys: &[VerifyingKey], now: DateTime<Utc>) -> Verification {
    let Ok(decoded) = jose::decode_unverified(jwt) else {
        return Verification::failed(VerifyFailure::SchemaInvalid);
    };

    if let Some(failure) = check_expiry(&decoded.claims, now) {
        return Verification::failed(failure);
    }

    for key in trusted_keys {
        if decoded.verify_signature(key) {
            return finish(&decoded.claims);
        }
    }
    Verification::failed(VerifyFailure::SignatureInvalid)
}

fn check_expiry(claims: &Value, now: DateTime<Utc>) -> Option<VerifyFailure> {
    let exp = claims.get("exp")?.as_i64()?;
    // exp is in seconds; the comparison follows the wire rule exp*1000 <= now_ms
    if exp.checked_mul(1000)? <= now.timestamp_millis() {
        return Some(VerifyFailure::Expired);
    }
    None
}

/// Validate the required VC claims and assemble the result.
fn finish(claims: &Value) -> Verification {
    let Some(vc) = claims.get("vc") else {
        return Verification::failed(VerifyFailure::SchemaInvalid);
    };

    let context_ok = vc.get("@context").and_then(Value::as_array).is_some_and(|ctx| {
        ctx.iter().any(|c| c.as_str() == Some(REQUIRED_CONTEXT))
    });
    let type_ok = vc.get("type").and_then(Value::as_array).is_some_and(|types| {
        types.iter().any(|t| t.as_str() == Some("VerifiableCredential"))
    });
    let Some(subject) = vc.get("credentialSubject") else {
        return Verification::failed(VerifyFailure::SchemaInvalid);
    };
    if !context_ok || !type_ok {
        return Verification::failed(VerifyFailure::SchemaInvalid);
    }

    let issuer = claims.get("iss").and_then(Value::as_str).unwrap_or_default().to_string();
    let expires_at = claims
        .get("exp")
        .and_then(Value::as_i64)
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_default();

    Verification::Valid(Box::new(VerifiedCpoe {
        issuer_tier: issuer_tier(&issuer),
        issuer,
        marque_id: claims.get("jti").and_then(Value::as_str).unwrap_or_default().to_string(),
        summary: subject
            .get("summary")
            .and_then(|s| serde_json::from_value(s.clone()).ok()),
        subject: subject.clone(),
        parley_version: claims.get("parley").and_then(Value::as_str).map(String::from),
        expires_at,
    }))
}

/// The display tier under a demanded freshness staple. A missing or lapsed
/// staple degrades the tier to `unverifiable` without invalidating the
/// credential; a revoked staple collapses it to `invalid`.
#[must_use]
pub fn tier_with_staple(result: &Verification, staple: Option<&StapleCheck>) -> IssuerTier {
    if !result.valid() {
        return result.tier();
    }
    match staple {
        Some(StapleCheck::Fresh(claims)) => match claims.state {
            StapleState::Current => result.tier(),
            StapleState::Revoked => IssuerTier::Invalid,
        },
        Some(StapleCheck::Expired | StapleCheck::Invalid) | None => IssuerTier::Unverifiable,
    }
}

/// A cancellation signal for in-flight verification.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Resolves when the paired handle cancels.
    pub async fn cancelled(mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                // handle dropped without cancelling: wait forever
                std::future::pending::<()>().await;
            }
        }
    }
}

/// The issuing side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel the paired operations.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a cancellation pair.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Zero-trust verification: resolve the signing key from the `kid`'s
/// `did:web` domain, then run the standard checks.
pub async fn verify_via_did<F: HttpFetcher>(jwt: &str, resolver: &DidResolver<F>) -> Verification {
    let Ok(decoded) = jose::decode_unverified(jwt) else {
        return Verification::failed(VerifyFailure::SchemaInvalid);
    };

    let Some(kid) = decoded.header.kid.clone() else {
        return Verification::failed(VerifyFailure::Invalid);
    };
    if !kid.contains("did:web:") {
        return Verification::failed(VerifyFailure::Invalid);
    }
    let did = kid.split('#').next().unwrap_or(&kid).to_string();

    let document = match resolver.resolve(&did).await {
        Ok(doc) => doc,
        Err(e) => {
            debug!(%did, error = %e, "DID resolution failed");
            return Verification::failed(VerifyFailure::Unverifiable);
        }
    };
    let Some(method) = document.find_method(&kid) else {
        return Verification::failed(VerifyFailure::Unverifiable);
    };
    let Ok(key) = method.public_key_jwk.to_verifying_key() else {
        return Verification::failed(VerifyFailure::Unverifiable);
    };

    verify_at(jwt, &[key], Utc::now())
}

/// [`verify_via_did`] with a cancellation signal: on cancel, in-flight
/// fetches are dropped and the result is `cancelled`.
pub async fn verify_via_did_cancellable<F: HttpFetcher>(
    jwt: &str, resolver: &DidResolver<F>, cancel: CancelToken,
) -> Verification {
    tokio::select! {
        result = verify_via_did(jwt, resolver) => result,
        () = cancel.cancelled() => Verification::failed(VerifyFailure::Cancelled),
    }
}

#[cfg(all(test, feature = "issuer"))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec;
    use crate::core::Kind;
    use crate::cpoe::CpoeBuilder;
    use crate::cpoe::subject::{CpoeSubject, ProvenanceDescriptor, SummaryStats};
    use crate::crypto::LocalSigner;

    fn subject() -> CpoeSubject {
        CpoeSubject {
            scope: Kind::String("prod accounts".to_string()),
            provenance: ProvenanceDescriptor {
                source: "prowler".to_string(),
                source_identity: "acme".to_string(),
                date: "2026-06-01".to_string(),
                ..ProvenanceDescriptor::default()
            },
            summary: SummaryStats {
                controls_tested: 10,
                controls_passed: 8,
                controls_failed: 2,
                overall_score: 80,
            },
            frameworks: Some(vec!["SOC2".to_string()]),
            ..CpoeSubject::default()
        }
    }

    fn issue(signer: &LocalSigner, expiry_days: i64) -> String {
        CpoeBuilder::new(subject(), "did:web:acme.com")
            .expiry_days(expiry_days)
            .signer(signer)
            .build()
            .expect("should build")
            .jwt
    }

    #[test]
    fn happy_path() {
        let signer = LocalSigner::generate("did:web:acme.com#key-1");
        let key = signer.public_jwk().to_verifying_key().expect("should parse");
        let jwt = issue(&signer, 7);

        let Verification::Valid(cpoe) = verify(&jwt, &[key]) else {
            panic!("should verify");
        };
        assert_eq!(cpoe.issuer, "did:web:acme.com");
        assert_eq!(cpoe.issuer_tier, IssuerTier::SelfSigned);
        let summary = cpoe.summary.expect("should carry a summary");
        assert_eq!(summary.controls_tested, 10);
        assert_eq!(summary.controls_passed, 8);
        assert_eq!(summary.controls_failed, 2);
        assert_eq!(summary.overall_score, 80);
        assert_eq!(cpoe.parley_version.as_deref(), Some("2.0"));
    }

    #[test]
    fn tampered_issuer_fails_signature() {
        let signer = LocalSigner::generate("did:web:acme.com#key-1");
        let key = signer.public_jwk().to_verifying_key().expect("should parse");
        let jwt = issue(&signer, 7);

        // re-encode the payload with the issuer rewritten
        let mut parts: Vec<String> = jwt.split('.').map(String::from).collect();
        let mut claims: Value = serde_json::from_slice(
            &codec::base64url_decode(&parts[1]).expect("should decode"),
        )
        .expect("should parse");
        claims["iss"] = json!("did:web:evil.com");
        parts[1] = codec::base64url(&serde_json::to_vec(&claims).expect("should serialize"));
        let tampered = parts.join(".");

        let result = verify(&tampered, &[key]);
        assert_eq!(result.reason(), Some(&VerifyFailure::SignatureInvalid));
        assert_eq!(result.tier(), IssuerTier::Invalid);
    }

    #[test]
    fn expired_credential() {
        let signer = LocalSigner::generate("did:web:acme.com#key-1");
        let key = signer.public_jwk().to_verifying_key().expect("should parse");
        let jwt = issue(&signer, -1);

        let result = verify(&jwt, &[key]);
        assert_eq!(result.reason(), Some(&VerifyFailure::Expired));
    }

    #[test]
    fn two_segments_is_schema_invalid() {
        let result = verify("a.b", &[]);
        assert_eq!(result.reason(), Some(&VerifyFailure::SchemaInvalid));
    }

    #[test]
    fn missing_vc_claims_are_schema_invalid() {
        let signer = LocalSigner::generate("did:web:acme.com#key-1");
        let key = signer.public_jwk().to_verifying_key().expect("should parse");

        let header = crate::jose::JwsHeader::new("vc+jwt", "did:web:acme.com#key-1");
        let exp = Utc::now().timestamp() + 3600;
        let jwt = crate::jose::encode(
            &header,
            &json!({"iss": "did:web:acme.com", "exp": exp}),
            &signer,
        )
        .expect("should encode");

        let result = verify(&jwt, &[key]);
        assert_eq!(result.reason(), Some(&VerifyFailure::SchemaInvalid));
    }

    #[test]
    fn tiers() {
        assert_eq!(issuer_tier("did:web:grcorsair.com"), IssuerTier::CorsairVerified);
        assert_eq!(issuer_tier("did:web:acme.com"), IssuerTier::SelfSigned);
        assert_eq!(issuer_tier("did:key:z6Mk"), IssuerTier::Unverifiable);
    }

    #[test]
    fn staple_policy_degrades_without_invalidating() {
        let signer = LocalSigner::generate("did:web:acme.com#key-1");
        let key = signer.public_jwk().to_verifying_key().expect("should parse");
        let result = verify(&issue(&signer, 7), &[key]);
        assert!(result.valid());

        // no staple demanded is the caller's choice; a demanded-but-absent
        // staple reads unverifiable
        assert_eq!(tier_with_staple(&result, None), IssuerTier::Unverifiable);

        let staple_jwt = crate::staple::issue_staple(
            "marque-x",
            crate::staple::StapleState::Current,
            chrono::Duration::minutes(10),
            &signer,
        )
        .expect("should staple");
        let check = crate::staple::verify_staple(&staple_jwt, &key, Utc::now());
        assert_eq!(tier_with_staple(&result, Some(&check)), IssuerTier::SelfSigned);

        let revoked_jwt = crate::staple::issue_staple(
            "marque-x",
            crate::staple::StapleState::Revoked,
            chrono::Duration::minutes(10),
            &signer,
        )
        .expect("should staple");
        let check = crate::staple::verify_staple(&revoked_jwt, &key, Utc::now());
        assert_eq!(tier_with_staple(&result, Some(&check)), IssuerTier::Invalid);
    }

    #[tokio::test]
    async fn cancellation_yields_cancelled() {
        // a fetcher that never routes anywhere paired with immediate cancel
        #[derive(Clone)]
        struct Hanging;
        impl HttpFetcher for Hanging {
            async fn get(
                &self, _url: &str,
            ) -> Result<crate::did::FetchResponse, crate::did::FetchError> {
                std::future::pending().await
            }
        }

        let signer = LocalSigner::generate("did:web:acme.com#key-1");
        let jwt = issue(&signer, 7);
        let resolver = DidResolver::new(Hanging);

        let (handle, token) = cancel_pair();
        handle.cancel();
        let result = verify_via_did_cancellable(&jwt, &resolver, token).await;
        assert_eq!(result.reason(), Some(&VerifyFailure::Cancelled));
        assert_eq!(result.tier(), IssuerTier::Unverifiable);
    }
}
