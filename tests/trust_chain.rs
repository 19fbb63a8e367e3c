//! Chain of trust: the root key attests org keys for a scope, and CPOEs
//! outside that scope are rejected even when correctly signed.

mod utils;

use chrono::{Duration, Utc};
use corsair_parley::assurance::{self, EvaluationOptions};
use corsair_parley::attest::{
    AttestationScope, ChainFailure, TrustLevel, attest_org_key, verify_chain,
    verify_key_attestation,
};
use corsair_parley::cpoe::subject::CpoeSubject;
use corsair_parley::cpoe::CpoeBuilder;
use corsair_parley::crypto::LocalSigner;
use corsair_parley::ingest::FrameworkRef;
use corsair_parley::normalize::normalize;
use utils::prowler_document;

fn issue_claiming(org: &LocalSigner, framework: &str) -> String {
    let mut document = prowler_document();
    for control in &mut document.controls {
        control.framework_refs = Some(vec![FrameworkRef {
            framework: framework.to_string(),
            control_id: "1.1".to_string(),
        }]);
    }
    let normalized = normalize(&document);
    let evaluation = assurance::evaluate(&normalized, &EvaluationOptions::default());
    let subject = CpoeSubject::from_evidence(&normalized, &evaluation, false);

    CpoeBuilder::new(subject, "did:web:acme.com")
        .signer(org)
        .build()
        .expect("should issue")
        .jwt
}

fn soc2_scope() -> AttestationScope {
    AttestationScope {
        frameworks: Some(vec!["SOC2".to_string()]),
        valid_from: (Utc::now() - Duration::days(1)).to_rfc3339(),
        valid_until: (Utc::now() + Duration::days(365)).to_rfc3339(),
    }
}

#[test]
fn out_of_scope_framework_is_rejected_then_rescoped_signing_succeeds() {
    let root = LocalSigner::generate("did:web:grcorsair.com#key-1");
    let org = LocalSigner::generate("did:web:acme.com#key-1");
    let org_jwk = org.public_jwk();

    let attestation =
        attest_org_key("did:web:acme.com", &org_jwk, soc2_scope(), &root, "did:web:grcorsair.com")
            .expect("should attest");

    // acme claims NIST-800-53 while attested only for SOC2
    let overreach = issue_claiming(&org, "NIST-800-53");
    let result = verify_chain(&overreach, &attestation, &root.public_jwk(), &org_jwk);
    assert!(!result.valid);
    assert_eq!(result.reason, Some(ChainFailure::ScopeViolation));
    assert_eq!(result.trust_level, TrustLevel::Invalid);

    // the same data re-signed claiming only SOC2 verifies end-to-end
    let rescoped = issue_claiming(&org, "SOC2");
    let result = verify_chain(&rescoped, &attestation, &root.public_jwk(), &org_jwk);
    assert!(result.valid);
    assert_eq!(result.chain, vec!["root", "attestation", "cpoe"]);
    assert_eq!(result.trust_level, TrustLevel::ChainVerified);
}

#[test]
fn attestation_payload_binds_the_org_key_fingerprint() {
    let root = LocalSigner::generate("did:web:grcorsair.com#key-1");
    let org = LocalSigner::generate("did:web:acme.com#key-1");
    let org_jwk = org.public_jwk();

    let attestation =
        attest_org_key("did:web:acme.com", &org_jwk, soc2_scope(), &root, "did:web:grcorsair.com")
            .expect("should attest");
    let claims = verify_key_attestation(&attestation, &root.public_jwk(), Utc::now())
        .expect("should verify");

    assert_eq!(claims.iss, "did:web:grcorsair.com");
    assert_eq!(claims.sub, "did:web:acme.com");
    assert_eq!(claims.type_, "CorsairKeyAttestation");
    assert_eq!(
        claims.org_key_fingerprint,
        org_jwk.fingerprint().expect("should fingerprint")
    );

    // a different key is not the attested key
    let other = LocalSigner::generate("did:web:acme.com#key-2");
    let cpoe = issue_claiming(&other, "SOC2");
    let result = verify_chain(&cpoe, &attestation, &root.public_jwk(), &other.public_jwk());
    assert!(!result.valid);
    assert_eq!(result.reason, Some(ChainFailure::FingerprintMismatch));
}
