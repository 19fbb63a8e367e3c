//! # CPOE Issuance
//!
//! Builds and signs MARQUEs: W3C Verifiable Credentials carrying a
//! compliance-operational-effectiveness subject, encoded as JWTs. The
//! credential subject is sanitized before signing; the JWT signature is the
//! proof — there is no inner proof object.

pub mod provenance;
pub mod sanitize;
pub mod subject;

use anyhow::{Result, anyhow};
use chrono::serde::ts_seconds;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use self::subject::{CpoeSubject, EvidenceChainDescriptor, ProcessProvenanceDescriptor};
use crate::codec::{self, canonical};
use crate::crypto::Signer;
use crate::jose::{self, JwsHeader};

/// W3C Verifiable Credentials Data Model v2 context URI.
pub const VC_CONTEXT_V2: &str = "https://www.w3.org/ns/credentials/v2";

/// Corsair Parley context URI.
pub const CORSAIR_CONTEXT: &str = "https://grcorsair.com/contexts/parley/v2";

/// The CPOE credential type.
pub const CPOE_TYPE: &str = "CorsairCPOE";

/// Protocol versions a CPOE may carry. Issuance writes the current version;
/// verification accepts either and preserves whichever was signed.
pub const PARLEY_VERSIONS: [&str; 2] = ["2.0", "2.1"];

/// The `vc` claim of a CPOE.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VcEnvelope {
    /// JSON-LD contexts: the W3C VC v2 URI and the Corsair context.
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// Credential types: `VerifiableCredential` and `CorsairCPOE`.
    #[serde(rename = "type")]
    pub type_: Vec<String>,

    /// Issuer DID.
    pub issuer: String,

    /// RFC 3339 time the credential becomes valid.
    pub valid_from: String,

    /// RFC 3339 time the credential ceases to be valid.
    pub valid_until: String,

    /// The sanitized credential subject.
    pub credential_subject: Value,
}

/// Registered and private claims of a CPOE JWT.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CpoeClaims {
    /// Issuer DID.
    pub iss: String,

    /// The MARQUE id.
    pub sub: String,

    /// Issued-at.
    #[serde(with = "ts_seconds")]
    pub iat: DateTime<Utc>,

    /// Expiry; bounds the credential's validity.
    #[serde(with = "ts_seconds")]
    pub exp: DateTime<Utc>,

    /// The MARQUE id, again, as the JWT id.
    pub jti: String,

    /// The credential.
    pub vc: VcEnvelope,

    /// Parley protocol version.
    pub parley: String,
}

/// A signed MARQUE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCpoe {
    /// The three-segment JWT.
    pub jwt: String,

    /// The MARQUE id (`jti`/`sub`).
    pub marque_id: String,
}

/// Builds a CPOE. Follows the signer-typestate pattern: `build` is only
/// available once a signer is attached.
#[derive(Debug)]
pub struct CpoeBuilder<S> {
    subject: CpoeSubject,
    issuer_did: String,
    expiry_days: i64,
    parley_version: String,
    signer: S,
}

/// Builder has no signer.
#[doc(hidden)]
pub struct NoSigner;
/// Builder state has a signer.
#[doc(hidden)]
pub struct HasSigner<'a, S: Signer>(pub &'a S);

impl CpoeBuilder<NoSigner> {
    /// Start a builder from an assembled subject and the issuer's DID.
    #[must_use]
    pub fn new(subject: CpoeSubject, issuer_did: impl Into<String>) -> Self {
        Self {
            subject,
            issuer_did: issuer_did.into(),
            expiry_days: 7,
            parley_version: "2.0".to_string(),
            signer: NoSigner,
        }
    }

    /// Attach the signer.
    pub fn signer<S: Signer>(self, signer: &'_ S) -> CpoeBuilder<HasSigner<'_, S>> {
        CpoeBuilder {
            subject: self.subject,
            issuer_did: self.issuer_did,
            expiry_days: self.expiry_days,
            parley_version: self.parley_version,
            signer: HasSigner(signer),
        }
    }
}

impl<S> CpoeBuilder<S> {
    /// Days until expiry (default 7). Negative values produce an
    /// already-expired credential, which some conformance tests rely on.
    #[must_use]
    pub const fn expiry_days(mut self, days: i64) -> Self {
        self.expiry_days = days;
        self
    }

    /// Attach the evidence-chain descriptor.
    #[must_use]
    pub fn evidence_chain(mut self, descriptor: EvidenceChainDescriptor) -> Self {
        self.subject.evidence_chain = Some(descriptor);
        self
    }

    /// Attach the process-provenance descriptor.
    #[must_use]
    pub fn process_provenance(mut self, descriptor: ProcessProvenanceDescriptor) -> Self {
        self.subject.process_provenance = Some(descriptor);
        self
    }

    /// Override the `parley` version claim.
    ///
    /// # Errors
    ///
    /// Fails for versions other than `2.0` and `2.1`.
    pub fn parley_version(mut self, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if !PARLEY_VERSIONS.contains(&version.as_str()) {
            return Err(anyhow!("unsupported parley version {version}"));
        }
        self.parley_version = version;
        Ok(self)
    }
}

impl<S: Signer> CpoeBuilder<HasSigner<'_, S>> {
    /// Sanitize the subject, assemble the JWT-VC payload, and sign.
    ///
    /// # Errors
    ///
    /// Fails when serialization or signing fails.
    pub fn build(self) -> Result<IssuedCpoe> {
        let mut subject_json = serde_json::to_value(&self.subject)?;
        sanitize::sanitize_value(&mut subject_json);

        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiry_days * 86_400);
        let marque_id = format!("marque-{}", Uuid::new_v4());

        let claims = CpoeClaims {
            iss: self.issuer_did.clone(),
            sub: marque_id.clone(),
            iat: now,
            exp,
            jti: marque_id.clone(),
            vc: VcEnvelope {
                context: vec![VC_CONTEXT_V2.to_string(), CORSAIR_CONTEXT.to_string()],
                type_: vec!["VerifiableCredential".to_string(), CPOE_TYPE.to_string()],
                issuer: self.issuer_did,
                valid_from: now.to_rfc3339_opts(SecondsFormat::Secs, true),
                valid_until: exp.to_rfc3339_opts(SecondsFormat::Secs, true),
                credential_subject: subject_json,
            },
            parley: self.parley_version,
        };

        let header = JwsHeader::new("vc+jwt", self.signer.0.verification_method());
        let jwt = jose::encode(&header, &claims, self.signer.0)?;
        Ok(IssuedCpoe { jwt, marque_id })
    }

    /// Produce the legacy `"v1"` JSON envelope instead of a JWT: the
    /// sanitized subject under `marque`, with a detached signature over its
    /// canonical JSON.
    ///
    /// # Errors
    ///
    /// Fails when serialization or signing fails.
    pub fn build_legacy(self) -> Result<Value> {
        let mut marque = serde_json::to_value(&self.subject)?;
        sanitize::sanitize_value(&mut marque);

        let signature = self.signer.0.try_sign(canonical::to_canonical_string(&marque).as_bytes())?;
        Ok(serde_json::json!({
            "parley": "1.0",
            "marque": marque,
            "signature": codec::base64url(&signature),
        }))
    }
}
