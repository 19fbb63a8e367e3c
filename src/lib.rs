//! An API for issuing and verifying Corsair Parley compliance attestations
//! (CPOEs): W3C Verifiable Credentials encoded as JWTs, hash-chained into
//! append-only evidence logs, registered in a SCITT-style transparency log,
//! and re-verifiable by any party holding only the issuer's domain.
//!
//! # Feature Flags
//!
//! Both features are enabled by default:
//!
//! * `issuer` - Enables CPOE issuance (sanitization, credential assembly,
//!   JWT-VC signing, freshness staples, process provenance).
//! * `verifier` - Enables verification (DID:web resolution, JWT-VC
//!   verification, key-attestation chains, SCITT registry and queries).

pub mod assurance;
pub mod codec;
pub mod core;
pub mod crypto;
pub mod evidence;
pub mod ingest;
pub mod jose;
pub mod keystore;
pub mod merkle;
pub mod normalize;
pub mod staple;
pub mod trust_txt;

#[cfg(feature = "issuer")]
pub mod cpoe;

#[cfg(feature = "verifier")]
pub mod attest;
#[cfg(feature = "verifier")]
pub mod did;
#[cfg(feature = "verifier")]
pub mod scitt;
#[cfg(feature = "verifier")]
pub mod verify;

/// Re-export basic types
pub use crate::core::Kind;
pub use crate::crypto::Signer;
