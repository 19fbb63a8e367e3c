//! # Crypto Core
//!
//! Ed25519 keypairs, signing and verification, SHA-256, and COSE_Sign1
//! assembly per RFC 9052. No bespoke primitives: this module glues
//! `ed25519-dalek` and `sha2` to the protocol's wire formats.

pub mod cose;
pub mod jwk;

use anyhow::{Result, anyhow};
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

pub use self::jwk::PublicKeyJwk;

/// Algorithms usable for signing Parley artifacts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Algorithm {
    /// Ed25519 (COSE label -8, JOSE "EdDSA").
    #[default]
    EdDSA,
}

impl Algorithm {
    /// The JOSE `alg` header value.
    #[must_use]
    pub const fn jose(self) -> &'static str {
        match self {
            Self::EdDSA => "EdDSA",
        }
    }

    /// The COSE algorithm label.
    #[must_use]
    pub const fn cose(self) -> i64 {
        match self {
            Self::EdDSA => -8,
        }
    }
}

/// Anything able to sign on behalf of an issuer. Key custody stays behind
/// the implementation; callers only ever see signatures.
pub trait Signer {
    /// Sign the message, returning the 64-byte Ed25519 signature.
    ///
    /// # Errors
    ///
    /// Fails when the underlying key material is unavailable.
    fn try_sign(&self, msg: &[u8]) -> Result<Vec<u8>>;

    /// The verification method (`kid`) to embed in signed envelopes, e.g.
    /// `did:web:acme.com#key-1`.
    fn verification_method(&self) -> String;

    /// The signing algorithm.
    fn algorithm(&self) -> Algorithm {
        Algorithm::EdDSA
    }
}

/// A [`Signer`] holding its signing key in memory. Used for tests and for
/// short-lived issuance contexts; production custody lives in
/// [`crate::keystore`].
pub struct LocalSigner {
    signing_key: SigningKey,
    verification_method: String,
}

impl LocalSigner {
    /// Create a signer from a PKCS#8 PEM private key.
    ///
    /// # Errors
    ///
    /// Fails when the PEM is not a valid Ed25519 private key.
    pub fn from_pem(private_pem: &str, verification_method: impl Into<String>) -> Result<Self> {
        let signing_key = SigningKey::from_pkcs8_pem(private_pem)
            .map_err(|e| anyhow!("invalid private key PEM: {e}"))?;
        Ok(Self { signing_key, verification_method: verification_method.into() })
    }

    /// Generate a fresh signer.
    #[must_use]
    pub fn generate(verification_method: impl Into<String>) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            verification_method: verification_method.into(),
        }
    }

    /// The public half as a JWK.
    #[must_use]
    pub fn public_jwk(&self) -> PublicKeyJwk {
        PublicKeyJwk::from_verifying_key(&self.signing_key.verifying_key())
    }

    /// The public half as a SubjectPublicKeyInfo PEM.
    ///
    /// # Errors
    ///
    /// Fails when DER/PEM serialization fails.
    pub fn public_pem(&self) -> Result<String> {
        self.signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| anyhow!("issue encoding public key: {e}"))
    }
}

impl Signer for LocalSigner {
    fn try_sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        use ed25519_dalek::Signer as _;
        Ok(self.signing_key.sign(msg).to_bytes().to_vec())
    }

    fn verification_method(&self) -> String {
        self.verification_method.clone()
    }
}

/// Generate an Ed25519 keypair, returning `(public_pem, private_pem)`.
///
/// # Errors
///
/// Fails when PEM serialization fails.
pub fn generate_ed25519_keypair() -> Result<(String, String)> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| anyhow!("issue encoding private key: {e}"))?
        .to_string();
    let public_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| anyhow!("issue encoding public key: {e}"))?;
    Ok((public_pem, private_pem))
}

/// Sign a message with a PKCS#8 PEM private key, returning the 64-byte
/// signature.
///
/// # Errors
///
/// Fails when the PEM is not a valid Ed25519 private key.
pub fn sign(private_pem: &str, msg: &[u8]) -> Result<Vec<u8>> {
    use ed25519_dalek::Signer as _;
    let signing_key = SigningKey::from_pkcs8_pem(private_pem)
        .map_err(|e| anyhow!("invalid private key PEM: {e}"))?;
    Ok(signing_key.sign(msg).to_bytes().to_vec())
}

/// Verify a signature against a SubjectPublicKeyInfo PEM public key.
/// Malformed keys or signatures verify as `false`.
#[must_use]
pub fn verify(public_pem: &str, msg: &[u8], signature: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_public_key_pem(public_pem) else {
        return false;
    };
    verify_with_key(&verifying_key, msg, signature)
}

/// Verify a signature against a parsed key. Malformed signatures verify as
/// `false`.
#[must_use]
pub fn verify_with_key(verifying_key: &VerifyingKey, msg: &[u8], signature: &[u8]) -> bool {
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    verifying_key.verify(msg, &Signature::from_bytes(&sig_bytes)).is_ok()
}

/// SHA-256 digest.
#[must_use]
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// SHA-256 digest as lower-case hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}
