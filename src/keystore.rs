//! # Key Management
//!
//! Custody of issuer signing keys. Keys move through the monotonic states
//! pending → active → retired; only active keys sign, while retired keys
//! remain trusted for verification until expunged. Private key material
//! never leaves a [`KeyManager`] except through the `sign` operation — it is
//! never logged and never serialized in the clear.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Algorithm, PublicKeyJwk, Signer};

/// Keystore failures.
#[derive(Error, Debug)]
pub enum KeystoreError {
    /// No key with that id.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A key already exists with that id.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// Key states only move forward.
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: KeyState,
        /// Requested state.
        to: KeyState,
    },

    /// Only active keys sign.
    #[error("key {0} is not active")]
    NotActive(String),

    /// Backing storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Key material could not be encoded or decrypted.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<std::io::Error> for KeystoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for KeystoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Lifecycle state of a key. Transitions are monotonic.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    /// Created, not yet trusted for signing.
    Pending,
    /// Signing and verification.
    Active,
    /// Verification only, until expunged.
    Retired,
}

impl KeyState {
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Retired => 2,
        }
    }
}

/// Public view of a managed key.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    /// Key id.
    pub kid: String,

    /// Lifecycle state.
    pub state: KeyState,

    /// SubjectPublicKeyInfo PEM of the public half.
    pub public_pem: String,
}

/// Custody boundary for signing keys.
pub trait KeyManager: Send + Sync {
    /// Generate a new key in `pending` state.
    ///
    /// # Errors
    ///
    /// Fails when the id is taken or storage fails.
    fn create_key(&self, kid: &str) -> Result<KeyInfo, KeystoreError>;

    /// Move a key to a later state. Backward transitions fail.
    ///
    /// # Errors
    ///
    /// Fails on unknown keys or non-monotonic transitions.
    fn transition(&self, kid: &str, to: KeyState) -> Result<(), KeystoreError>;

    /// The public half as PEM.
    ///
    /// # Errors
    ///
    /// Fails on unknown keys.
    fn public_pem(&self, kid: &str) -> Result<String, KeystoreError>;

    /// The public half as a JWK.
    ///
    /// # Errors
    ///
    /// Fails on unknown keys.
    fn public_jwk(&self, kid: &str) -> Result<PublicKeyJwk, KeystoreError>;

    /// Sign with an active key.
    ///
    /// # Errors
    ///
    /// Fails on unknown or non-active keys.
    fn sign(&self, kid: &str, msg: &[u8]) -> Result<Vec<u8>, KeystoreError>;

    /// All keys, public view only.
    ///
    /// # Errors
    ///
    /// Fails when storage fails.
    fn list(&self) -> Result<Vec<KeyInfo>, KeystoreError>;
}

fn check_transition(from: KeyState, to: KeyState) -> Result<(), KeystoreError> {
    if to.rank() > from.rank() {
        Ok(())
    } else {
        Err(KeystoreError::InvalidTransition { from, to })
    }
}

fn public_pem_of(key: &SigningKey) -> Result<String, KeystoreError> {
    key.verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeystoreError::Crypto(e.to_string()))
}

fn sign_with(key: &SigningKey, msg: &[u8]) -> Vec<u8> {
    use ed25519_dalek::Signer as _;
    key.sign(msg).to_bytes().to_vec()
}

/// A [`Signer`] facade over one managed key, for the issuance APIs.
pub struct ManagedSigner<'a, K: KeyManager> {
    manager: &'a K,
    kid: String,
    verification_method: String,
}

impl<'a, K: KeyManager> ManagedSigner<'a, K> {
    /// Bind a managed key to a verification method, e.g.
    /// `did:web:acme.com#key-1`.
    #[must_use]
    pub fn new(manager: &'a K, kid: impl Into<String>, verification_method: impl Into<String>) -> Self {
        Self { manager, kid: kid.into(), verification_method: verification_method.into() }
    }
}

impl<K: KeyManager> Signer for ManagedSigner<'_, K> {
    fn try_sign(&self, msg: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.manager.sign(&self.kid, msg)?)
    }

    fn verification_method(&self) -> String {
        self.verification_method.clone()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::EdDSA
    }
}

// ---------------------------------------------------------------------------
// in-memory
// ---------------------------------------------------------------------------

struct MemoryKey {
    signing: SigningKey,
    state: KeyState,
}

/// Keys held in process memory. For tests and short-lived issuers.
#[derive(Default)]
pub struct MemoryKeyManager {
    keys: Mutex<HashMap<String, MemoryKey>>,
}

impl MemoryKeyManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyManager for MemoryKeyManager {
    fn create_key(&self, kid: &str) -> Result<KeyInfo, KeystoreError> {
        let mut keys = self.keys.lock().expect("keystore lock");
        if keys.contains_key(kid) {
            return Err(KeystoreError::AlreadyExists(kid.to_string()));
        }
        let signing = SigningKey::generate(&mut OsRng);
        let public_pem = public_pem_of(&signing)?;
        keys.insert(kid.to_string(), MemoryKey { signing, state: KeyState::Pending });
        Ok(KeyInfo { kid: kid.to_string(), state: KeyState::Pending, public_pem })
    }

    fn transition(&self, kid: &str, to: KeyState) -> Result<(), KeystoreError> {
        let mut keys = self.keys.lock().expect("keystore lock");
        let key = keys.get_mut(kid).ok_or_else(|| KeystoreError::NotFound(kid.to_string()))?;
        check_transition(key.state, to)?;
        key.state = to;
        Ok(())
    }

    fn public_pem(&self, kid: &str) -> Result<String, KeystoreError> {
        let keys = self.keys.lock().expect("keystore lock");
        let key = keys.get(kid).ok_or_else(|| KeystoreError::NotFound(kid.to_string()))?;
        public_pem_of(&key.signing)
    }

    fn public_jwk(&self, kid: &str) -> Result<PublicKeyJwk, KeystoreError> {
        let keys = self.keys.lock().expect("keystore lock");
        let key = keys.get(kid).ok_or_else(|| KeystoreError::NotFound(kid.to_string()))?;
        Ok(PublicKeyJwk::from_verifying_key(&key.signing.verifying_key()))
    }

    fn sign(&self, kid: &str, msg: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        let keys = self.keys.lock().expect("keystore lock");
        let key = keys.get(kid).ok_or_else(|| KeystoreError::NotFound(kid.to_string()))?;
        if key.state != KeyState::Active {
            return Err(KeystoreError::NotActive(kid.to_string()));
        }
        Ok(sign_with(&key.signing, msg))
    }

    fn list(&self) -> Result<Vec<KeyInfo>, KeystoreError> {
        let keys = self.keys.lock().expect("keystore lock");
        let mut infos = Vec::with_capacity(keys.len());
        for (kid, key) in keys.iter() {
            infos.push(KeyInfo {
                kid: kid.clone(),
                state: key.state,
                public_pem: public_pem_of(&key.signing)?,
            });
        }
        infos.sort_by(|a, b| a.kid.cmp(&b.kid));
        Ok(infos)
    }
}

// ---------------------------------------------------------------------------
// filesystem
// ---------------------------------------------------------------------------

/// Keys held as PKCS#8 PEM files under a directory, one `<kid>.pem` +
/// `<kid>.state` pair per key.
pub struct FsKeyManager {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FsKeyManager {
    /// Open (creating if needed) a key directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, lock: Mutex::new(()) })
    }

    fn key_path(&self, kid: &str) -> PathBuf {
        self.dir.join(format!("{}.pem", sanitize_kid(kid)))
    }

    fn state_path(&self, kid: &str) -> PathBuf {
        self.dir.join(format!("{}.state", sanitize_kid(kid)))
    }

    fn load(&self, kid: &str) -> Result<(SigningKey, KeyState), KeystoreError> {
        let path = self.key_path(kid);
        if !path.exists() {
            return Err(KeystoreError::NotFound(kid.to_string()));
        }
        let pem = std::fs::read_to_string(&path)?;
        let signing =
            SigningKey::from_pkcs8_pem(&pem).map_err(|e| KeystoreError::Crypto(e.to_string()))?;
        let state_raw = std::fs::read_to_string(self.state_path(kid))?;
        let state: KeyState = serde_json::from_str(&state_raw)
            .map_err(|e| KeystoreError::Storage(e.to_string()))?;
        Ok((signing, state))
    }
}

fn sanitize_kid(kid: &str) -> String {
    kid.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

impl KeyManager for FsKeyManager {
    fn create_key(&self, kid: &str) -> Result<KeyInfo, KeystoreError> {
        let _guard = self.lock.lock().expect("keystore lock");
        let path = self.key_path(kid);
        if path.exists() {
            return Err(KeystoreError::AlreadyExists(kid.to_string()));
        }
        let signing = SigningKey::generate(&mut OsRng);
        let pem = signing
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeystoreError::Crypto(e.to_string()))?;
        std::fs::write(&path, pem.as_bytes())?;
        let state = serde_json::to_string(&KeyState::Pending)
            .map_err(|e| KeystoreError::Storage(e.to_string()))?;
        std::fs::write(self.state_path(kid), state)?;
        Ok(KeyInfo {
            kid: kid.to_string(),
            state: KeyState::Pending,
            public_pem: public_pem_of(&signing)?,
        })
    }

    fn transition(&self, kid: &str, to: KeyState) -> Result<(), KeystoreError> {
        let _guard = self.lock.lock().expect("keystore lock");
        let (_, state) = self.load(kid)?;
        check_transition(state, to)?;
        std::fs::write(
            self.state_path(kid),
            serde_json::to_string(&to).map_err(|e| KeystoreError::Storage(e.to_string()))?,
        )?;
        Ok(())
    }

    fn public_pem(&self, kid: &str) -> Result<String, KeystoreError> {
        let (signing, _) = self.load(kid)?;
        public_pem_of(&signing)
    }

    fn public_jwk(&self, kid: &str) -> Result<PublicKeyJwk, KeystoreError> {
        let (signing, _) = self.load(kid)?;
        Ok(PublicKeyJwk::from_verifying_key(&signing.verifying_key()))
    }

    fn sign(&self, kid: &str, msg: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        let _guard = self.lock.lock().expect("keystore lock");
        let (signing, state) = self.load(kid)?;
        if state != KeyState::Active {
            return Err(KeystoreError::NotActive(kid.to_string()));
        }
        Ok(sign_with(&signing, msg))
    }

    fn list(&self) -> Result<Vec<KeyInfo>, KeystoreError> {
        let mut infos = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "pem") {
                let kid = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let (signing, state) = self.load(&kid)?;
                infos.push(KeyInfo { kid, state, public_pem: public_pem_of(&signing)? });
            }
        }
        infos.sort_by(|a, b| a.kid.cmp(&b.kid));
        Ok(infos)
    }
}

// ---------------------------------------------------------------------------
// encrypted SQL
// ---------------------------------------------------------------------------

/// Keys at rest in an embedded SQL database, private halves sealed with
/// AES-256-GCM. Each stored blob is `IV (12 bytes) || auth tag (16 bytes) ||
/// ciphertext` over the 32-byte signing seed.
pub struct SqlKeyManager {
    conn: Mutex<rusqlite::Connection>,
    master_key: [u8; 32],
}

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

impl SqlKeyManager {
    /// Open (creating if needed) a database at the path, sealed under the
    /// caller-held master key.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>, master_key: [u8; 32]) -> Result<Self, KeystoreError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS keys (
                kid TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                public_pem TEXT NOT NULL,
                private_blob BLOB NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn), master_key })
    }

    fn seal(&self, seed: &[u8; 32]) -> Result<Vec<u8>, KeystoreError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.master_key));
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), seed.as_slice())
            .map_err(|_| KeystoreError::Crypto("seal failed".to_string()))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut blob = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(tag);
        blob.extend_from_slice(ciphertext);
        Ok(blob)
    }

    fn unseal(&self, blob: &[u8]) -> Result<SigningKey, KeystoreError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(KeystoreError::Crypto("sealed blob too short".to_string()));
        }
        let (nonce, rest) = blob.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.master_key));
        let seed = cipher
            .decrypt(Nonce::from_slice(nonce), sealed.as_slice())
            .map_err(|_| KeystoreError::Crypto("unseal failed".to_string()))?;
        let seed: [u8; 32] =
            seed.as_slice().try_into().map_err(|_| KeystoreError::Crypto("bad seed".to_string()))?;
        Ok(SigningKey::from_bytes(&seed))
    }

    fn row(&self, kid: &str) -> Result<(KeyState, String, Vec<u8>), KeystoreError> {
        let conn = self.conn.lock().expect("keystore lock");
        conn.query_row(
            "SELECT state, public_pem, private_blob FROM keys WHERE kid = ?1",
            [kid],
            |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => KeystoreError::NotFound(kid.to_string()),
            other => other.into(),
        })
        .and_then(|(state, public_pem, blob)| {
            let state: KeyState = serde_json::from_str(&format!("\"{state}\""))
                .map_err(|e| KeystoreError::Storage(e.to_string()))?;
            Ok((state, public_pem, blob))
        })
    }
}

impl KeyManager for SqlKeyManager {
    fn create_key(&self, kid: &str) -> Result<KeyInfo, KeystoreError> {
        let signing = SigningKey::generate(&mut OsRng);
        let public_pem = public_pem_of(&signing)?;
        let blob = self.seal(&signing.to_bytes())?;

        let conn = self.conn.lock().expect("keystore lock");
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO keys (kid, state, public_pem, private_blob)
             VALUES (?1, 'pending', ?2, ?3)",
            rusqlite::params![kid, public_pem, blob],
        )?;
        if inserted == 0 {
            return Err(KeystoreError::AlreadyExists(kid.to_string()));
        }
        Ok(KeyInfo { kid: kid.to_string(), state: KeyState::Pending, public_pem })
    }

    fn transition(&self, kid: &str, to: KeyState) -> Result<(), KeystoreError> {
        let (state, _, _) = self.row(kid)?;
        check_transition(state, to)?;
        let state_str = serde_json::to_string(&to)
            .map_err(|e| KeystoreError::Storage(e.to_string()))?
            .trim_matches('"')
            .to_string();
        let conn = self.conn.lock().expect("keystore lock");
        conn.execute("UPDATE keys SET state = ?1 WHERE kid = ?2", rusqlite::params![state_str, kid])?;
        Ok(())
    }

    fn public_pem(&self, kid: &str) -> Result<String, KeystoreError> {
        Ok(self.row(kid)?.1)
    }

    fn public_jwk(&self, kid: &str) -> Result<PublicKeyJwk, KeystoreError> {
        let (_, _, blob) = self.row(kid)?;
        let signing = self.unseal(&blob)?;
        Ok(PublicKeyJwk::from_verifying_key(&signing.verifying_key()))
    }

    fn sign(&self, kid: &str, msg: &[u8]) -> Result<Vec<u8>, KeystoreError> {
        let (state, _, blob) = self.row(kid)?;
        if state != KeyState::Active {
            return Err(KeystoreError::NotActive(kid.to_string()));
        }
        let signing = self.unseal(&blob)?;
        Ok(sign_with(&signing, msg))
    }

    fn list(&self) -> Result<Vec<KeyInfo>, KeystoreError> {
        let conn = self.conn.lock().expect("keystore lock");
        let mut statement = conn.prepare("SELECT kid, state, public_pem FROM keys ORDER BY kid")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut infos = Vec::new();
        for row in rows {
            let (kid, state, public_pem) = row?;
            let state: KeyState = serde_json::from_str(&format!("\"{state}\""))
                .map_err(|e| KeystoreError::Storage(e.to_string()))?;
            infos.push(KeyInfo { kid, state, public_pem });
        }
        Ok(infos)
    }
}
