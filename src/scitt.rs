//! # SCITT Transparency Registry
//!
//! A single-writer transparency log for signed statements. Registration
//! appends the statement hash to a Merkle tree, records the new tree head,
//! and emits a COSE_Sign1 receipt binding the entry to the log. Receipts are
//! the durable witness; in proof-only mode the statement itself is not
//! retained.

use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::codec::canonical;
use crate::crypto::cose::{cose_sign1, cose_verify1};
use crate::crypto::{Signer, sha256_hex};
use crate::did::{FetchError, HttpFetcher, did_web_url, host_blocked};
use crate::jose;
use crate::merkle;

/// Registry failures.
#[derive(Error, Debug)]
pub enum ScittError {
    /// Receipt serialization or signing failed.
    #[error("receipt error: {0}")]
    Receipt(#[from] anyhow::Error),

    /// Statement serialization failed.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One log entry.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScittEntry {
    /// Unique entry id.
    pub entry_id: String,

    /// The registered statement; `None` in proof-only mode.
    pub statement: Option<String>,

    /// SHA-256 hex of the statement.
    pub statement_hash: String,

    /// Tree size after this registration.
    pub tree_size: u64,

    /// Merkle root over the leaf-hashed statement hashes of sizes
    /// `1..=tree_size`.
    pub tree_hash: String,

    /// The prior tree head.
    pub parent_hash: Option<String>,

    /// ISO-8601 registration time.
    pub registration_time: String,
}

/// An entry with its stored receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScittRecord {
    /// The entry.
    pub entry: ScittEntry,

    /// COSE_Sign1 receipt bytes.
    pub receipt: Vec<u8>,
}

/// The result handed back at registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScittRegistration {
    /// The inserted entry.
    pub entry: ScittEntry,

    /// The receipt, the caller's durable witness.
    pub receipt: Vec<u8>,
}

/// Injected storage for the log. Implementations provide durable, ordered
/// appends; the registry serializes registrations on its own write lock.
pub trait ScittStore: Send + Sync {
    /// All records, oldest first.
    fn load(&self) -> Vec<ScittRecord>;

    /// Append one record.
    fn append(&self, record: ScittRecord);

    /// Fetch one record by entry id.
    fn get(&self, entry_id: &str) -> Option<ScittRecord>;
}

/// In-memory store for tests and ephemeral logs.
#[derive(Debug, Default)]
pub struct MemoryScittStore {
    records: Mutex<Vec<ScittRecord>>,
}

impl MemoryScittStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScittStore for MemoryScittStore {
    fn load(&self) -> Vec<ScittRecord> {
        self.records.lock().expect("store lock").clone()
    }

    fn append(&self, record: ScittRecord) {
        self.records.lock().expect("store lock").push(record);
    }

    fn get(&self, entry_id: &str) -> Option<ScittRecord> {
        self.records.lock().expect("store lock").iter().find(|r| r.entry.entry_id == entry_id).cloned()
    }
}

/// The transparency registry: a store plus the log's signing key.
pub struct ScittRegistry<St: ScittStore, S: Signer> {
    log_id: String,
    store: St,
    signer: S,
    write_lock: tokio::sync::Mutex<()>,
}

impl<St: ScittStore, S: Signer> ScittRegistry<St, S> {
    /// A registry over the given store, signing receipts as `log_id`.
    #[must_use]
    pub fn new(log_id: impl Into<String>, store: St, signer: S) -> Self {
        Self { log_id: log_id.into(), store, signer, write_lock: tokio::sync::Mutex::new(()) }
    }

    /// Register a statement. With `proof_only`, the statement is hashed and
    /// proven but not retained. Registration is atomic relative to other
    /// registrations on this registry.
    ///
    /// # Errors
    ///
    /// Fails when receipt signing fails.
    pub async fn register(
        &self, statement: &str, proof_only: bool,
    ) -> Result<ScittRegistration, ScittError> {
        let _guard = self.write_lock.lock().await;

        let statement_hash = sha256_hex(statement.as_bytes());
        let existing = self.store.load();

        let mut leaves: Vec<[u8; 32]> = existing
            .iter()
            .map(|r| merkle::leaf_hash(r.entry.statement_hash.as_bytes()))
            .collect();
        leaves.push(merkle::leaf_hash(statement_hash.as_bytes()));

        let tree_size = existing.len() as u64 + 1;
        let tree_hash = hex::encode(merkle::merkle_root(&leaves));
        let parent_hash = existing.last().map(|r| r.entry.tree_hash.clone());
        let registration_time = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let entry = ScittEntry {
            entry_id: Uuid::new_v4().to_string(),
            statement: (!proof_only).then(|| statement.to_string()),
            statement_hash,
            tree_size,
            tree_hash,
            parent_hash,
            registration_time,
        };

        let payload = canonical::canonicalize(&json!({
            "logId": self.log_id,
            "entryId": entry.entry_id,
            "treeSize": entry.tree_size,
            "treeHash": entry.tree_hash,
            "statementHash": entry.statement_hash,
            "registrationTime": entry.registration_time,
        }))?;
        let receipt = cose_sign1(payload.as_bytes(), &self.signer)?;

        self.store.append(ScittRecord { entry: entry.clone(), receipt: receipt.clone() });
        info!(entry_id = %entry.entry_id, tree_size, "registered statement");
        Ok(ScittRegistration { entry, receipt })
    }

    /// The stored receipt for an entry.
    #[must_use]
    pub fn get_receipt(&self, entry_id: &str) -> Option<Vec<u8>> {
        self.store.get(entry_id).map(|r| r.receipt)
    }

    /// Re-verify a stored receipt under the log's public key, checking that
    /// the signed payload binds this entry.
    #[must_use]
    pub fn verify_receipt(&self, entry_id: &str, log_key: &VerifyingKey) -> bool {
        let Some(record) = self.store.get(entry_id) else {
            return false;
        };
        let (verified, payload) = cose_verify1(&record.receipt, log_key);
        if !verified {
            return false;
        }
        let Ok(bound) = serde_json::from_slice::<Value>(&payload) else {
            return false;
        };
        bound.get("entryId").and_then(Value::as_str) == Some(entry_id)
            && bound.get("statementHash").and_then(Value::as_str)
                == Some(record.entry.statement_hash.as_str())
    }

    /// List entries newest-first, with pagination and optional issuer /
    /// framework filters. Statement JWTs are decoded payload-only (no
    /// signature check) for display; proof-only entries bypass the filters
    /// and list with `"unknown"` fields.
    #[must_use]
    pub fn list_entries(&self, query: &ListQuery) -> ScittList {
        let mut records = self.store.load();
        records.sort_by(|a, b| b.entry.tree_size.cmp(&a.entry.tree_size));

        let matching: Vec<ScittListEntry> = records
            .iter()
            .map(|r| ScittListEntry::from_record(r))
            .filter(|e| query.matches(e))
            .collect();

        let limit = query.limit.unwrap_or(20);
        let offset = query.offset.unwrap_or(0);
        let page: Vec<ScittListEntry> = matching.into_iter().skip(offset).take(limit).collect();

        ScittList {
            pagination: Pagination { limit, offset, count: page.len() },
            entries: page,
        }
    }

    /// Aggregate the history of one issuer: totals, framework union,
    /// average score, provenance histogram, and the 20 most recent entries.
    #[must_use]
    pub fn issuer_profile(&self, did: &str) -> IssuerProfile {
        let mut records = self.store.load();
        records.sort_by(|a, b| b.entry.tree_size.cmp(&a.entry.tree_size));

        let entries: Vec<ScittListEntry> = records
            .iter()
            .map(|r| ScittListEntry::from_record(r))
            .filter(|e| e.issuer == did)
            .collect();

        let mut frameworks: Vec<String> = Vec::new();
        let mut histogram = ProvenanceHistogram::default();
        let mut score_sum = 0u64;
        let mut score_count = 0u64;
        for entry in &entries {
            for framework in &entry.frameworks {
                if !frameworks.contains(framework) {
                    frameworks.push(framework.clone());
                }
            }
            if let Some(score) = entry.overall_score {
                score_sum += u64::from(score);
                score_count += 1;
            }
            match entry.provenance.as_deref() {
                Some("auditor") => histogram.auditor += 1,
                Some("tool") => histogram.tool += 1,
                Some("self") => histogram.self_asserted += 1,
                _ => {}
            }
        }

        IssuerProfile {
            issuer: did.to_string(),
            total_entries: entries.len(),
            frameworks,
            average_score: if score_count == 0 {
                None
            } else {
                Some(score_sum as f64 / score_count as f64)
            },
            provenance: histogram,
            last_registration: entries.first().map(|e| e.registration_time.clone()),
            recent: entries.into_iter().take(20).collect(),
        }
    }
}

/// Query for [`ScittRegistry::list_entries`].
#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    /// Page size; default 20.
    pub limit: Option<usize>,

    /// Page offset; default 0.
    pub offset: Option<usize>,

    /// Keep only entries whose statement was issued by this DID.
    pub issuer: Option<String>,

    /// Keep only entries claiming this framework.
    pub framework: Option<String>,
}

impl ListQuery {
    fn matches(&self, entry: &ScittListEntry) -> bool {
        if entry.proof_only {
            // no decodable statement: filters cannot apply
            return true;
        }
        if let Some(issuer) = &self.issuer {
            if &entry.issuer != issuer {
                return false;
            }
        }
        if let Some(framework) = &self.framework {
            if !entry.frameworks.contains(framework) {
                return false;
            }
        }
        true
    }
}

/// A display row for one entry.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScittListEntry {
    /// Entry id.
    pub entry_id: String,

    /// Issuer DID, `"unknown"` for proof-only entries.
    pub issuer: String,

    /// Frameworks the statement claims.
    pub frameworks: Vec<String>,

    /// Claimed overall score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<u8>,

    /// Provenance class (`self` / `tool` / `auditor`) derived from the
    /// statement's source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,

    /// Registration time.
    pub registration_time: String,

    /// Tree size at registration.
    pub tree_size: u64,

    /// Whether the statement was registered proof-only.
    pub proof_only: bool,
}

impl ScittListEntry {
    fn from_record(record: &ScittRecord) -> Self {
        let entry = &record.entry;
        let decoded = entry.statement.as_deref().and_then(|s| jose::decode_unverified(s).ok());

        match decoded {
            Some(jwt) => {
                let subject = &jwt.claims["vc"]["credentialSubject"];
                Self {
                    entry_id: entry.entry_id.clone(),
                    issuer: jwt
                        .claims
                        .get("iss")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    frameworks: subject
                        .get("frameworks")
                        .and_then(Value::as_array)
                        .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                        .unwrap_or_default(),
                    overall_score: subject
                        .pointer("/summary/overallScore")
                        .and_then(Value::as_u64)
                        .and_then(|s| u8::try_from(s).ok()),
                    provenance: subject
                        .pointer("/provenance/source")
                        .and_then(Value::as_str)
                        .map(provenance_class),
                    registration_time: entry.registration_time.clone(),
                    tree_size: entry.tree_size,
                    proof_only: false,
                }
            }
            None => Self {
                entry_id: entry.entry_id.clone(),
                issuer: "unknown".to_string(),
                frameworks: Vec::new(),
                overall_score: None,
                provenance: None,
                registration_time: entry.registration_time.clone(),
                tree_size: entry.tree_size,
                proof_only: entry.statement.is_none(),
            },
        }
    }
}

/// Map a statement source to its provenance class.
fn provenance_class(source: &str) -> String {
    match source {
        "soc2" | "iso27001" => "auditor".to_string(),
        "manual" => "self".to_string(),
        _ => "tool".to_string(),
    }
}

/// Provenance histogram for an issuer profile.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProvenanceHistogram {
    /// Self-asserted statements.
    #[serde(rename = "self")]
    pub self_asserted: usize,

    /// Tool-produced statements.
    pub tool: usize,

    /// Auditor-attested statements.
    pub auditor: usize,
}

/// Aggregated history for one issuer.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerProfile {
    /// The issuer DID.
    pub issuer: String,

    /// Total registered entries.
    pub total_entries: usize,

    /// Union of claimed frameworks.
    pub frameworks: Vec<String>,

    /// Mean of claimed overall scores.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_score: Option<f64>,

    /// Provenance histogram.
    pub provenance: ProvenanceHistogram,

    /// Most recent registration time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_registration: Option<String>,

    /// The 20 most recent entries, newest first.
    pub recent: Vec<ScittListEntry>,
}

/// Pagination echo of a list response.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Pagination {
    /// Requested page size.
    pub limit: usize,

    /// Requested offset.
    pub offset: usize,

    /// Rows in this page.
    pub count: usize,
}

/// A page of list entries.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ScittList {
    /// The rows.
    pub entries: Vec<ScittListEntry>,

    /// Pagination echo.
    pub pagination: Pagination,
}

/// Client-side failures when querying a remote log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Only HTTPS endpoints are queried.
    #[error("non_https")]
    NonHttps,

    /// The endpoint host is in the reserved blocklist.
    #[error("blocked_host: {0}")]
    BlockedHost(String),

    /// Transport failure.
    #[error("transport: {0}")]
    Transport(String),

    /// Non-success status.
    #[error("http_{0}")]
    Http(u16),

    /// The response was not a list payload.
    #[error("parse_error: {0}")]
    Parse(String),
}

/// Fetch a page of entries from a remote log's list endpoint. Rejects
/// non-HTTPS URLs and blocked hosts before any fetch.
///
/// # Errors
///
/// Returns a [`ClientError`] naming the failure.
pub async fn fetch_entries<F: HttpFetcher>(
    base_url: &str, fetcher: &F,
) -> Result<ScittList, ClientError> {
    let Some(rest) = base_url.strip_prefix("https://") else {
        return Err(ClientError::NonHttps);
    };
    let host = rest.split(['/', ':']).next().unwrap_or_default();
    if host_blocked(host) {
        return Err(ClientError::BlockedHost(host.to_string()));
    }

    let response = fetcher.get(base_url).await.map_err(|e| match e {
        FetchError::Timeout => ClientError::Transport("timeout".to_string()),
        FetchError::Transport(msg) => ClientError::Transport(msg),
    })?;
    if response.status != 200 {
        return Err(ClientError::Http(response.status));
    }
    serde_json::from_slice(&response.body).map_err(|e| ClientError::Parse(e.to_string()))
}

/// Resolve a log's list endpoint from its operator DID, for discovery flows.
///
/// # Errors
///
/// Fails when the DID is not `did:web` or its host is blocked.
pub fn list_endpoint_for(did: &str) -> Result<String, ClientError> {
    let (host, _) = did_web_url(did).map_err(|e| ClientError::Parse(e.to_string()))?;
    Ok(format!("https://{host}/scitt/entries"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LocalSigner;

    fn registry() -> ScittRegistry<MemoryScittStore, LocalSigner> {
        ScittRegistry::new(
            "log.grcorsair.com",
            MemoryScittStore::new(),
            LocalSigner::generate("did:web:log.grcorsair.com#key-1"),
        )
    }

    #[tokio::test]
    async fn tree_heads_follow_the_merkle_rule() {
        let registry = registry();
        let a = registry.register("A", false).await.expect("should register");
        let b = registry.register("B", false).await.expect("should register");

        assert_eq!(a.entry.tree_size, 1);
        assert_eq!(b.entry.tree_size, 2);
        assert_eq!(b.entry.parent_hash.as_deref(), Some(a.entry.tree_hash.as_str()));

        // treeHash after B = node(leaf(h(A)), leaf(h(B)))
        let ha = sha256_hex(b"A");
        let hb = sha256_hex(b"B");
        let expected = merkle::node_hash(
            &merkle::leaf_hash(ha.as_bytes()),
            &merkle::leaf_hash(hb.as_bytes()),
        );
        assert_eq!(b.entry.tree_hash, hex::encode(expected));
    }

    #[tokio::test]
    async fn receipts_verify_under_the_log_key() {
        let signer = LocalSigner::generate("did:web:log.grcorsair.com#key-1");
        let log_key = signer.public_jwk().to_verifying_key().expect("should parse");
        let registry = ScittRegistry::new("log.grcorsair.com", MemoryScittStore::new(), signer);

        let a = registry.register("A", false).await.expect("should register");
        let b = registry.register("B", false).await.expect("should register");

        assert!(registry.verify_receipt(&a.entry.entry_id, &log_key));
        assert!(registry.verify_receipt(&b.entry.entry_id, &log_key));

        let other = LocalSigner::generate("did:web:other.com#key-1")
            .public_jwk()
            .to_verifying_key()
            .expect("should parse");
        assert!(!registry.verify_receipt(&a.entry.entry_id, &other));
        assert!(!registry.verify_receipt("missing", &log_key));
    }

    #[tokio::test]
    async fn listing_is_newest_first_with_pagination() {
        let registry = registry();
        registry.register("A", false).await.expect("should register");
        registry.register("B", false).await.expect("should register");
        registry.register("C", false).await.expect("should register");

        let list = registry.list_entries(&ListQuery { limit: Some(10), ..ListQuery::default() });
        assert_eq!(list.entries.len(), 3);
        assert_eq!(list.pagination.count, 3);
        assert!(list.entries[0].tree_size > list.entries[2].tree_size);

        let page = registry.list_entries(&ListQuery {
            limit: Some(1),
            offset: Some(1),
            ..ListQuery::default()
        });
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].tree_size, 2);
    }

    #[tokio::test]
    async fn proof_only_entries_keep_no_statement_but_stay_provable() {
        let signer = LocalSigner::generate("did:web:log.grcorsair.com#key-1");
        let log_key = signer.public_jwk().to_verifying_key().expect("should parse");
        let registry = ScittRegistry::new("log.grcorsair.com", MemoryScittStore::new(), signer);

        let registration = registry.register("secret statement", true).await.expect("should register");
        assert_eq!(registration.entry.statement, None);
        assert_eq!(registration.entry.statement_hash, sha256_hex(b"secret statement"));
        assert!(registry.verify_receipt(&registration.entry.entry_id, &log_key));

        // bypasses filters and lists as unknown
        let list = registry.list_entries(&ListQuery {
            issuer: Some("did:web:acme.com".to_string()),
            ..ListQuery::default()
        });
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].issuer, "unknown");
        assert!(list.entries[0].proof_only);
    }

    #[tokio::test]
    async fn client_rejects_non_https_and_blocked_hosts() {
        #[derive(Clone)]
        struct NoRoute;
        impl HttpFetcher for NoRoute {
            async fn get(
                &self, url: &str,
            ) -> Result<crate::did::FetchResponse, FetchError> {
                Err(FetchError::Transport(format!("no route to {url}")))
            }
        }

        assert_eq!(
            fetch_entries("http://log.example.com/entries", &NoRoute).await,
            Err(ClientError::NonHttps)
        );
        assert!(matches!(
            fetch_entries("https://192.168.1.9/entries", &NoRoute).await,
            Err(ClientError::BlockedHost(_))
        ));
    }
}
