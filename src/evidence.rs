//! # Evidence Chain
//!
//! The append-only JSONL evidence log. Every record carries the hash of its
//! predecessor and the SHA-256 of its own canonical JSON, so any edit to
//! history is detectable by re-reading the file. Chains are identified by a
//! Merkle digest over their record hashes, and individual records can be
//! proven present with a `CorsairEvidenceReceipt`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::codec::canonical;
use crate::crypto::sha256_hex;
use crate::merkle::{self, Direction, ProofStep};

/// Evidence-chain failures.
#[derive(Error, Debug)]
pub enum EvidenceError {
    /// The sink could not be read or written.
    #[error("evidence sink error: {0}")]
    Sink(#[from] std::io::Error),

    /// A record could not be serialized.
    #[error("record serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The sink holds records that do not form a valid chain.
    #[error("evidence chain is broken at record {0}")]
    Broken(usize),

    /// The requested record does not exist.
    #[error("record index {0} out of range")]
    OutOfRange(usize),
}

/// The operation a record witnesses.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChainOperation {
    /// A source document entered the pipeline.
    DocumentIngested,
    /// A document was normalized to canonical control evidence.
    EvidenceNormalized,
    /// Assurance scoring and gating ran over normalized evidence.
    AssuranceEvaluated,
    /// A CPOE was signed.
    CpoeIssued,
    /// A CPOE was registered in a transparency log.
    CpoeRegistered,
    /// An operation recorded by a foreign writer.
    #[serde(untagged)]
    Other(String),
}

/// One append-only JSONL row.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRecord {
    /// Strictly increasing, starting at 1.
    pub sequence: u64,

    /// ISO-8601 timestamp of the append.
    pub timestamp: String,

    /// The operation witnessed.
    pub operation: ChainOperation,

    /// Opaque operation payload.
    pub data: Value,

    /// The `hash` of the preceding record; `None` for the first record.
    pub previous_hash: Option<String>,

    /// SHA-256 of the canonical JSON of this record without `hash`.
    pub hash: String,
}

/// Result of re-verifying a chain from its sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainVerification {
    /// Whether every record's hash and linkage checked out.
    pub valid: bool,

    /// Number of rows in the file.
    pub record_count: usize,

    /// 1-indexed row of the first failure, when invalid.
    pub broken_at: Option<usize>,
}

/// Where chain rows are persisted. Writes must be durable and ordered;
/// concurrent writers are excluded by the `&mut self` receiver on
/// [`EvidenceChain::append`].
pub trait EvidenceSink {
    /// Append one line (no trailing newline) durably.
    ///
    /// # Errors
    ///
    /// Fails when the line cannot be written.
    fn append_line(&mut self, line: &str) -> Result<(), EvidenceError>;

    /// Read the full sink contents.
    ///
    /// # Errors
    ///
    /// Fails when the sink cannot be read.
    fn read_all(&self) -> Result<String, EvidenceError>;
}

/// Append-only `.jsonl` file sink.
#[derive(Clone, Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Create a sink at the given path. The file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EvidenceSink for FileSink {
    fn append_line(&mut self, line: &str) -> Result<(), EvidenceError> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        Ok(())
    }

    fn read_all(&self) -> Result<String, EvidenceError> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// In-memory sink for tests and ephemeral pipelines.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    buf: String,
}

impl MemorySink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvidenceSink for MemorySink {
    fn append_line(&mut self, line: &str) -> Result<(), EvidenceError> {
        self.buf.push_str(line);
        self.buf.push('\n');
        Ok(())
    }

    fn read_all(&self) -> Result<String, EvidenceError> {
        Ok(self.buf.clone())
    }
}

/// Single-writer view over an evidence sink. The `(sequence, last_hash)`
/// pair is the exclusive append token; owning the chain mutably is owning
/// the token.
#[derive(Debug)]
pub struct EvidenceChain<S: EvidenceSink> {
    sink: S,
    sequence: u64,
    last_hash: Option<String>,
}

impl<S: EvidenceSink> EvidenceChain<S> {
    /// Open a chain over an empty sink.
    #[must_use]
    pub const fn new(sink: S) -> Self {
        Self { sink, sequence: 0, last_hash: None }
    }

    /// Resume a chain from a sink holding prior records.
    ///
    /// # Errors
    ///
    /// Fails when the existing content does not verify.
    pub fn resume(sink: S) -> Result<Self, EvidenceError> {
        let content = sink.read_all()?;
        let verification = verify_chain(&content);
        if let Some(row) = verification.broken_at {
            return Err(EvidenceError::Broken(row));
        }
        let last = content.lines().filter(|l| !l.trim().is_empty()).last();
        let (sequence, last_hash) = match last {
            Some(line) => {
                let record: EvidenceRecord = serde_json::from_str(line)?;
                (record.sequence, Some(record.hash))
            }
            None => (0, None),
        };
        Ok(Self { sink, sequence, last_hash })
    }

    /// Append one operation, returning the durable record.
    ///
    /// # Errors
    ///
    /// Fails when serialization or the sink write fails.
    pub fn append(
        &mut self, operation: ChainOperation, data: Value,
    ) -> Result<EvidenceRecord, EvidenceError> {
        let sequence = self.sequence + 1;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let previous_hash = self.last_hash.clone();

        let hash = record_hash(sequence, &timestamp, &operation, &data, previous_hash.as_deref())?;
        let record = EvidenceRecord { sequence, timestamp, operation, data, previous_hash, hash };

        let line = serde_json::to_string(&record)?;
        self.sink.append_line(&line)?;

        self.sequence = sequence;
        self.last_hash = Some(record.hash.clone());
        debug!(sequence, "appended evidence record");
        Ok(record)
    }

    /// Re-verify the full chain from the sink.
    ///
    /// # Errors
    ///
    /// Fails when the sink cannot be read.
    pub fn verify(&self) -> Result<ChainVerification, EvidenceError> {
        Ok(verify_chain(&self.sink.read_all()?))
    }

    /// All records currently in the sink.
    ///
    /// # Errors
    ///
    /// Fails when the sink cannot be read or a row cannot be parsed.
    pub fn records(&self) -> Result<Vec<EvidenceRecord>, EvidenceError> {
        let content = self.sink.read_all()?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(EvidenceError::from))
            .collect()
    }

    /// The chain's Merkle identity.
    ///
    /// # Errors
    ///
    /// Fails when the sink cannot be read or a row cannot be parsed.
    pub fn digest(&self) -> Result<String, EvidenceError> {
        Ok(chain_digest(&self.records()?))
    }

    /// Emit a receipt proving the record at `index` (0-based) is in this
    /// chain.
    ///
    /// # Errors
    ///
    /// Fails when the index is out of range or the sink cannot be read.
    pub fn receipt(&self, index: usize) -> Result<EvidenceReceipt, EvidenceError> {
        let records = self.records()?;
        let verification = self.verify()?;
        issue_receipt(&records, verification.valid, index)
    }
}

fn record_hash(
    sequence: u64, timestamp: &str, operation: &ChainOperation, data: &Value,
    previous_hash: Option<&str>,
) -> Result<String, EvidenceError> {
    let unhashed = json!({
        "sequence": sequence,
        "timestamp": timestamp,
        "operation": serde_json::to_value(operation)?,
        "data": data,
        "previousHash": previous_hash,
    });
    Ok(sha256_hex(canonical::to_canonical_string(&unhashed).as_bytes()))
}

/// Re-verify a chain from raw JSONL content: each record's hash is
/// recomputed from its own fields, and each `previousHash` must equal the
/// predecessor's `hash`. Malformed rows break the chain at their row; no
/// failure raises.
#[must_use]
pub fn verify_chain(content: &str) -> ChainVerification {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let record_count = lines.len();
    let mut prior_hash: Option<String> = None;

    for (i, line) in lines.iter().enumerate() {
        let row = i + 1;
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(line) else {
            return broken(record_count, row);
        };
        let Some(expected_hash) = fields.get("hash").and_then(Value::as_str) else {
            return broken(record_count, row);
        };
        let previous = fields.get("previousHash").cloned().unwrap_or(Value::Null);

        // linkage
        let linked = match (&prior_hash, &previous) {
            (None, Value::Null) => true,
            (Some(prior), Value::String(prev)) => prior == prev,
            _ => false,
        };
        if !linked {
            return broken(record_count, row);
        }

        // content hash over the record without its `hash` field
        let mut unhashed = Map::new();
        for key in ["sequence", "timestamp", "operation", "data", "previousHash"] {
            unhashed.insert(key.to_string(), fields.get(key).cloned().unwrap_or(Value::Null));
        }
        let recomputed =
            sha256_hex(canonical::to_canonical_string(&Value::Object(unhashed)).as_bytes());
        if recomputed != expected_hash {
            return broken(record_count, row);
        }

        prior_hash = Some(expected_hash.to_string());
    }

    ChainVerification { valid: true, record_count, broken_at: None }
}

const fn broken(record_count: usize, row: usize) -> ChainVerification {
    ChainVerification { valid: false, record_count, broken_at: Some(row) }
}

/// Merkle root over the leaf-hashed record hashes, as lower-case hex. The
/// leaf input is the UTF-8 bytes of each record's hex `hash`.
#[must_use]
pub fn chain_digest(records: &[EvidenceRecord]) -> String {
    let leaves: Vec<[u8; 32]> =
        records.iter().map(|r| merkle::leaf_hash(r.hash.as_bytes())).collect();
    hex::encode(merkle::merkle_root(&leaves))
}

/// Identity over several chains: per-chain digests sorted lexicographically
/// and Merkle-rooted.
#[must_use]
pub fn summarize_chain_digests(digests: &[String]) -> String {
    let mut sorted = digests.to_vec();
    sorted.sort();
    let leaves: Vec<[u8; 32]> = sorted.iter().map(|d| merkle::leaf_hash(d.as_bytes())).collect();
    hex::encode(merkle::merkle_root(&leaves))
}

/// `CorsairEvidenceReceipt v1.0`: a portable proof that one record belongs
/// to a chain with a known digest.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceReceipt {
    /// Receipt type tag.
    #[serde(rename = "type")]
    pub type_: String,

    /// Receipt format version.
    pub version: String,

    /// The hex hash of the proven record.
    pub record_hash: String,

    /// The chain the record belongs to.
    pub chain: ChainDescriptor,

    /// Sibling path from the record's leaf to the chain digest.
    pub proof: Vec<ReceiptProofStep>,

    /// Optional issuer-defined context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Chain identity carried inside a receipt.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    /// Always `hash-linked`.
    pub chain_type: String,

    /// Always `sha256`.
    pub algorithm: String,

    /// Always `sorted-json-v1`.
    pub canonicalization: String,

    /// Number of records in the chain at receipt time.
    pub record_count: usize,

    /// Whether the chain verified end-to-end at receipt time.
    pub chain_verified: bool,

    /// The chain's Merkle digest.
    pub chain_digest: String,
}

/// Wire form of a Merkle proof step.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReceiptProofStep {
    /// Sibling hash, hex.
    pub hash: String,

    /// `left` or `right`.
    pub direction: String,
}

/// Build a receipt for the record at `index` (0-based).
///
/// # Errors
///
/// Fails when the index is out of range.
pub fn issue_receipt(
    records: &[EvidenceRecord], chain_verified: bool, index: usize,
) -> Result<EvidenceReceipt, EvidenceError> {
    let record = records.get(index).ok_or(EvidenceError::OutOfRange(index))?;
    let leaves: Vec<[u8; 32]> =
        records.iter().map(|r| merkle::leaf_hash(r.hash.as_bytes())).collect();
    let steps =
        merkle::inclusion_proof(index, &leaves).ok_or(EvidenceError::OutOfRange(index))?;

    Ok(EvidenceReceipt {
        type_: "CorsairEvidenceReceipt".to_string(),
        version: "1.0".to_string(),
        record_hash: record.hash.clone(),
        chain: ChainDescriptor {
            chain_type: "hash-linked".to_string(),
            algorithm: "sha256".to_string(),
            canonicalization: "sorted-json-v1".to_string(),
            record_count: records.len(),
            chain_verified,
            chain_digest: chain_digest(records),
        },
        proof: steps
            .iter()
            .map(|s| ReceiptProofStep {
                hash: hex::encode(s.hash),
                direction: match s.direction {
                    Direction::Left => "left".to_string(),
                    Direction::Right => "right".to_string(),
                },
            })
            .collect(),
        meta: None,
    })
}

/// Check a receipt: algorithm tags, the chain-verified flag, the optional
/// expected digest, and the inclusion proof itself.
#[must_use]
pub fn verify_evidence_receipt(receipt: &EvidenceReceipt, expected_chain_digest: Option<&str>) -> bool {
    if receipt.chain.algorithm != "sha256"
        || receipt.chain.canonicalization != "sorted-json-v1"
        || receipt.chain.chain_type != "hash-linked"
        || !receipt.chain.chain_verified
    {
        return false;
    }
    if let Some(expected) = expected_chain_digest {
        if receipt.chain.chain_digest != expected {
            return false;
        }
    }

    let Ok(root_bytes) = hex::decode(&receipt.chain.chain_digest) else {
        return false;
    };
    let Ok(root) = <[u8; 32]>::try_from(root_bytes.as_slice()) else {
        return false;
    };

    let mut steps = Vec::with_capacity(receipt.proof.len());
    for step in &receipt.proof {
        let Ok(raw) = hex::decode(&step.hash) else {
            return false;
        };
        let Ok(hash) = <[u8; 32]>::try_from(raw.as_slice()) else {
            return false;
        };
        let direction = match step.direction.as_str() {
            "left" => Direction::Left,
            "right" => Direction::Right,
            _ => return false,
        };
        steps.push(ProofStep { hash, direction });
    }

    let leaf = merkle::leaf_hash(receipt.record_hash.as_bytes());
    merkle::verify_inclusion_proof(&leaf, &steps, &root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_with(n: usize) -> EvidenceChain<MemorySink> {
        let mut chain = EvidenceChain::new(MemorySink::new());
        for i in 0..n {
            chain
                .append(ChainOperation::DocumentIngested, json!({"doc": i}))
                .expect("should append");
        }
        chain
    }

    #[test]
    fn appends_link_and_verify() {
        let chain = chain_with(3);
        let records = chain.records().expect("should read records");

        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[0].previous_hash, None);
        assert_eq!(records[1].previous_hash.as_deref(), Some(records[0].hash.as_str()));
        assert_eq!(records[2].previous_hash.as_deref(), Some(records[1].hash.as_str()));

        let verification = chain.verify().expect("should verify");
        assert!(verification.valid);
        assert_eq!(verification.record_count, 3);
        assert_eq!(verification.broken_at, None);
    }

    #[test]
    fn tampered_data_breaks_at_row() {
        let chain = chain_with(3);
        let content = chain.sink.read_all().expect("should read");

        // rewrite record #2's data without recomputing its hash
        let tampered: String = content
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 1 {
                    let mut v: Value = serde_json::from_str(line).expect("should parse");
                    v["data"] = json!({"tampered": true});
                    serde_json::to_string(&v).expect("should serialize")
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let verification = verify_chain(&tampered);
        assert!(!verification.valid);
        assert_eq!(verification.record_count, 3);
        assert_eq!(verification.broken_at, Some(2));
    }

    #[test]
    fn malformed_row_breaks_there() {
        let chain = chain_with(2);
        let mut content = chain.sink.read_all().expect("should read");
        content.push_str("not json\n");

        let verification = verify_chain(&content);
        assert!(!verification.valid);
        assert_eq!(verification.broken_at, Some(3));
    }

    #[test]
    fn empty_chain_is_valid() {
        let verification = verify_chain("");
        assert!(verification.valid);
        assert_eq!(verification.record_count, 0);
    }

    #[test]
    fn resume_continues_sequence() {
        let chain = chain_with(2);
        let sink = chain.sink;
        let mut resumed = EvidenceChain::resume(sink).expect("should resume");
        let record = resumed
            .append(ChainOperation::CpoeIssued, json!({"marque": "m-1"}))
            .expect("should append");
        assert_eq!(record.sequence, 3);
        assert!(resumed.verify().expect("should verify").valid);
    }

    #[test]
    fn receipt_round_trip() {
        let chain = chain_with(5);
        let receipt = chain.receipt(2).expect("should issue receipt");
        let digest = chain.digest().expect("should digest");

        assert!(verify_evidence_receipt(&receipt, None));
        assert!(verify_evidence_receipt(&receipt, Some(&digest)));
        assert!(!verify_evidence_receipt(&receipt, Some("deadbeef")));
    }

    #[test]
    fn receipt_tamper_resistance() {
        fn flip(hex_digest: &str) -> String {
            let head = if hex_digest.starts_with('0') { "1" } else { "0" };
            format!("{head}{}", &hex_digest[1..])
        }

        let chain = chain_with(4);
        let receipt = chain.receipt(1).expect("should issue receipt");

        let mut bad = receipt.clone();
        bad.record_hash = flip(&bad.record_hash);
        assert!(!verify_evidence_receipt(&bad, None));

        let mut bad = receipt.clone();
        bad.proof[0].hash = flip(&bad.proof[0].hash);
        assert!(!verify_evidence_receipt(&bad, None));

        let mut bad = receipt;
        bad.chain.chain_digest = flip(&bad.chain.chain_digest);
        assert!(!verify_evidence_receipt(&bad, None));
    }

    #[test]
    fn foreign_operations_round_trip() {
        let mut chain = EvidenceChain::new(MemorySink::new());
        chain
            .append(ChainOperation::Other("external-scan".to_string()), json!({}))
            .expect("should append");
        let records = chain.records().expect("should read");
        assert_eq!(records[0].operation, ChainOperation::Other("external-scan".to_string()));
        assert!(chain.verify().expect("should verify").valid);
    }
}
