//! # Process Provenance
//!
//! COSE receipts over each pipeline step, chained by SHA-256 of the
//! predecessor receipt's CBOR bytes. The Merkle root over the receipt hashes
//! becomes `processProvenance.chainDigest` in the credential subject.

use anyhow::Result;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::codec::canonical;
use crate::cpoe::subject::ProcessProvenanceDescriptor;
use crate::crypto::cose::{cose_sign1, cose_verify1};
use crate::crypto::{Signer, sha256_hex};
use crate::merkle;

/// One step of the issuance pipeline, in-toto/SLSA shaped.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStep {
    /// Step name, e.g. `normalize` or `sign`.
    pub name: String,

    /// Tool attestation: the tool and version that ran the step.
    pub tool: String,

    /// SHA-256 hashes of the step inputs.
    pub input_hashes: Vec<String>,

    /// SHA-256 hashes of the step outputs.
    pub output_hashes: Vec<String>,

    /// Whether any party can re-run the step from its inputs.
    pub reproducible: bool,
}

/// A signed witness for one step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReceipt {
    /// The step described.
    pub step: ProcessStep,

    /// SHA-256 (hex) of the previous receipt's CBOR bytes.
    pub previous_receipt_hash: Option<String>,

    /// COSE_Sign1 bytes over the canonical step description.
    pub receipt: Vec<u8>,

    /// SHA-256 (hex) of `receipt`.
    pub receipt_hash: String,
}

/// The receipt chain for one issuance run.
#[derive(Debug, Default)]
pub struct ProvenanceChain {
    receipts: Vec<StepReceipt>,
}

impl ProvenanceChain {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The receipts so far.
    #[must_use]
    pub fn receipts(&self) -> &[StepReceipt] {
        &self.receipts
    }

    /// Witness one step: sign its canonical description (with the previous
    /// receipt hash bound in) and append.
    ///
    /// # Errors
    ///
    /// Fails when serialization or signing fails.
    pub fn record_step<S: Signer>(&mut self, step: ProcessStep, signer: &S) -> Result<&StepReceipt> {
        let previous_receipt_hash = self.receipts.last().map(|r| r.receipt_hash.clone());
        let payload = canonical::canonicalize(&json!({
            "step": step,
            "previousReceiptHash": previous_receipt_hash,
        }))?;

        let receipt = cose_sign1(payload.as_bytes(), signer)?;
        let receipt_hash = sha256_hex(&receipt);
        self.receipts.push(StepReceipt { step, previous_receipt_hash, receipt, receipt_hash });
        Ok(self.receipts.last().expect("just pushed"))
    }

    /// The descriptor to embed in a credential subject.
    #[must_use]
    pub fn descriptor(&self) -> ProcessProvenanceDescriptor {
        let leaves: Vec<[u8; 32]> =
            self.receipts.iter().map(|r| merkle::leaf_hash(r.receipt_hash.as_bytes())).collect();
        ProcessProvenanceDescriptor {
            chain_digest: hex::encode(merkle::merkle_root(&leaves)),
            step_count: self.receipts.len(),
            reproducible_steps: self.receipts.iter().filter(|r| r.step.reproducible).count(),
            attested_steps: self.receipts.iter().filter(|r| !r.step.reproducible).count(),
        }
    }

    /// Re-verify every receipt signature and the hash linkage.
    #[must_use]
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        let mut previous: Option<&str> = None;
        for receipt in &self.receipts {
            let (verified, _) = cose_verify1(&receipt.receipt, key);
            if !verified {
                return false;
            }
            if receipt.previous_receipt_hash.as_deref() != previous {
                return false;
            }
            if sha256_hex(&receipt.receipt) != receipt.receipt_hash {
                return false;
            }
            previous = Some(receipt.receipt_hash.as_str());
        }
        true
    }
}
