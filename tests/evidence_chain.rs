//! Hash-chain durability: the JSONL file survives process restarts, breaks
//! loudly at the tampered row, and receipts resist bit flips.

use corsair_parley::evidence::{
    ChainOperation, EvidenceChain, FileSink, verify_chain, verify_evidence_receipt,
};
use serde_json::{Value, json};

fn temp_chain_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("parley-evidence-{}.jsonl", uuid::Uuid::new_v4()))
}

#[test]
fn chain_survives_reopen_and_breaks_at_the_tampered_row() {
    let path = temp_chain_path();

    // write three records across two "process lifetimes"
    {
        let mut chain = EvidenceChain::new(FileSink::new(&path));
        chain
            .append(ChainOperation::DocumentIngested, json!({"doc": 1}))
            .expect("should append");
        chain
            .append(ChainOperation::EvidenceNormalized, json!({"controls": 4}))
            .expect("should append");
    }
    {
        let mut chain = EvidenceChain::resume(FileSink::new(&path)).expect("should resume");
        let record = chain
            .append(ChainOperation::CpoeIssued, json!({"marqueId": "marque-1"}))
            .expect("should append");
        assert_eq!(record.sequence, 3);

        let verification = chain.verify().expect("should verify");
        assert!(verification.valid);
        assert_eq!(verification.record_count, 3);
        assert_eq!(verification.broken_at, None);
    }

    // rewrite record #2's data without recomputing its hash
    let content = std::fs::read_to_string(&path).expect("should read");
    let tampered: String = content
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 1 {
                let mut row: Value = serde_json::from_str(line).expect("should parse");
                row["data"] = json!({"tampered": true});
                serde_json::to_string(&row).expect("should serialize")
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

    std::fs::remove_file(&path).expect("should clean up");
}

#[test]
fn every_record_is_hash_linked() {
    let path = temp_chain_path();
    let mut chain = EvidenceChain::new(FileSink::new(&path));
    for i in 0..6 {
        chain.append(ChainOperation::DocumentIngested, json!({"doc": i})).expect("should append");
    }

    let records = chain.records().expect("should read");
    assert_eq!(records[0].previous_hash, None);
    for window in records.windows(2) {
        assert_eq!(window[1].previous_hash.as_deref(), Some(window[0].hash.as_str()));
        assert!(window[1].sequence > window[0].sequence);
    }

    std::fs::remove_file(&path).expect("should clean up");
}

#[test]
fn receipts_prove_membership_and_resist_tampering() {
    let path = temp_chain_path();
    let mut chain = EvidenceChain::new(FileSink::new(&path));
    for i in 0..5 {
        chain.append(ChainOperation::DocumentIngested, json!({"doc": i})).expect("should append");
    }

    let digest = chain.digest().expect("should digest");
    let receipt = chain.receipt(3).expect("should issue");
    assert_eq!(receipt.chain.chain_digest, digest);
    assert!(verify_evidence_receipt(&receipt, Some(&digest)));

    // flipping any single hex digit anywhere must break verification
    let flip = |s: &str| {
        let head = if s.starts_with('0') { "1" } else { "0" };
        format!("{head}{}", &s[1..])
    };

    let mut bad = receipt.clone();
    bad.record_hash = flip(&bad.record_hash);
    assert!(!verify_evidence_receipt(&bad, Some(&digest)));

    let mut bad = receipt.clone();
    bad.proof[0].hash = flip(&bad.proof[0].hash);
    assert!(!verify_evidence_receipt(&bad, Some(&digest)));

    let mut bad = receipt.clone();
    bad.chain.chain_digest = flip(&bad.chain.chain_digest);
    assert!(!verify_evidence_receipt(&bad, None));

    let mut bad = receipt;
    bad.chain.chain_verified = false;
    assert!(!verify_evidence_receipt(&bad, Some(&digest)));

    std::fs::remove_file(&path).expect("should clean up");
}
