//! Shared fixtures for the integration suites: an in-memory HTTP fetcher
//! and a canned compliance document.
#![allow(dead_code)]

use std::collections::HashMap;

use corsair_parley::crypto::LocalSigner;
use corsair_parley::did::{FetchError, FetchResponse, HttpFetcher};
use corsair_parley::ingest::{
    ControlStatus, DocumentMetadata, FrameworkRef, IngestedControl, IngestedDocument, Source,
};
use serde_json::json;

/// In-memory fetcher, keyed by URL.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    pub responses: HashMap<String, (u16, Vec<u8>)>,
}

impl MemoryFetcher {
    pub fn with_did_document(did: &str, signer: &LocalSigner) -> Self {
        let host = did.trim_start_matches("did:web:");
        let document = json!({
            "@context": ["https://www.w3.org/ns/did/v1"],
            "id": did,
            "verificationMethod": [{
                "id": format!("{did}#key-1"),
                "type": "JsonWebKey2020",
                "controller": did,
                "publicKeyJwk": signer.public_jwk(),
            }],
            "authentication": [format!("{did}#key-1")],
            "assertionMethod": [format!("{did}#key-1")],
        });
        let mut fetcher = Self::default();
        fetcher.responses.insert(
            format!("https://{host}/.well-known/did.json"),
            (200, serde_json::to_vec(&document).expect("should serialize")),
        );
        fetcher
    }
}

impl HttpFetcher for MemoryFetcher {
    async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.responses.get(url).map_or(
            Err(FetchError::Transport(format!("no route to {url}"))),
            |(status, body)| Ok(FetchResponse { status: *status, body: body.clone() }),
        )
    }
}

/// A Prowler scan with 10 controls: 8 effective with evidence, 2
/// ineffective. Summary: tested 10, passed 8, failed 2, score 80.
pub fn prowler_document() -> IngestedDocument {
    let controls = (0..10)
        .map(|i| IngestedControl {
            id: format!("check-{i:03}"),
            description: format!("cloud control {i}"),
            status: Some(if i < 8 { ControlStatus::Effective } else { ControlStatus::Ineffective }),
            evidence: Some(format!("scanned 14 resources in region {i}, configuration verified")),
            framework_refs: Some(vec![FrameworkRef {
                framework: "SOC2".to_string(),
                control_id: format!("CC6.{i}"),
            }]),
            ..IngestedControl::default()
        })
        .collect();

    IngestedDocument {
        source: Source::Prowler,
        metadata: DocumentMetadata {
            title: "Prowler scan 2026-06".to_string(),
            issuer: "acme".to_string(),
            date: "2026-06-01".to_string(),
            scope: "production accounts".to_string(),
            ..DocumentMetadata::default()
        },
        controls,
        tool_assurance_level: 1,
        context: None,
    }
}
