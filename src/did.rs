//! # DID:web Resolution
//!
//! Resolves `did:web` identifiers to DID documents over HTTPS, anchored at
//! `/.well-known/did.json`. The resolver is zero-trust plumbing: HTTPS only,
//! no redirect following, a 5-second deadline, and a process-wide immutable
//! host blocklist covering loopback, RFC 1918, link-local, and the other
//! reserved ranges.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::PublicKeyJwk;

/// Resolution failures, as discriminated values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The target host is in a reserved range.
    #[error("blocked_host: {0}")]
    BlockedHost(String),

    /// The DID resolves to a non-HTTPS URL.
    #[error("non_https")]
    NonHttps,

    /// The server answered with a non-success status.
    #[error("http_{0}")]
    Http(u16),

    /// The fetch did not complete within the deadline.
    #[error("network_timeout")]
    NetworkTimeout,

    /// The response was not a DID document.
    #[error("parse_error: {0}")]
    Parse(String),

    /// The document's `id` does not match the requested DID.
    #[error("id_mismatch: document is {0}")]
    IdMismatch(String),

    /// Not a `did:web` identifier.
    #[error("unsupported DID method: {0}")]
    UnsupportedMethod(String),
}

/// A DID document, per W3C DID Core.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DidDocument {
    /// JSON-LD contexts.
    #[serde(rename = "@context")]
    pub context: serde_json::Value,

    /// The DID this document describes.
    pub id: String,

    /// Public keys usable for verification.
    pub verification_method: Vec<VerificationMethod>,

    /// Verification-method references usable for authentication.
    pub authentication: Vec<String>,

    /// Verification-method references usable for assertions.
    pub assertion_method: Vec<String>,
}

impl DidDocument {
    /// The verification method with the given `id` (a full `did...#key-n`
    /// reference).
    #[must_use]
    pub fn find_method(&self, kid: &str) -> Option<&VerificationMethod> {
        self.verification_method.iter().find(|vm| vm.id == kid)
    }
}

/// One verification method of a DID document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationMethod {
    /// Full reference, e.g. `did:web:acme.com#key-1`.
    pub id: String,

    /// Method type; `JsonWebKey2020` here.
    #[serde(rename = "type")]
    pub type_: String,

    /// The controlling DID.
    pub controller: String,

    /// The public key.
    pub public_key_jwk: PublicKeyJwk,
}

/// A fetched HTTP response, reduced to what resolution needs.
#[derive(Clone, Debug)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,

    /// Response body.
    pub body: Vec<u8>,
}

/// Transport failures a fetcher can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// Any other transport failure.
    #[error("transport: {0}")]
    Transport(String),
}

/// The injected HTTP collaborator. Tests substitute an in-memory fetcher;
/// production uses [`HttpClient`].
pub trait HttpFetcher: Send + Sync {
    /// GET a URL within the protocol deadline.
    fn get(&self, url: &str) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// Default fetcher: HTTPS-only, no redirects, 5-second timeout.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Build the default client.
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialized.
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .https_only(true)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpFetcher for HttpClient {
    async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .to_vec();
        Ok(FetchResponse { status, body })
    }
}

/// Whether a host is in the process-wide blocklist: loopback, RFC 1918,
/// link-local, multicast, ULA, and other reserved ranges, plus local-only
/// hostnames. Not runtime-configurable.
#[must_use]
pub fn host_blocked(host: &str) -> bool {
    let bare = host.strip_prefix('[').map_or(host, |h| h.trim_end_matches(']'));

    if let Ok(v4) = bare.parse::<Ipv4Addr>() {
        return v4.is_loopback()
            || v4.is_private()
            || v4.is_link_local()
            || v4.is_multicast()
            || v4.is_broadcast()
            || v4.is_unspecified()
            || v4.is_documentation()
            || v4.octets()[0] == 0;
    }
    if let Ok(v6) = bare.parse::<Ipv6Addr>() {
        if v6.is_loopback() || v6.is_multicast() || v6.is_unspecified() {
            return true;
        }
        let seg = v6.segments()[0];
        // ULA fc00::/7 and link-local fe80::/10
        return (seg & 0xfe00) == 0xfc00 || (seg & 0xffc0) == 0xfe80;
    }

    let lower = bare.to_lowercase();
    lower == "localhost"
        || lower.ends_with(".localhost")
        || lower.ends_with(".local")
        || lower.ends_with(".internal")
}

/// Parse a `did:web` identifier into `(host, document URL)`.
///
/// `did:web:acme.com` resolves at the domain root;
/// `did:web:acme.com:compliance` under the `/compliance` path. `%3A`
/// percent-encoding carries ports.
///
/// # Errors
///
/// Fails on non-`did:web` identifiers or blocked hosts.
pub fn did_web_url(did: &str) -> Result<(String, String), ResolveError> {
    let Some(rest) = did.strip_prefix("did:web:") else {
        return Err(ResolveError::UnsupportedMethod(did.to_string()));
    };
    if rest.is_empty() {
        return Err(ResolveError::UnsupportedMethod(did.to_string()));
    }

    let mut segments = rest.split(':').map(percent_decode);
    let host = segments.next().unwrap_or_default();
    let path: Vec<String> = segments.collect();

    let host_only = host.rsplit_once(':').map_or(host.as_str(), |(h, _)| h);
    if host_blocked(host_only) {
        return Err(ResolveError::BlockedHost(host_only.to_string()));
    }

    let url = if path.is_empty() {
        format!("https://{host}/.well-known/did.json")
    } else {
        format!("https://{host}/{}/.well-known/did.json", path.join("/"))
    };
    Ok((host, url))
}

fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_val),
                bytes.get(i + 2).copied().and_then(hex_val),
            ) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

const fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Resolves `did:web` identifiers through an injected fetcher.
#[derive(Clone, Debug)]
pub struct DidResolver<F: HttpFetcher> {
    fetcher: F,
}

impl<F: HttpFetcher> DidResolver<F> {
    /// A resolver over the given fetcher.
    #[must_use]
    pub const fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Resolve a DID to its document.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] naming the failure: blocked host, HTTP
    /// status, timeout, parse failure, or id mismatch.
    pub async fn resolve(&self, did: &str) -> Result<DidDocument, ResolveError> {
        let (_, url) = did_web_url(did)?;
        debug!(%did, %url, "resolving did:web");

        let response = self.fetcher.get(&url).await.map_err(|e| match e {
            FetchError::Timeout => ResolveError::NetworkTimeout,
            FetchError::Transport(msg) => ResolveError::Parse(msg),
        })?;
        if response.status != 200 {
            return Err(ResolveError::Http(response.status));
        }

        let document: DidDocument = serde_json::from_slice(&response.body)
            .map_err(|e| ResolveError::Parse(e.to_string()))?;
        if document.id != did {
            return Err(ResolveError::IdMismatch(document.id));
        }
        Ok(document)
    }
}
