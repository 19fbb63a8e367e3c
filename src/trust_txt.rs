//! # trust.txt
//!
//! Line-oriented trust discovery at `https://<host>/.well-known/trust.txt`:
//! a DID anchor, CPOE and catalog URLs, covered frameworks, and a contact.
//! Blank lines and `#` comments are ignored; unknown directives are a
//! distinct validation error.

use std::path::Path;

use thiserror::Error;
#[cfg(feature = "verifier")]
use tracing::debug;

#[cfg(feature = "verifier")]
use crate::did::{FetchError, HttpFetcher, host_blocked};

/// trust.txt failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustTxtError {
    /// A line used a directive outside the known set.
    #[error("unknown directive `{directive}` on line {line}")]
    UnknownDirective {
        /// 1-indexed line number.
        line: usize,
        /// The offending directive.
        directive: String,
    },

    /// A non-comment line had no `Directive: value` shape.
    #[error("malformed line {line}: {reason}")]
    Malformed {
        /// 1-indexed line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// A required directive is absent.
    #[error("missing required directive: {0}")]
    MissingDirective(&'static str),

    /// The file could not be fetched.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The target host is blocked or the URL is not HTTPS.
    #[error("refusing to fetch from {0}")]
    Refused(String),

    /// Local file I/O failed.
    #[error("io error: {0}")]
    Io(String),
}

/// A parsed trust.txt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustTxt {
    /// The publishing organization's DID.
    pub did: Option<String>,

    /// Published CPOE URLs.
    pub cpoes: Vec<String>,

    /// Catalog URL.
    pub catalog: Option<String>,

    /// Frameworks covered.
    pub frameworks: Vec<String>,

    /// Compliance contact.
    pub contact: Option<String>,
}

/// Parse trust.txt content. Unknown directives fail with
/// [`TrustTxtError::UnknownDirective`].
///
/// # Errors
///
/// Fails on unknown directives or lines without a `Directive: value` shape.
pub fn parse(content: &str) -> Result<TrustTxt, TrustTxtError> {
    let mut out = TrustTxt::default();

    for (i, raw) in content.lines().enumerate() {
        let line = i + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((directive, value)) = trimmed.split_once(':') else {
            return Err(TrustTxtError::Malformed {
                line,
                reason: "expected `Directive: value`".to_string(),
            });
        };
        let value = value.trim();

        match directive.trim() {
            "DID" => out.did = Some(value.to_string()),
            "CPOE" => out.cpoes.push(value.to_string()),
            "CATALOG" => out.catalog = Some(value.to_string()),
            "Frameworks" => {
                out.frameworks =
                    value.split(',').map(|f| f.trim().to_string()).filter(|f| !f.is_empty()).collect();
            }
            "Contact" => out.contact = Some(value.to_string()),
            other => {
                return Err(TrustTxtError::UnknownDirective {
                    line,
                    directive: other.to_string(),
                });
            }
        }
    }
    Ok(out)
}

/// Validate content: parse it and require the `DID` anchor.
///
/// # Errors
///
/// Fails as [`parse`] does, or with a missing-directive error.
pub fn validate(content: &str) -> Result<TrustTxt, TrustTxtError> {
    let parsed = parse(content)?;
    if parsed.did.is_none() {
        return Err(TrustTxtError::MissingDirective("DID"));
    }
    Ok(parsed)
}

/// Render a trust.txt file.
#[must_use]
pub fn generate(trust: &TrustTxt) -> String {
    let mut out = String::from("# Corsair Trust Discovery\n");
    if let Some(did) = &trust.did {
        out.push_str(&format!("DID: {did}\n"));
    }
    for cpoe in &trust.cpoes {
        out.push_str(&format!("CPOE: {cpoe}\n"));
    }
    if let Some(catalog) = &trust.catalog {
        out.push_str(&format!("CATALOG: {catalog}\n"));
    }
    if !trust.frameworks.is_empty() {
        out.push_str(&format!("Frameworks: {}\n", trust.frameworks.join(", ")));
    }
    if let Some(contact) = &trust.contact {
        out.push_str(&format!("Contact: {contact}\n"));
    }
    out
}

/// Scan a directory for `.jwt` CPOE files, rewriting each into an absolute
/// URL under `base_url` when one is given (otherwise the bare file name is
/// listed).
///
/// # Errors
///
/// Fails when the directory cannot be read.
pub fn scan_cpoes(dir: &Path, base_url: Option<&str>) -> Result<Vec<String>, TrustTxtError> {
    let mut found = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| TrustTxtError::Io(e.to_string()))?;
    for entry in entries {
        let path = entry.map_err(|e| TrustTxtError::Io(e.to_string()))?.path();
        if path.extension().is_some_and(|e| e == "jwt") {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            match base_url {
                Some(base) => found.push(format!("{}/{name}", base.trim_end_matches('/'))),
                None => found.push(name),
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Fetch and validate `https://<host>/.well-known/trust.txt`.
///
/// # Errors
///
/// Fails on blocked hosts, fetch failures, or invalid content.
#[cfg(feature = "verifier")]
pub async fn discover<F: HttpFetcher>(host: &str, fetcher: &F) -> Result<TrustTxt, TrustTxtError> {
    let bare = host.rsplit_once(':').map_or(host, |(h, _)| h);
    if host_blocked(bare) {
        return Err(TrustTxtError::Refused(host.to_string()));
    }
    let url = format!("https://{host}/.well-known/trust.txt");
    debug!(%url, "discovering trust.txt");

    let response = fetcher.get(&url).await.map_err(|e| match e {
        FetchError::Timeout => TrustTxtError::Fetch("timeout".to_string()),
        FetchError::Transport(msg) => TrustTxtError::Fetch(msg),
    })?;
    if response.status != 200 {
        return Err(TrustTxtError::Fetch(format!("http {}", response.status)));
    }
    let content = String::from_utf8_lossy(&response.body);
    validate(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Corsair Trust Discovery
DID: did:web:acme.com
CPOE: https://acme.com/compliance/soc2-2026-q1.jwt
CATALOG: https://acme.com/compliance/catalog.json
Frameworks: SOC2, ISO27001
Contact: compliance@acme.com
";

    #[test]
    fn parses_the_reference_file() {
        let trust = parse(SAMPLE).expect("should parse");
        assert_eq!(trust.did.as_deref(), Some("did:web:acme.com"));
        assert_eq!(trust.cpoes, vec!["https://acme.com/compliance/soc2-2026-q1.jwt"]);
        assert_eq!(trust.catalog.as_deref(), Some("https://acme.com/compliance/catalog.json"));
        assert_eq!(trust.frameworks, vec!["SOC2", "ISO27001"]);
        assert_eq!(trust.contact.as_deref(), Some("compliance@acme.com"));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let trust = parse("\n# comment\n\nDID: did:web:acme.com\n").expect("should parse");
        assert_eq!(trust.did.as_deref(), Some("did:web:acme.com"));
    }

    #[test]
    fn unknown_directive_is_a_distinct_error() {
        let err = parse("DID: did:web:acme.com\nColor: blue\n").expect_err("should fail");
        assert_eq!(
            err,
            TrustTxtError::UnknownDirective { line: 2, directive: "Color".to_string() }
        );
    }

    #[test]
    fn lines_without_a_colon_are_malformed() {
        let err = parse("just words\n").expect_err("should fail");
        assert!(matches!(err, TrustTxtError::Malformed { line: 1, .. }));
    }

    #[test]
    fn validation_requires_the_did_anchor() {
        let err = validate("Contact: a@b.c\n").expect_err("should fail");
        assert_eq!(err, TrustTxtError::MissingDirective("DID"));
    }

    #[test]
    fn generate_parse_round_trip() {
        let trust = TrustTxt {
            did: Some("did:web:acme.com".to_string()),
            cpoes: vec!["https://acme.com/c/a.jwt".to_string(), "https://acme.com/c/b.jwt".to_string()],
            catalog: None,
            frameworks: vec!["SOC2".to_string()],
            contact: Some("compliance@acme.com".to_string()),
        };
        let rendered = generate(&trust);
        assert!(rendered.starts_with("# Corsair Trust Discovery\n"));
        assert_eq!(parse(&rendered).expect("should parse"), trust);
    }

    #[test]
    fn scans_and_rewrites_local_cpoes() {
        let dir = std::env::temp_dir().join(format!("parley-cpoes-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("should create dir");
        std::fs::write(dir.join("soc2.jwt"), "x").expect("should write");
        std::fs::write(dir.join("iso.jwt"), "x").expect("should write");
        std::fs::write(dir.join("notes.txt"), "x").expect("should write");

        let urls = scan_cpoes(&dir, Some("https://acme.com/compliance/")).expect("should scan");
        assert_eq!(
            urls,
            vec![
                "https://acme.com/compliance/iso.jwt".to_string(),
                "https://acme.com/compliance/soc2.jwt".to_string(),
            ]
        );

        let names = scan_cpoes(&dir, None).expect("should scan");
        assert_eq!(names, vec!["iso.jwt".to_string(), "soc2.jwt".to_string()]);

        std::fs::remove_dir_all(dir).expect("should clean up");
    }

    #[cfg(feature = "verifier")]
    #[tokio::test]
    async fn discover_refuses_blocked_hosts() {
        #[derive(Clone)]
        struct NoRoute;
        impl HttpFetcher for NoRoute {
            async fn get(
                &self, url: &str,
            ) -> Result<crate::did::FetchResponse, FetchError> {
                Err(FetchError::Transport(format!("no route to {url}")))
            }
        }

        assert!(matches!(
            discover("127.0.0.1", &NoRoute).await,
            Err(TrustTxtError::Refused(_))
        ));
        assert!(matches!(
            discover("acme.com", &NoRoute).await,
            Err(TrustTxtError::Fetch(_))
        ));
    }
}
