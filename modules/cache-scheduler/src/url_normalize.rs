//! URL canonicalization and content-addressed hashing.
//!
//! The exact canonical form must be deterministic and identical across the
//! Ingestion API, the Autorecache Scheduler, and inspection tooling
//!: strip the fragment, lowercase the host,
//! sort query parameters, and remove default ports.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::DaemonError;

/// Canonicalize a URL per the rules above: parse once with the `url`
/// crate, then rebuild in place via its mutator methods.
pub fn normalize_url(raw: &str) -> Result<String, DaemonError> {
    let mut url = Url::parse(raw).map_err(|e| DaemonError::UrlNormalization {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(DaemonError::UrlNormalization {
            url: raw.to_owned(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }

    url.set_fragment(None);

    let host = url
        .host_str()
        .ok_or_else(|| DaemonError::UrlNormalization {
            url: raw.to_owned(),
            reason: "missing host".to_owned(),
        })?
        .to_ascii_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| DaemonError::UrlNormalization {
            url: raw.to_owned(),
            reason: e.to_string(),
        })?;

    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = url.set_port(None);
    }

    if let Some(query) = url.query() {
        let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        pairs.sort();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            let rebuilt = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            url.set_query(Some(&rebuilt));
        }
    }

    // Path normalization: collapse an empty path to "/" so
    // "https://example.com" and "https://example.com/" canonicalize to
    // the same member.
    if url.path().is_empty() {
        url.set_path("/");
    }

    Ok(url.into())
}

/// Deterministic content-addressed hash of a normalized URL, used for the
/// `meta:cache:{host}:{dimension}:{url_hash}` key layout and
/// shared with EGs and inspection tooling via this same function.
#[must_use]
pub fn hash_url(normalized_url: &str) -> String {
    let digest = Sha256::digest(normalized_url.as_bytes());
    hex::encode(digest)
}
