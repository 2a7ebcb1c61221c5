//! Canonical request representation fed into the signature.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Header always included in the signature regardless of prefix.
const CONTENT_TYPE: &str = "content-type";

/// The signature headers themselves never take part, whatever the prefix.
const SIGNATURE_HEADER_PREFIX: &str = "x-signature";

/// Path and host of `url` without query string or fragment.
pub fn canonical_url(url: &str) -> &str {
    let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
    &url[..end]
}

/// Signed headers as sorted `key:value` lines.
///
/// Only `content-type` and headers starting with `prefix` (case-insensitive) take
/// part. Keys are lower-cased and values trimmed.
pub fn canonical_headers(headers: &HashMap<String, String>, prefix: &str) -> String {
    let prefix = prefix.to_ascii_lowercase();
    let mut lines: Vec<(String, &str)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .filter(|(k, _)| {
            (k == CONTENT_TYPE || k.starts_with(&prefix)) && !k.starts_with(SIGNATURE_HEADER_PREFIX)
        })
        .collect();
    lines.sort_unstable();
    lines
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hex SHA-256 of the body; an absent body hashes the empty string.
pub fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Newline-joined signing input.
pub fn string_to_sign(
    method: &str,
    url: &str,
    headers: &HashMap<String, String>,
    header_prefix: &str,
    body: &[u8],
    timestamp: u64,
    nonce: &str,
) -> String {
    [
        method.to_ascii_uppercase(),
        canonical_url(url).to_string(),
        canonical_headers(headers, header_prefix),
        timestamp.to_string(),
        nonce.to_string(),
        body_digest(body),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_and_fragment() {
        assert_eq!(canonical_url("https://api.test/v1/items?page=2"), "https://api.test/v1/items");
        assert_eq!(canonical_url("/v1/items#top"), "/v1/items");
        assert_eq!(canonical_url("/v1/items"), "/v1/items");
    }

    #[test]
    fn filters_and_sorts_headers() {
        let headers: HashMap<String, String> = [
            ("X-Custom-Tenant", " acme "),
            ("Content-Type", "application/json"),
            ("Authorization", "Bearer secret"),
            ("x-custom-app", "cli"),
            ("Accept", "*/*"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(
            canonical_headers(&headers, "x-custom-"),
            "content-type:application/json\nx-custom-app:cli\nx-custom-tenant:acme"
        );
    }

    #[test]
    fn signature_headers_never_signed() {
        let headers: HashMap<String, String> = [("X-Signature", "abc"), ("X-Trace", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(canonical_headers(&headers, "x-"), "x-trace:1");
    }

    #[test]
    fn empty_body_is_hashed() {
        assert_eq!(
            body_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn string_to_sign_layout() {
        let headers = HashMap::new();
        let s = string_to_sign("post", "/v1/items?x=1", &headers, "x-custom-", b"", 1700000000, "abc");
        let lines: Vec<&str> = s.split('\n').collect();
        assert_eq!(lines[0], "POST");
        assert_eq!(lines[1], "/v1/items");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "1700000000");
        assert_eq!(lines[4], "abc");
        assert_eq!(lines[5], body_digest(b""));
    }
}
