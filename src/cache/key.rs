//! Cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Key for a request using the default (unsalted) generator.
    pub fn from_request(
        method: &str,
        url: &str,
        params: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Self {
        CacheKeyGenerator::new().generate(method, url, params, body)
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[derive(Serialize)]
struct Canonical<'a> {
    method: String,
    url: &'a str,
    params: Vec<(&'a str, &'a str)>,
    body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    salt: Option<&'a str>,
}

/// Derives stable keys from `(method, url, params, body)`.
///
/// Params are sorted so their order never matters; the body enters the key as its
/// SHA-256 digest. A salt separates key spaces, e.g. one per tenant.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        body: Option<&[u8]>,
    ) -> CacheKey {
        let mut sorted: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        sorted.sort_unstable();

        let canonical = Canonical {
            method: method.to_ascii_uppercase(),
            url,
            params: sorted,
            body: body.map(|b| hex::encode(Sha256::digest(b))),
            salt: self.salt.as_deref(),
        };
        // Serializing plain strings and tuples cannot fail.
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
        CacheKey::new(hex::encode(Sha256::digest(&encoded)))
    }
}
