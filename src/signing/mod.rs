//! # Request Signing Module
//!
//! HMAC signatures over a canonical request so the receiving side can check
//! integrity and origin.
//!
//! The signing input is the newline-joined tuple
//! `(METHOD, url-without-query, header-block, timestamp, nonce, sha256(body))`.
//! The header block holds `content-type` plus every header carrying the signed
//! prefix (default `x-custom-`), lower-cased and sorted. Four headers carry the
//! result: [`TIMESTAMP_HEADER`], [`NONCE_HEADER`], [`SIGNATURE_HEADER`] and
//! [`ALGORITHM_HEADER`].
//!
//! ```rust
//! use sdk_resilience::signing::RequestSigner;
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! let signer = RequestSigner::new("shared-secret").unwrap();
//! let mut headers = HashMap::new();
//! headers.insert("Content-Type".to_string(), "application/json".to_string());
//!
//! let signed = signer.sign("POST", "/v1/items", &headers, b"{}");
//! headers.extend(signed.to_headers());
//!
//! assert!(signer.verify("POST", "/v1/items", &headers, b"{}", Duration::from_secs(300)));
//! ```

pub mod canonical;

use crate::{Error, ErrorContext, Result};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";
pub const NONCE_HEADER: &str = "X-Signature-Nonce";
pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const ALGORITHM_HEADER: &str = "X-Signature-Algorithm";

pub const DEFAULT_SIGNED_HEADER_PREFIX: &str = "x-custom-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SignatureAlgorithm {
    #[default]
    #[serde(rename = "HMAC-SHA256")]
    HmacSha256,
    #[serde(rename = "HMAC-SHA512")]
    HmacSha512,
}

impl SignatureAlgorithm {
    /// Identifier sent in [`ALGORITHM_HEADER`].
    pub fn id(&self) -> &'static str {
        match self {
            Self::HmacSha256 => "HMAC-SHA256",
            Self::HmacSha512 => "HMAC-SHA512",
        }
    }
}

/// The four signature headers produced by [`RequestSigner::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub timestamp: u64,
    pub nonce: String,
    pub signature: String,
    pub algorithm: SignatureAlgorithm,
}

impl SignedHeaders {
    pub fn to_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            (TIMESTAMP_HEADER.to_string(), self.timestamp.to_string()),
            (NONCE_HEADER.to_string(), self.nonce.clone()),
            (SIGNATURE_HEADER.to_string(), self.signature.clone()),
            (ALGORITHM_HEADER.to_string(), self.algorithm.id().to_string()),
        ])
    }
}

/// Why a signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyFailure {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("unexpected algorithm {0}")]
    AlgorithmMismatch(String),
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error("timestamp outside the accepted window")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Clone)]
enum Keyed {
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

/// Signs and verifies requests with a shared secret.
#[derive(Clone)]
pub struct RequestSigner {
    algorithm: SignatureAlgorithm,
    keyed: Keyed,
    header_prefix: String,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("algorithm", &self.algorithm)
            .field("header_prefix", &self.header_prefix)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        Self::with_algorithm(secret, SignatureAlgorithm::default())
    }

    pub fn with_algorithm(secret: impl AsRef<[u8]>, algorithm: SignatureAlgorithm) -> Result<Self> {
        let secret = secret.as_ref();
        let invalid = || {
            Error::configuration_with_context(
                "signing secret is invalid",
                ErrorContext::new()
                    .with_field_path("signing.secret")
                    .with_source("request_signer"),
            )
        };
        if secret.is_empty() {
            return Err(invalid());
        }
        let keyed = match algorithm {
            SignatureAlgorithm::HmacSha256 => {
                Keyed::Sha256(Hmac::<Sha256>::new_from_slice(secret).map_err(|_| invalid())?)
            }
            SignatureAlgorithm::HmacSha512 => {
                Keyed::Sha512(Hmac::<Sha512>::new_from_slice(secret).map_err(|_| invalid())?)
            }
        };
        Ok(Self {
            algorithm,
            keyed,
            header_prefix: DEFAULT_SIGNED_HEADER_PREFIX.to_string(),
        })
    }

    /// Change which custom headers take part in the signature.
    pub fn with_signed_header_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.header_prefix = prefix.into().to_ascii_lowercase();
        self
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    fn mac(&self, input: &[u8]) -> Vec<u8> {
        match &self.keyed {
            Keyed::Sha256(proto) => {
                let mut mac = proto.clone();
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
            Keyed::Sha512(proto) => {
                let mut mac = proto.clone();
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    fn mac_matches(&self, input: &[u8], expected: &[u8]) -> bool {
        match &self.keyed {
            Keyed::Sha256(proto) => {
                let mut mac = proto.clone();
                mac.update(input);
                mac.verify_slice(expected).is_ok()
            }
            Keyed::Sha512(proto) => {
                let mut mac = proto.clone();
                mac.update(input);
                mac.verify_slice(expected).is_ok()
            }
        }
    }

    /// Sign with the current time and a fresh random nonce.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> SignedHeaders {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.sign_at(method, url, headers, body, unix_now(), &nonce)
    }

    /// Sign with an explicit timestamp (unix seconds) and nonce.
    pub fn sign_at(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        timestamp: u64,
        nonce: &str,
    ) -> SignedHeaders {
        let input = canonical::string_to_sign(
            method,
            url,
            headers,
            &self.header_prefix,
            body,
            timestamp,
            nonce,
        );
        SignedHeaders {
            timestamp,
            nonce: nonce.to_string(),
            signature: hex::encode(self.mac(input.as_bytes())),
            algorithm: self.algorithm,
        }
    }

    /// Check a signed request against the current time.
    pub fn verify(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        max_age: Duration,
    ) -> bool {
        self.verify_at(method, url, headers, body, max_age, unix_now())
    }

    pub fn verify_at(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        max_age: Duration,
        now: u64,
    ) -> bool {
        match self.verify_detailed(method, url, headers, body, max_age, now) {
            Ok(()) => true,
            Err(reason) => {
                debug!(%reason, method, url, "request signature rejected");
                false
            }
        }
    }

    /// Verification with the rejection reason.
    ///
    /// The replay window is enforced before the signature is compared; the
    /// comparison itself is constant-time.
    pub fn verify_detailed(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        max_age: Duration,
        now: u64,
    ) -> std::result::Result<(), VerifyFailure> {
        let timestamp = header(headers, TIMESTAMP_HEADER)?;
        let nonce = header(headers, NONCE_HEADER)?;
        let signature = header(headers, SIGNATURE_HEADER)?;
        let algorithm = header(headers, ALGORITHM_HEADER)?;

        if algorithm != self.algorithm.id() {
            return Err(VerifyFailure::AlgorithmMismatch(algorithm.to_string()));
        }
        let timestamp: u64 = timestamp
            .parse()
            .map_err(|_| VerifyFailure::Malformed(TIMESTAMP_HEADER))?;
        if now.abs_diff(timestamp) > max_age.as_secs() {
            return Err(VerifyFailure::Expired);
        }
        let expected = hex::decode(signature).map_err(|_| VerifyFailure::Malformed(SIGNATURE_HEADER))?;

        let input = canonical::string_to_sign(
            method,
            url,
            headers,
            &self.header_prefix,
            body,
            timestamp,
            nonce,
        );
        if self.mac_matches(input.as_bytes(), &expected) {
            Ok(())
        } else {
            Err(VerifyFailure::Mismatch)
        }
    }
}

fn header<'a>(
    headers: &'a HashMap<String, String>,
    name: &'static str,
) -> std::result::Result<&'a str, VerifyFailure> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim())
        .ok_or(VerifyFailure::MissingHeader(name))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
