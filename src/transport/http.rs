use super::{Request, Response, Transport};
use crate::error::{OperationError, TransportKind};
use crate::Result;
use async_trait::async_trait;
use reqwest::Proxy;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Option<String>,
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

impl ReqwestTransport {
    /// Build a client with env-overridable defaults:
    /// `SDK_HTTP_TIMEOUT_SECS` (30), `SDK_HTTP_POOL_MAX_IDLE_PER_HOST` (32),
    /// `SDK_HTTP_POOL_IDLE_TIMEOUT_SECS` (90) and `SDK_PROXY_URL`.
    pub fn new() -> Result<Self> {
        let timeout_secs = env_u64("SDK_HTTP_TIMEOUT_SECS").unwrap_or(30);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(
                env::var("SDK_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env_u64("SDK_HTTP_POOL_IDLE_TIMEOUT_SECS").unwrap_or(90),
            )));

        if let Ok(proxy_url) = env::var("SDK_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().map_err(|e| crate::Error::Configuration {
            message: format!("failed to build HTTP client: {}", e),
            context: crate::ErrorContext::new().with_source("reqwest"),
        })?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    /// Relative request URLs are joined onto `base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn resolve(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.starts_with("http://") && !url.starts_with("https://") => {
                if url.starts_with('/') {
                    format!("{}{}", base, url)
                } else {
                    format!("{}/{}", base, url)
                }
            }
            _ => url.to_string(),
        }
    }
}

fn classify_reqwest(e: &reqwest::Error) -> TransportKind {
    if e.is_timeout() {
        TransportKind::Timeout
    } else if e.is_connect() {
        TransportKind::Connect
    } else if e.is_body() {
        TransportKind::Io
    } else {
        TransportKind::Protocol
    }
}

impl From<reqwest::Error> for OperationError {
    fn from(e: reqwest::Error) -> Self {
        OperationError::transport(classify_reqwest(&e), e.to_string())
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
fn parse_retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> std::result::Result<Response, OperationError> {
        let url = self.resolve(&request.url);
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| OperationError::other(format!("invalid method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, &url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp.bytes().await?;

        if !(200..300).contains(&status) {
            let retry_after = parse_retry_after(&headers);
            return Err(OperationError::Http {
                status,
                message: String::from_utf8_lossy(&body).chars().take(512).collect(),
                retry_after,
            });
        }

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
