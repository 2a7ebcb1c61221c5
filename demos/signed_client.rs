//! Signed HTTP client configured from YAML plus `SDK_*` environment overrides.
//!
//! Usage:
//!   SDK_DEMO_BASE_URL=https://httpbin.org SDK_DEMO_SECRET=changeme \
//!     cargo run --example signed_client

use sdk_resilience::middleware::{DefaultHeaders, TracingMiddleware};
use sdk_resilience::transport::{Request, ReqwestTransport};
use sdk_resilience::{EnhancedClient, ResilienceConfig};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
retry:
  max_attempts: 3
  base_delay_ms: 500
  max_delay_ms: 5000
circuit_breaker:
  failure_threshold: 5
  recovery_timeout_ms: 30000
rate_limit:
  rate: 5.0
  capacity: 10
cache:
  default_ttl_ms: 60000
  max_size: 500
signing:
  algorithm: HMAC-SHA256
"#;

#[tokio::main]
async fn main() -> sdk_resilience::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let base_url =
        std::env::var("SDK_DEMO_BASE_URL").unwrap_or_else(|_| "https://httpbin.org".to_string());
    let secret = std::env::var("SDK_DEMO_SECRET").unwrap_or_else(|_| "changeme".to_string());

    let config = ResilienceConfig::from_yaml_str(CONFIG)?.with_env_overrides();
    config.validate()?;
    let signing = config.signing.clone().unwrap_or_default();

    let client = EnhancedClient::builder(ReqwestTransport::new()?.with_base_url(base_url))
        .config(&config)
        .signing_secret(secret, &signing)?
        .identity("demo-user")
        .middleware(DefaultHeaders::new().with("X-Custom-Client", "sdk-resilience-demo"))
        .middleware(TracingMiddleware)
        .build()?;

    let resp = client
        .send(Request::get("/headers").with_param("demo", "1"))
        .await?;
    println!("status {}\n{}", resp.status, resp.text());

    // Served from cache.
    client
        .send(Request::get("/headers").with_param("demo", "1"))
        .await?;

    println!("signals: {:?}", client.signals(None));
    Ok(())
}
