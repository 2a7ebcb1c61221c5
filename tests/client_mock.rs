//! Integration tests for EnhancedClient over a real HTTP transport (mockito).

use mockito::{Matcher, Server};
use sdk_resilience::cache::CacheConfig;
use sdk_resilience::middleware::{DefaultHeaders, TracingMiddleware};
use sdk_resilience::resilience::{CircuitBreakerConfig, CircuitState, RetryConfig};
use sdk_resilience::signing::{RequestSigner, SIGNATURE_HEADER};
use sdk_resilience::transport::{Request, ReqwestTransport};
use sdk_resilience::{EnhancedClient, Error};
use std::time::Duration;

fn transport(base_url: String) -> ReqwestTransport {
    ReqwestTransport::with_client(reqwest::Client::new()).with_base_url(base_url)
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(20))
        .with_jitter(false)
}

#[tokio::test]
async fn test_successful_json_response() {
    let mut server = Server::new_async().await;
    let ok = server
        .mock("GET", "/v1/items")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":1}]"#)
        .create_async()
        .await;

    let client = EnhancedClient::builder(transport(server.url()))
        .retry(fast_retry(3))
        .build()
        .unwrap();

    let resp = client.get("/v1/items").await.unwrap();
    assert_eq!(resp.header("Content-Type"), Some("application/json"));
    let items: serde_json::Value = resp.json().unwrap();
    assert_eq!(items[0]["id"], 1);
    ok.assert_async().await;
}

#[tokio::test]
async fn test_exhausted_attempts_hit_server_max_attempts_times() {
    let mut server = Server::new_async().await;
    let busy = server
        .mock("POST", "/v1/jobs")
        .with_status(502)
        .expect(3)
        .create_async()
        .await;

    let client = EnhancedClient::builder(transport(server.url()))
        .retry(fast_retry(3))
        .build()
        .unwrap();

    let err = client
        .post_json("/v1/jobs", &serde_json::json!({"name": "reindex"}))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(502));
    busy.assert_async().await;

    let stats = client.stats().endpoint("POST /v1/jobs").unwrap();
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.failures, 1);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let missing = server
        .mock("GET", "/v1/missing")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let client = EnhancedClient::builder(transport(server.url()))
        .retry(fast_retry(5))
        .build()
        .unwrap();

    let err = client.get("/v1/missing").await.unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    missing.assert_async().await;
}

#[tokio::test]
async fn test_retry_after_is_surfaced() {
    let mut server = Server::new_async().await;
    let _limited = server
        .mock("GET", "/v1/limited")
        .with_status(429)
        .with_header("retry-after", "12")
        .create_async()
        .await;

    let client = EnhancedClient::builder(transport(server.url()))
        .retry(fast_retry(1))
        .build()
        .unwrap();

    let err = client.get("/v1/limited").await.unwrap_err();
    assert_eq!(err.status_code(), Some(429));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
}

#[tokio::test]
async fn test_get_responses_are_cached_per_query() {
    let mut server = Server::new_async().await;
    let page1 = server
        .mock("GET", "/v1/items")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_body("one")
        .expect(1)
        .create_async()
        .await;
    let page2 = server
        .mock("GET", "/v1/items")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(200)
        .with_body("two")
        .expect(1)
        .create_async()
        .await;

    let client = EnhancedClient::builder(transport(server.url()))
        .cache(CacheConfig::new().with_ttl(Duration::from_secs(60)))
        .build()
        .unwrap();

    for _ in 0..3 {
        let a = client
            .send(Request::get("/v1/items").with_param("page", "1"))
            .await
            .unwrap();
        assert_eq!(a.text(), "one");
        let b = client
            .send(Request::get("/v1/items").with_param("page", "2"))
            .await
            .unwrap();
        assert_eq!(b.text(), "two");
    }

    page1.assert_async().await;
    page2.assert_async().await;
    let stats = client.cache().unwrap().stats();
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn test_requests_carry_signature_and_default_headers() {
    let mut server = Server::new_async().await;
    let signed = server
        .mock("POST", "/v1/orders")
        .match_header(SIGNATURE_HEADER, Matcher::Regex("^[0-9a-f]{64}$".into()))
        .match_header("x-signature-algorithm", "HMAC-SHA256")
        .match_header("x-signature-timestamp", Matcher::Regex(r"^\d+$".into()))
        .match_header("x-custom-app", "tests")
        .with_status(201)
        .create_async()
        .await;

    let client = EnhancedClient::builder(transport(server.url()))
        .signer(RequestSigner::new("shared-secret").unwrap())
        .middleware(DefaultHeaders::new().with("X-Custom-App", "tests"))
        .middleware(TracingMiddleware)
        .build()
        .unwrap();

    let resp = client
        .post_json("/v1/orders", &serde_json::json!({"sku": "A-1"}))
        .await
        .unwrap();
    assert_eq!(resp.status, 201);
    signed.assert_async().await;
}

#[tokio::test]
async fn test_breaker_opens_against_failing_server() {
    let mut server = Server::new_async().await;
    let down = server
        .mock("GET", "/v1/health")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let client = EnhancedClient::builder(transport(server.url()))
        .retry(fast_retry(1))
        .circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_recovery_timeout(Duration::from_secs(60)),
        )
        .build()
        .unwrap();

    for _ in 0..2 {
        assert!(matches!(client.get("/v1/health").await, Err(Error::Operation(_))));
    }
    let err = client.get("/v1/health").await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { retry_in: Some(_) }));
    assert_eq!(client.circuit_breaker().unwrap().state(), CircuitState::Open);
    down.assert_async().await;
}
