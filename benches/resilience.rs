//! Benchmarks for the per-request hot paths
//!
//! This benchmark measures:
//! - Cache key derivation and cache get/set
//! - Rate limiter admission across many identifiers
//! - Request signing and verification

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sdk_resilience::cache::{CacheConfig, CacheKey, RequestCache};
use sdk_resilience::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
use sdk_resilience::signing::{RequestSigner, SignatureAlgorithm};
use std::collections::HashMap;
use std::time::Duration;

fn params() -> Vec<(String, String)> {
    vec![
        ("page".to_string(), "3".to_string()),
        ("limit".to_string(), "50".to_string()),
        ("sort".to_string(), "-created".to_string()),
    ]
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    let params = params();

    group.bench_function("key_from_request", |b| {
        b.iter(|| {
            CacheKey::from_request(
                black_box("GET"),
                black_box("https://api.example.com/v1/items"),
                black_box(&params),
                None,
            )
        })
    });

    let cache: RequestCache<String> =
        RequestCache::new(CacheConfig::new().with_max_size(10_000)).unwrap();
    for i in 0..1_000 {
        cache.set("GET", &format!("/v1/items/{}", i), "payload".to_string(), None, &params, None);
    }

    group.bench_function("get_hit", |b| {
        b.iter(|| cache.get("GET", black_box("/v1/items/500"), &params, None))
    });
    group.bench_function("get_miss", |b| {
        b.iter(|| cache.get("GET", black_box("/v1/unknown"), &params, None))
    });

    let small: RequestCache<String> =
        RequestCache::new(CacheConfig::new().with_max_size(256)).unwrap();
    let mut n = 0u64;
    group.bench_function("set_with_eviction", |b| {
        b.iter(|| {
            n += 1;
            small.set("GET", &format!("/v1/items/{}", n), "payload".to_string(), None, &[], None)
        })
    });

    group.finish();
}

fn bench_guards(c: &mut Criterion) {
    let mut group = c.benchmark_group("guards");

    for identities in [1usize, 100, 10_000] {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_rate(1_000_000.0)
                .with_capacity(1_000_000),
        )
        .unwrap();
        let ids: Vec<String> = (0..identities).map(|i| format!("user-{}", i)).collect();
        let mut i = 0;
        group.bench_with_input(BenchmarkId::new("limiter_admit", identities), &ids, |b, ids| {
            b.iter(|| {
                i = (i + 1) % ids.len();
                limiter.admit(black_box(&ids[i]))
            })
        });
    }

    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new().with_recovery_timeout(Duration::from_secs(1)),
    )
    .unwrap();
    group.bench_function("breaker_success_path", |b| {
        b.iter(|| {
            if breaker.can_execute() {
                breaker.record_success();
            }
        })
    });

    group.finish();
}

fn bench_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("signing");
    let headers = HashMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("X-Custom-Tenant".to_string(), "acme".to_string()),
    ]);

    for size in [0usize, 1024, 64 * 1024] {
        let body = vec![b'x'; size];
        group.throughput(Throughput::Bytes(size as u64));
        for algorithm in [SignatureAlgorithm::HmacSha256, SignatureAlgorithm::HmacSha512] {
            let signer = RequestSigner::with_algorithm("bench-secret", algorithm).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("sign_{}", algorithm.id()), size),
                &body,
                |b, body| {
                    b.iter(|| {
                        signer.sign_at("POST", "/v1/items", &headers, black_box(body), 1_700_000_000, "n")
                    })
                },
            );
        }
    }

    let signer = RequestSigner::new("bench-secret").unwrap();
    let mut signed = headers.clone();
    signed.extend(
        signer
            .sign_at("POST", "/v1/items", &headers, b"{}", 1_700_000_000, "n")
            .to_headers(),
    );
    group.throughput(Throughput::Elements(1));
    group.bench_function("verify", |b| {
        b.iter(|| {
            signer.verify_at(
                "POST",
                "/v1/items",
                black_box(&signed),
                b"{}",
                Duration::from_secs(300),
                1_700_000_000,
            )
        })
    });

    group.finish();
}

criterion_group!(benches, bench_cache, bench_guards, bench_signing);
criterion_main!(benches);
