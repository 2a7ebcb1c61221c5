//! Per-endpoint call statistics.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Aggregated figures for one endpoint (`METHOD url-without-query`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointStats {
    pub calls: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub total_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
}

impl EndpointStats {
    pub fn average_latency(&self) -> Option<Duration> {
        if self.calls == 0 {
            return None;
        }
        Some(self.total_latency / self.calls as u32)
    }

    pub fn failure_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.failures as f64 / self.calls as f64
        }
    }

    fn record(&mut self, latency: Duration, success: bool, cache_hit: bool) {
        self.calls += 1;
        if !success {
            self.failures += 1;
        }
        if cache_hit {
            self.cache_hits += 1;
        }
        self.total_latency += latency;
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
    }
}

/// Thread-safe latency and outcome tracker.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    endpoints: Mutex<HashMap<String, EndpointStats>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, endpoint: &str, latency: Duration, success: bool, cache_hit: bool) {
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        endpoints
            .entry(endpoint.to_string())
            .or_default()
            .record(latency, success, cache_hit);
    }

    pub fn endpoint(&self, endpoint: &str) -> Option<EndpointStats> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(endpoint)
            .cloned()
    }

    /// Copy of every endpoint's figures.
    pub fn snapshot(&self) -> HashMap<String, EndpointStats> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn reset(&self) {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
