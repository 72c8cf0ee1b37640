use std::sync::LazyLock;

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry,
};
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry as PrometheusRegistry,
    TextEncoder,
};
use tracing::error;

use crate::registry::Error;

const DURATION_BUCKETS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

pub static METRICS_PROVIDER: LazyLock<MetricsProvider> =
    LazyLock::new(|| MetricsProvider::new().expect("Unable to create metrics provider"));

fn registration_error(name: &str, error: &prometheus::Error) -> Error {
    error!("Unable to create {name} metric: {error}");
    Error::Initialization(format!("Unable to create {name} metric"))
}

pub struct MetricsProvider {
    registry: PrometheusRegistry,
    /// Responses by route and status class (`2xx`, `4xx`...).
    pub http_requests: IntCounterVec,
    pub http_request_duration: HistogramVec,
    pub connections_in_flight: IntGauge,
    /// Client authentications by method (`basic`, `bearer`) and result.
    pub auth_attempts: IntCounterVec,
    pub tokens_issued: IntCounter,
    /// Upstream fetches by content kind and outcome (`fetched`, `digest_mismatch`, `failed`).
    pub upstream_fetches: IntCounterVec,
    pub store_hits: IntCounterVec,
}

impl MetricsProvider {
    pub fn new() -> Result<Self, Error> {
        let registry = PrometheusRegistry::new();

        let http_requests = register_int_counter_vec_with_registry!(
            "registry_http_requests_total",
            "HTTP responses sent, by route and status class.",
            &["route", "status"],
            &registry
        )
        .map_err(|e| registration_error("registry_http_requests_total", &e))?;

        let http_request_duration = register_histogram_vec_with_registry!(
            "registry_http_request_duration_ms",
            "Time to produce a response head, in milliseconds.",
            &["route"],
            DURATION_BUCKETS_MS.to_vec(),
            &registry
        )
        .map_err(|e| registration_error("registry_http_request_duration_ms", &e))?;

        let connections_in_flight = register_int_gauge_with_registry!(
            "registry_connections_in_flight",
            "Client connections currently being served.",
            &registry
        )
        .map_err(|e| registration_error("registry_connections_in_flight", &e))?;

        let auth_attempts = register_int_counter_vec_with_registry!(
            "registry_auth_attempts_total",
            "Client authentication attempts, by method and result.",
            &["method", "result"],
            &registry
        )
        .map_err(|e| registration_error("registry_auth_attempts_total", &e))?;

        let tokens_issued = register_int_counter_with_registry!(
            "registry_tokens_issued_total",
            "Bearer tokens issued by the token endpoint.",
            &registry
        )
        .map_err(|e| registration_error("registry_tokens_issued_total", &e))?;

        let upstream_fetches = register_int_counter_vec_with_registry!(
            "registry_upstream_fetches_total",
            "Content fetches from upstream registries, by kind and outcome.",
            &["kind", "result"],
            &registry
        )
        .map_err(|e| registration_error("registry_upstream_fetches_total", &e))?;

        let store_hits = register_int_counter_vec_with_registry!(
            "registry_store_hits_total",
            "Content lookups served from the local store, by kind.",
            &["kind"],
            &registry
        )
        .map_err(|e| registration_error("registry_store_hits_total", &e))?;

        Ok(Self {
            registry,
            http_requests,
            http_request_duration,
            connections_in_flight,
            auth_attempts,
            tokens_issued,
            upstream_fetches,
            store_hits,
        })
    }

    /// Text exposition of every metric, with its content type.
    pub fn gather(&self) -> Result<(String, Vec<u8>), Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Unable to encode metrics: {e}")))?;

        Ok((encoder.format_type().to_string(), buffer))
    }
}
