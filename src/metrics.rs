use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct ProxyMetrics {
    registry: Registry,
    requests_by_action: IntCounterVec,
    decrypt_failures: IntCounterVec,
    encrypt_failures: IntCounterVec,
    upstream_failures: IntCounterVec,
    log_append_failures: IntCounterVec,
    upstream_latency: Histogram,
}

impl ProxyMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_by_action = IntCounterVec::new(
            Opts::new("proxy_requests_total", "Intercepted requests grouped by resolved action"),
            &["action"],
        )?;
        let decrypt_failures = IntCounterVec::new(
            Opts::new("proxy_decrypt_failures_total", "Params or response decrypt failures"),
            &["stage"],
        )?;
        let encrypt_failures = IntCounterVec::new(
            Opts::new("proxy_encrypt_failures_total", "Params or response encrypt failures"),
            &["stage"],
        )?;
        let upstream_failures = IntCounterVec::new(
            Opts::new("proxy_upstream_failures_total", "Upstream request failures"),
            &["kind"],
        )?;
        let log_append_failures = IntCounterVec::new(
            Opts::new("proxy_log_append_failures_total", "Audit log append failures"),
            &["method"],
        )?;
        let upstream_latency = Histogram::with_opts(HistogramOpts::new(
            "proxy_upstream_latency_seconds",
            "Time spent waiting on the upstream control server",
        ))?;

        registry.register(Box::new(requests_by_action.clone()))?;
        registry.register(Box::new(decrypt_failures.clone()))?;
        registry.register(Box::new(encrypt_failures.clone()))?;
        registry.register(Box::new(upstream_failures.clone()))?;
        registry.register(Box::new(log_append_failures.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;

        Ok(Self {
            registry,
            requests_by_action,
            decrypt_failures,
            encrypt_failures,
            upstream_failures,
            log_append_failures,
            upstream_latency,
        })
    }

    pub fn record_action(&self, action: &str) {
        self.requests_by_action.with_label_values(&[action]).inc();
    }

    pub fn record_decrypt_failure(&self, stage: &str) {
        self.decrypt_failures.with_label_values(&[stage]).inc();
    }

    pub fn record_encrypt_failure(&self, stage: &str) {
        self.encrypt_failures.with_label_values(&[stage]).inc();
    }

    pub fn record_upstream_failure(&self, kind: &str) {
        self.upstream_failures.with_label_values(&[kind]).inc();
    }

    pub fn record_log_append_failure(&self, method: &str) {
        self.log_append_failures.with_label_values(&[method]).inc();
    }

    pub fn observe_upstream_latency(&self, secs: f64) {
        self.upstream_latency.observe(secs);
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
