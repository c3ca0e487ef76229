//! Prometheus-format metrics facade (§4.8).
//!
//! [`Metrics`] owns a private [`prometheus::Registry`] and exposes typed
//! recorder methods so callers never touch label-vector plumbing directly.
//! [`Metrics::noop`] builds a collector whose recorders do nothing, for when
//! metrics collection is disabled.

use std::sync::Arc;

use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};

const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0];

fn size_buckets() -> Vec<f64> {
    prometheus::exponential_buckets(100.0, 4.0, 10).expect("static exponential buckets")
}

struct Inner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_request_size_bytes: HistogramVec,
    http_response_size_bytes: HistogramVec,
    upstream_requests_total: IntCounterVec,
    upstream_request_duration_seconds: HistogramVec,
    upstream_errors_total: IntCounterVec,
    circuit_breaker_state: IntGaugeVec,
    circuit_breaker_requests_total: IntCounterVec,
    circuit_breaker_state_changes_total: IntCounterVec,
    load_balancer_selections_total: IntCounterVec,
    upstream_health_status: IntGaugeVec,
    active_connections: IntGaugeVec,
    rate_limit_rejections_total: IntCounterVec,
}

/// Handle to the process-wide metrics registry. Cheap to clone.
#[derive(Clone)]
pub enum Metrics {
    Enabled(Arc<Inner>),
    Disabled,
}

impl Metrics {
    /// Builds a fresh registry with every series registered under the
    /// `llmproxy_` prefix.
    pub fn new() -> Self {
        let registry = Registry::new();

        macro_rules! register_counter {
            ($name:expr, $help:expr, $labels:expr) => {{
                let vec = IntCounterVec::new(
                    prometheus::Opts::new($name, $help),
                    $labels,
                )
                .expect("static metric definition");
                registry.register(Box::new(vec.clone())).expect("unique metric name");
                vec
            }};
        }
        macro_rules! register_gauge {
            ($name:expr, $help:expr, $labels:expr) => {{
                let vec = IntGaugeVec::new(
                    prometheus::Opts::new($name, $help),
                    $labels,
                )
                .expect("static metric definition");
                registry.register(Box::new(vec.clone())).expect("unique metric name");
                vec
            }};
        }
        macro_rules! register_histogram {
            ($name:expr, $help:expr, $labels:expr, $buckets:expr) => {{
                let vec = HistogramVec::new(
                    prometheus::HistogramOpts::new($name, $help).buckets($buckets),
                    $labels,
                )
                .expect("static metric definition");
                registry.register(Box::new(vec.clone())).expect("unique metric name");
                vec
            }};
        }

        let inner = Inner {
            registry: registry.clone(),
            http_requests_total: register_counter!(
                "llmproxy_http_requests_total",
                "Total inbound HTTP requests handled by a forward listener.",
                &["forward", "method", "path", "status"]
            ),
            http_request_duration_seconds: register_histogram!(
                "llmproxy_http_request_duration_seconds",
                "End-to-end latency of inbound requests.",
                &["forward", "method", "path"],
                DURATION_BUCKETS.to_vec()
            ),
            http_request_size_bytes: register_histogram!(
                "llmproxy_http_request_size_bytes",
                "Size of inbound request bodies.",
                &["forward", "method", "path"],
                size_buckets()
            ),
            http_response_size_bytes: register_histogram!(
                "llmproxy_http_response_size_bytes",
                "Size of outbound response bodies.",
                &["forward", "method", "path", "status"],
                size_buckets()
            ),
            upstream_requests_total: register_counter!(
                "llmproxy_upstream_requests_total",
                "Total requests dispatched to an upstream.",
                &["group", "upstream", "method", "status"]
            ),
            upstream_request_duration_seconds: register_histogram!(
                "llmproxy_upstream_request_duration_seconds",
                "Latency of calls to an upstream.",
                &["group", "upstream", "method"],
                DURATION_BUCKETS.to_vec()
            ),
            upstream_errors_total: register_counter!(
                "llmproxy_upstream_errors_total",
                "Total errors contacting an upstream, by error type.",
                &["group", "upstream", "error_type"]
            ),
            circuit_breaker_state: register_gauge!(
                "llmproxy_circuit_breaker_state",
                "Current breaker state (0=closed, 1=half-open, 2=open).",
                &["group", "upstream"]
            ),
            circuit_breaker_requests_total: register_counter!(
                "llmproxy_circuit_breaker_requests_total",
                "Calls admitted or denied by the breaker, by result.",
                &["group", "upstream", "result"]
            ),
            circuit_breaker_state_changes_total: register_counter!(
                "llmproxy_circuit_breaker_state_changes_total",
                "Breaker state transitions.",
                &["group", "upstream", "from", "to"]
            ),
            load_balancer_selections_total: register_counter!(
                "llmproxy_load_balancer_selections_total",
                "Upstream selections made by the balancer.",
                &["group", "upstream", "balancer_type"]
            ),
            upstream_health_status: register_gauge!(
                "llmproxy_upstream_health_status",
                "Upstream health flag (1=healthy, 0=unhealthy).",
                &["group", "upstream"]
            ),
            active_connections: register_gauge!(
                "llmproxy_active_connections",
                "In-flight requests currently being handled by a forward listener.",
                &["forward"]
            ),
            rate_limit_rejections_total: register_counter!(
                "llmproxy_rate_limit_rejections_total",
                "Requests rejected by a rate limiter.",
                &["forward", "limit_type"]
            ),
        };

        Metrics::Enabled(Arc::new(inner))
    }

    /// A collector whose recorders are all no-ops.
    pub fn noop() -> Self {
        Metrics::Disabled
    }

    pub fn record_http_request(&self, forward: &str, method: &str, path: &str, status: u16, duration_secs: f64, request_bytes: usize, response_bytes: usize) {
        if let Metrics::Enabled(inner) = self {
            let status = status.to_string();
            inner.http_requests_total.with_label_values(&[forward, method, path, &status]).inc();
            inner.http_request_duration_seconds.with_label_values(&[forward, method, path]).observe(duration_secs);
            inner.http_request_size_bytes.with_label_values(&[forward, method, path]).observe(request_bytes as f64);
            inner.http_response_size_bytes.with_label_values(&[forward, method, path, &status]).observe(response_bytes as f64);
        }
    }

    pub fn record_upstream_request(&self, group: &str, upstream: &str, method: &str, status: u16, duration_secs: f64) {
        if let Metrics::Enabled(inner) = self {
            let status = status.to_string();
            inner.upstream_requests_total.with_label_values(&[group, upstream, method, &status]).inc();
            inner.upstream_request_duration_seconds.with_label_values(&[group, upstream, method]).observe(duration_secs);
        }
    }

    pub fn record_upstream_error(&self, group: &str, upstream: &str, error_type: &str) {
        if let Metrics::Enabled(inner) = self {
            inner.upstream_errors_total.with_label_values(&[group, upstream, error_type]).inc();
        }
    }

    pub fn set_breaker_state(&self, group: &str, upstream: &str, state: i64) {
        if let Metrics::Enabled(inner) = self {
            inner.circuit_breaker_state.with_label_values(&[group, upstream]).set(state);
        }
    }

    pub fn record_breaker_result(&self, group: &str, upstream: &str, result: &str) {
        if let Metrics::Enabled(inner) = self {
            inner.circuit_breaker_requests_total.with_label_values(&[group, upstream, result]).inc();
        }
    }

    pub fn record_breaker_transition(&self, group: &str, upstream: &str, from: &str, to: &str) {
        if let Metrics::Enabled(inner) = self {
            inner.circuit_breaker_state_changes_total.with_label_values(&[group, upstream, from, to]).inc();
        }
    }

    pub fn record_selection(&self, group: &str, upstream: &str, balancer_type: &str) {
        if let Metrics::Enabled(inner) = self {
            inner.load_balancer_selections_total.with_label_values(&[group, upstream, balancer_type]).inc();
        }
    }

    pub fn set_upstream_health(&self, group: &str, upstream: &str, healthy: bool) {
        if let Metrics::Enabled(inner) = self {
            inner.upstream_health_status.with_label_values(&[group, upstream]).set(healthy as i64);
        }
    }

    pub fn inc_active_connections(&self, forward: &str) {
        if let Metrics::Enabled(inner) = self {
            inner.active_connections.with_label_values(&[forward]).inc();
        }
    }

    pub fn dec_active_connections(&self, forward: &str) {
        if let Metrics::Enabled(inner) = self {
            inner.active_connections.with_label_values(&[forward]).dec();
        }
    }

    pub fn record_rate_limit_rejection(&self, forward: &str, limit_type: &str) {
        if let Metrics::Enabled(inner) = self {
            inner.rate_limit_rejections_total.with_label_values(&[forward, limit_type]).inc();
        }
    }

    /// Renders the registry in Prometheus text format.
    pub fn render(&self) -> String {
        match self {
            Metrics::Enabled(inner) => {
                let encoder = TextEncoder::new();
                let families = inner.registry.gather();
                let mut buffer = Vec::new();
                encoder.encode(&families, &mut buffer).expect("text encoding never fails for valid families");
                String::from_utf8(buffer).expect("prometheus text output is valid utf-8")
            }
            Metrics::Disabled => String::new(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_family_names() {
        let metrics = Metrics::new();
        metrics.record_http_request("f1", "GET", "/", 200, 0.01, 10, 20);
        let text = metrics.render();
        assert!(text.contains("llmproxy_http_requests_total"));
    }

    #[test]
    fn noop_render_is_empty() {
        let metrics = Metrics::noop();
        metrics.record_http_request("f1", "GET", "/", 200, 0.01, 10, 20);
        assert_eq!(metrics.render(), "");
    }
}
