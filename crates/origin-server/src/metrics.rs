//! Prometheus instruments, exposed at `/metrics`.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Registry plus the instruments the service records.
pub struct Metrics {
    registry: Registry,

    /// Requests by path and status class.
    pub requests_total: IntCounterVec,

    /// Ingest pipeline latency.
    pub ingest_latency_seconds: Histogram,

    /// IP allowlist entries that failed to parse.
    pub ip_allowlist_parse_errors_total: IntCounter,

    /// Requests rejected by the rate limiter.
    pub rate_limit_rejections_total: IntCounter,

    /// Webhook delivery attempts by outcome.
    pub webhook_deliveries_total: IntCounterVec,

    /// Evidence packs by terminal outcome.
    pub evidence_packs_total: IntCounterVec,
}

impl Metrics {
    /// Builds and registers all instruments.
    ///
    /// # Panics
    ///
    /// Panics if instrument registration fails, which only happens on
    /// duplicate registration and is a programming error caught at startup.
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("origin_requests_total", "HTTP requests processed"),
            &["path", "status"],
        )
        .expect("valid metric");
        let ingest_latency_seconds = Histogram::with_opts(
            HistogramOpts::new("origin_ingest_latency_seconds", "Ingest pipeline latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0]),
        )
        .expect("valid metric");
        let ip_allowlist_parse_errors_total = IntCounter::new(
            "origin_ip_allowlist_parse_errors_total",
            "IP allowlist entries that failed to parse",
        )
        .expect("valid metric");
        let rate_limit_rejections_total = IntCounter::new(
            "origin_rate_limit_rejections_total",
            "Requests rejected by the rate limiter",
        )
        .expect("valid metric");
        let webhook_deliveries_total = IntCounterVec::new(
            Opts::new("origin_webhook_deliveries_total", "Webhook delivery attempts"),
            &["status"],
        )
        .expect("valid metric");
        let evidence_packs_total = IntCounterVec::new(
            Opts::new("origin_evidence_packs_total", "Evidence packs by outcome"),
            &["status"],
        )
        .expect("valid metric");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("register");
        registry
            .register(Box::new(ingest_latency_seconds.clone()))
            .expect("register");
        registry
            .register(Box::new(ip_allowlist_parse_errors_total.clone()))
            .expect("register");
        registry
            .register(Box::new(rate_limit_rejections_total.clone()))
            .expect("register");
        registry
            .register(Box::new(webhook_deliveries_total.clone()))
            .expect("register");
        registry
            .register(Box::new(evidence_packs_total.clone()))
            .expect("register");

        Self {
            registry,
            requests_total,
            ingest_latency_seconds,
            ip_allowlist_parse_errors_total,
            rate_limit_rejections_total,
            webhook_deliveries_total,
            evidence_packs_total,
        }
    }

    /// Renders the exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
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
    fn test_instruments_render() {
        let metrics = Metrics::new();
        metrics.requests_total.with_label_values(&["/v1/ingest", "200"]).inc();
        metrics.rate_limit_rejections_total.inc();

        let output = metrics.render();
        assert!(output.contains("origin_requests_total"));
        assert!(output.contains("origin_rate_limit_rejections_total"));
    }
}
