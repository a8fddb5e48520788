// src/metrics/collector.rs
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use anyhow::Result;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub no_backend_total: IntCounter,

    // Backend metrics
    pub forward_attempts_total: IntCounterVec,
    pub retries_total: IntCounterVec,
    pub failovers_total: IntCounterVec,
    pub backend_alive: IntGaugeVec,
    pub backend_in_flight: IntGaugeVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Requests answered, by status code"),
            &["status_code"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let no_backend_total = IntCounter::new(
            "lb_no_backend_total",
            "Requests rejected because no backend was alive",
        )?;
        registry.register(Box::new(no_backend_total.clone()))?;

        let forward_attempts_total = IntCounterVec::new(
            Opts::new("lb_forward_attempts_total", "Forward attempts per backend"),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(forward_attempts_total.clone()))?;

        let retries_total = IntCounterVec::new(
            Opts::new("lb_retries_total", "Same-backend retries after a failed forward"),
            &["backend"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let failovers_total = IntCounterVec::new(
            Opts::new(
                "lb_failovers_total",
                "Bindings abandoned after exhausting retries",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(failovers_total.clone()))?;

        let backend_alive = IntGaugeVec::new(
            Opts::new("lb_backend_alive", "Backend liveness (1=alive, 0=dead)"),
            &["backend"],
        )?;
        registry.register(Box::new(backend_alive.clone()))?;

        let backend_in_flight = IntGaugeVec::new(
            Opts::new("lb_backend_in_flight", "Requests currently bound to a backend"),
            &["backend"],
        )?;
        registry.register(Box::new(backend_in_flight.clone()))?;

        Ok(Self {
            requests_total,
            no_backend_total,
            forward_attempts_total,
            retries_total,
            failovers_total,
            backend_alive,
            backend_in_flight,
        })
    }

    pub fn record_request(&self, status_code: u16) {
        self.requests_total
            .with_label_values(&[&status_code.to_string()])
            .inc();
    }

    pub fn record_no_backend(&self) {
        self.no_backend_total.inc();
    }

    pub fn record_forward(&self, backend: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.forward_attempts_total
            .with_label_values(&[backend, outcome])
            .inc();
    }

    pub fn record_retry(&self, backend: &str) {
        self.retries_total.with_label_values(&[backend]).inc();
    }

    pub fn record_failover(&self, backend: &str) {
        self.failovers_total.with_label_values(&[backend]).inc();
        self.update_backend_health(backend, false);
    }

    pub fn update_backend_health(&self, backend: &str, alive: bool) {
        let value = if alive { 1 } else { 0 };
        self.backend_alive.with_label_values(&[backend]).set(value);
    }

    pub fn update_backend_connections(&self, backend: &str, count: usize) {
        self.backend_in_flight
            .with_label_values(&[backend])
            .set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathered_text_contains_recorded_series() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_request(503);
        metrics.record_no_backend();
        metrics.record_forward("a:80", false);
        metrics.record_failover("a:80");

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains("lb_requests_total{status_code=\"503\"} 1"));
        assert!(text.contains("lb_no_backend_total 1"));
        assert!(text.contains("lb_backend_alive{backend=\"a:80\"} 0"));
        assert!(text.contains("lb_failovers_total{backend=\"a:80\"} 1"));
    }
}
