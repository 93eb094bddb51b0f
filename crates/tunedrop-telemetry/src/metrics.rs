//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters/gauges relevant to metadata lookups and conversions.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    metadata_lookups_total: IntCounterVec,
    conversions_total: IntCounterVec,
    active_conversions: IntGauge,
    relayed_bytes_total: IntCounter,
    process_terminations_total: IntCounterVec,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Conversions currently streaming or waiting on their first byte.
    pub active_conversions: i64,
    /// Total bytes of encoded audio handed to clients.
    pub relayed_bytes_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let metadata_lookups_total = counter_vec(
            "metadata_lookups_total",
            "Metadata lookups by outcome",
            &["outcome"],
        )?;
        let conversions_total = counter_vec(
            "conversions_total",
            "Audio conversions by terminal outcome",
            &["outcome"],
        )?;
        let active_conversions = IntGauge::with_opts(Opts::new(
            "active_conversions",
            "Conversions currently in flight",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "active_conversions",
            source,
        })?;
        let relayed_bytes_total = IntCounter::with_opts(Opts::new(
            "relayed_bytes_total",
            "Encoded audio bytes relayed to clients",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "relayed_bytes_total",
            source,
        })?;

        let process_terminations_total = counter_vec(
            "process_terminations_total",
            "Child processes terminated by the service, by role and signal mode",
            &["role", "mode"],
        )?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "metadata_lookups_total", &metadata_lookups_total)?;
        register(&registry, "conversions_total", &conversions_total)?;
        register(&registry, "active_conversions", &active_conversions)?;
        register(&registry, "relayed_bytes_total", &relayed_bytes_total)?;
        register(
            &registry,
            "process_terminations_total",
            &process_terminations_total,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                metadata_lookups_total,
                conversions_total,
                active_conversions,
                relayed_bytes_total,
                process_terminations_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Count a finished metadata lookup under the supplied outcome label.
    pub fn inc_metadata_lookup(&self, outcome: &str) {
        self.inner
            .metadata_lookups_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Mark a conversion as started.
    pub fn conversion_started(&self) {
        self.inner.active_conversions.inc();
    }

    /// Mark a conversion as finished and count it under the supplied outcome label.
    pub fn conversion_finished(&self, outcome: &str) {
        self.inner.active_conversions.dec();
        self.inner
            .conversions_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Add relayed bytes to the running total.
    pub fn add_relayed_bytes(&self, bytes: u64) {
        self.inner.relayed_bytes_total.inc_by(bytes);
    }

    /// Count a child process the service had to terminate; `mode` is `graceful` or `forced`.
    pub fn inc_process_termination(&self, role: &str, mode: &str) {
        self.inner
            .process_terminations_total
            .with_label_values(&[role, mode])
            .inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_conversions: self.inner.active_conversions.get(),
            relayed_bytes_total: self.inner.relayed_bytes_total.get(),
        }
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
