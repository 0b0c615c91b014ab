//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Envelope lifecycle
    pub envelopes_built: IntCounter,
    pub envelopes_received: IntCounter,
    pub signatures_applied: IntCounter,

    // Submission outcomes
    pub submissions_total: IntCounter,
    pub submissions_confirmed: IntCounter,
    pub submissions_duplicate: IntCounter,
    pub submissions_rejected: IntCounter,
    pub submissions_transient: IntCounter,
    pub stale_anchors: IntCounter,

    // Histograms
    pub build_latency: Histogram,
    pub submit_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let envelopes_built = IntCounter::with_opts(Opts::new(
            "envelopes_built_total",
            "Transactions assembled by the builder",
        ))?;

        let envelopes_received = IntCounter::with_opts(Opts::new(
            "envelopes_received_total",
            "Serialized envelopes decoded from a counterparty",
        ))?;

        let signatures_applied = IntCounter::with_opts(Opts::new(
            "signatures_applied_total",
            "Signatures placed into signer slots",
        ))?;

        let submissions_total = IntCounter::with_opts(Opts::new(
            "submissions_total",
            "Fully signed transactions handed to the ledger",
        ))?;

        let submissions_confirmed = IntCounter::with_opts(Opts::new(
            "submissions_confirmed_total",
            "Submissions confirmed by the ledger",
        ))?;

        let submissions_duplicate = IntCounter::with_opts(Opts::new(
            "submissions_duplicate_total",
            "Submissions that had already been processed",
        ))?;

        let submissions_rejected = IntCounter::with_opts(Opts::new(
            "submissions_rejected_total",
            "Submissions refused by the ledger",
        ))?;

        let submissions_transient = IntCounter::with_opts(Opts::new(
            "submissions_transient_total",
            "Submissions that failed at the transport level",
        ))?;

        let stale_anchors = IntCounter::with_opts(Opts::new(
            "stale_anchors_total",
            "Transactions whose checkpoint anchor expired before completion",
        ))?;

        let build_latency = Histogram::with_opts(
            HistogramOpts::new("build_latency_seconds", "Transaction build latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        let submit_latency = Histogram::with_opts(
            HistogramOpts::new("submit_latency_seconds", "Submit-and-confirm latency")
                .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(envelopes_built.clone()))?;
        registry.register(Box::new(envelopes_received.clone()))?;
        registry.register(Box::new(signatures_applied.clone()))?;
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(submissions_confirmed.clone()))?;
        registry.register(Box::new(submissions_duplicate.clone()))?;
        registry.register(Box::new(submissions_rejected.clone()))?;
        registry.register(Box::new(submissions_transient.clone()))?;
        registry.register(Box::new(stale_anchors.clone()))?;
        registry.register(Box::new(build_latency.clone()))?;
        registry.register(Box::new(submit_latency.clone()))?;

        Ok(Self {
            registry,
            envelopes_built,
            envelopes_received,
            signatures_applied,
            submissions_total,
            submissions_confirmed,
            submissions_duplicate,
            submissions_rejected,
            submissions_transient,
            stale_anchors,
            build_latency,
            submit_latency,
        })
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_registry_renders_all_families() {
        let local = Metrics::new().unwrap();
        local.envelopes_built.inc();
        local.build_latency.observe(0.002);

        let text = local.render().unwrap();
        assert!(text.contains("envelopes_built_total 1"));
        assert!(text.contains("submissions_rejected_total 0"));
        assert!(text.contains("build_latency_seconds_bucket"));
    }

    #[test]
    fn test_global_counters_increase() {
        let before = metrics().signatures_applied.get();
        metrics().signatures_applied.inc();
        assert!(metrics().signatures_applied.get() > before);
    }

    #[test]
    fn test_timer_observes() {
        let local = Metrics::new().unwrap();
        let timer = Timer::new();
        timer.observe_duration(&local.submit_latency);
        assert_eq!(local.submit_latency.get_sample_count(), 1);
    }
}
