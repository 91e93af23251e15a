//! Prometheus metrics for the reconciliation loop

use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Reconciler metrics, registered on a private registry
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Passes by outcome (`success` or an error kind)
    reconcile_total: IntCounterVec,
    /// Wall-clock time of one pass
    reconcile_duration: Histogram,
    /// Writes to generated objects by kind and operation
    object_writes: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let reconcile_total = IntCounterVec::new(
            Opts::new("nexus_reconcile_total", "Reconciliation passes by outcome"),
            &["outcome"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new("nexus_reconcile_duration_seconds", "Duration of one reconciliation pass")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        let object_writes = IntCounterVec::new(
            Opts::new("nexus_object_writes_total", "Writes to generated objects"),
            &["kind", "op"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(object_writes.clone()))?;
        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            object_writes,
        })
    }

    pub fn record_pass(&self, outcome: &str, elapsed: Duration) {
        self.reconcile_total.with_label_values(&[outcome]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_write(&self, kind: &str, op: &str) {
        self.object_writes.with_label_values(&[kind, op]).inc();
    }

    /// Count of passes with `outcome`.
    #[cfg(test)]
    pub fn passes(&self, outcome: &str) -> u64 {
        self.reconcile_total.with_label_values(&[outcome]).get()
    }

    /// Text exposition of every metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposition_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_pass("success", Duration::from_millis(20));
        metrics.record_write("Deployment", "create");

        let text = metrics.encode().unwrap();
        assert!(text.contains("nexus_reconcile_total{outcome=\"success\"} 1"));
        assert!(text.contains("nexus_object_writes_total{kind=\"Deployment\",op=\"create\"} 1"));
        assert!(text.contains("nexus_reconcile_duration_seconds_count 1"));
        assert_eq!(metrics.passes("success"), 1);
    }
}
