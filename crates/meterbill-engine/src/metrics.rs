//! Prometheus counters for lifecycle transitions

use meterbill_common::{MeterBillError, Result};
use prometheus::{Counter, Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub struct LifecycleMetrics {
    registry: Registry,
    /// Committed transitions by kind (submit, approve, reject, reopen)
    pub transitions: IntCounterVec,
    /// Failed operations by operation and error kind
    pub failures: IntCounterVec,
    /// Sum of authoritative amounts frozen at approval
    pub billed_amount: Counter,
}

impl LifecycleMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let transitions = IntCounterVec::new(
            Opts::new("meterbill_transitions_total", "Committed reading transitions"),
            &["transition"],
        )
        .map_err(metrics_error)?;
        let failures = IntCounterVec::new(
            Opts::new(
                "meterbill_transition_failures_total",
                "Reading operations that failed",
            ),
            &["operation", "kind"],
        )
        .map_err(metrics_error)?;
        let billed_amount = Counter::new(
            "meterbill_billed_amount_total",
            "Sum of amounts frozen at approval",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(transitions.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(billed_amount.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            transitions,
            failures,
            billed_amount,
        })
    }

    pub fn record_transition(&self, operation: &str) {
        self.transitions.with_label_values(&[operation]).inc();
    }

    pub fn record_failure(&self, operation: &str, err: &MeterBillError) {
        self.failures
            .with_label_values(&[operation, err.kind()])
            .inc();
    }

    /// Text exposition format for a scrape endpoint
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| MeterBillError::Internal(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> MeterBillError {
    MeterBillError::Internal(format!("metrics: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        let metrics = LifecycleMetrics::new().unwrap();
        metrics.record_transition("approve");
        metrics.record_failure("reject", &MeterBillError::validation("reason is required"));

        let text = metrics.encode().unwrap();
        assert!(text.contains("meterbill_transitions_total{transition=\"approve\"} 1"));
        assert!(text.contains("kind=\"validation\""));
    }
}
