//! Prometheus metrics
//!
//! Histograms are registered in the default registry on first use.

use prometheus::{Encoder, HistogramOpts, HistogramTimer, HistogramVec, TextEncoder};
use std::sync::OnceLock;
use tracing::warn;

/// Duration histogram labelled by method
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    durations: HistogramVec,
}

impl OperationMetrics {
    /// Create the histogram and register it; a failed registration (for
    /// instance a duplicate) is logged and the metric keeps working unregistered.
    pub fn new(name: &str, help: &str, label: &str) -> prometheus::Result<Self> {
        let opts = HistogramOpts::new(name, help)
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]);
        let durations = HistogramVec::new(opts, &[label])?;
        if let Err(e) = prometheus::register(Box::new(durations.clone())) {
            warn!("unable to register metric {}: {}", name, e);
        }
        Ok(Self { durations })
    }

    /// Start a timer that observes on drop
    pub fn start_timer(&self, method: &str) -> HistogramTimer {
        self.durations.with_label_values(&[method]).start_timer()
    }

    /// Number of observations recorded for `method`
    pub fn sample_count(&self, method: &str) -> u64 {
        self.durations.with_label_values(&[method]).get_sample_count()
    }
}

/// Histogram for partition operations
pub fn partition_operations() -> Option<&'static OperationMetrics> {
    static METRICS: OnceLock<Option<OperationMetrics>> = OnceLock::new();
    METRICS
        .get_or_init(|| {
            init(
                "partition_operations_duration_seconds",
                "Duration of partition operations",
                "method",
            )
        })
        .as_ref()
}

/// Histogram for external command invocations
pub fn system_commands() -> Option<&'static OperationMetrics> {
    static METRICS: OnceLock<Option<OperationMetrics>> = OnceLock::new();
    METRICS
        .get_or_init(|| {
            init(
                "system_command_duration_seconds",
                "Duration of external command invocations",
                "command",
            )
        })
        .as_ref()
}

fn init(name: &str, help: &str, label: &str) -> Option<OperationMetrics> {
    match OperationMetrics::new(name, help, label) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("unable to create metric {}: {}", name, e);
            None
        }
    }
}

/// Render the default registry in the text exposition format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("unable to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
