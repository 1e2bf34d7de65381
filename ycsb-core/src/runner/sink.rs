use std::sync::Arc;

use ycsb_metrics::{GaugeHandle, Registry};

use super::classify::Operation;

pub const GAUGE_HELP: &str = "Gauge for ycsb metrics";

/// Label names of every ycsb gauge: loader address, loader index, run id,
/// and the field (or verify status) the value belongs to.
pub const GAUGE_LABELS: [&str; 4] = ["instance", "loader_idx", "uuid", "type"];

pub fn gauge_name(operation: Operation) -> String {
    let op: &'static str = operation.into();
    format!("collectd_ycsb_{}_gauge", op.replace('-', "_"))
}

/// Where parsed values go. Shared by every run of the process, so both
/// methods must be safe to call concurrently.
pub trait GaugeSink: Send + Sync {
    type Gauge: Clone + Send + Sync + 'static;

    /// Returns the gauge registered under `name`, registering it on first use.
    fn ensure_gauge(self: &Arc<Self>, name: &str) -> Self::Gauge;

    /// Sets one labeled series. Never fails; problems are logged.
    fn set_value(&self, gauge: &Self::Gauge, labels: &[&str], value: f64);
}

impl GaugeSink for Registry {
    type Gauge = GaugeHandle;

    fn ensure_gauge(self: &Arc<Self>, name: &str) -> GaugeHandle {
        self.gauge_handle(name, GAUGE_HELP, &GAUGE_LABELS)
    }

    fn set_value(&self, gauge: &GaugeHandle, labels: &[&str], value: f64) {
        if let Err(err) = gauge.set(labels, value) {
            tracing::warn!(gauge = gauge.name(), error = %err, "failed to set ycsb gauge");
        }
    }
}
