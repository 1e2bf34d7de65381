use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::registry::{GaugeId, Registry};

/// Last-value cell of one labeled series. Stores the `f64` bit pattern.
#[derive(Debug, Clone)]
pub(crate) struct GaugeCell(Arc<AtomicU64>);

impl GaugeCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0f64.to_bits())))
    }

    #[inline]
    pub(crate) fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSeriesSummary {
    pub name: String,
    pub help: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Public handle for writing one named gauge. Cheap to clone; all clones
/// (and all handles returned for the same name) address the same series.
#[derive(Debug, Clone)]
pub struct GaugeHandle {
    pub(crate) id: GaugeId,
    pub(crate) name: Arc<str>,
    pub(crate) registry: Arc<Registry>,
}

impl GaugeHandle {
    pub fn id(&self) -> GaugeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the series identified by `label_values` (declared label order).
    pub fn set(&self, label_values: &[&str], value: f64) -> Result<()> {
        self.registry.set(self.id, label_values, value)
    }

    /// Current value of a series, `None` if it was never written.
    pub fn get(&self, label_values: &[&str]) -> Option<f64> {
        self.registry.get(self.id, label_values)
    }
}
