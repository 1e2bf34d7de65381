use std::fmt::Write as _;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::gauge::{GaugeCell, GaugeHandle, GaugeSeriesSummary};
use crate::key::{Interner, KeyId};
use crate::labels::LabelValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GaugeId(u32);

#[derive(Debug)]
pub struct GaugeDef {
    pub name: KeyId,
    pub help: Arc<str>,
    pub label_names: SmallVec<[KeyId; 4]>,
}

/// Process-wide gauge registry. Registration is idempotent by name and
/// safe to race; series values are last-write-wins.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<GaugeDef>>,
    storage: DashMap<GaugeId, DashMap<LabelValues, GaugeCell>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a gauge, or returns the id of the gauge already registered
    /// under `name`. The first registration's help text and label names win.
    pub fn register_gauge(&self, name: &str, help: &str, label_names: &[&str]) -> GaugeId {
        let name_id = self.interner.get_or_intern(name);

        let mut defs = self.defs.write();
        if let Some(idx) = defs.iter().position(|d| d.name == name_id) {
            return GaugeId(u32::try_from(idx).unwrap_or(u32::MAX));
        }

        let id = GaugeId(u32::try_from(defs.len()).unwrap_or(u32::MAX));
        defs.push(GaugeDef {
            name: name_id,
            help: Arc::from(help),
            label_names: label_names
                .iter()
                .map(|l| self.interner.get_or_intern(l))
                .collect(),
        });
        self.storage.insert(id, DashMap::new());
        id
    }

    pub fn gauge_handle(
        self: &Arc<Self>,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> GaugeHandle {
        let id = self.register_gauge(name, help, label_names);
        GaugeHandle {
            id,
            name: Arc::from(name),
            registry: Arc::clone(self),
        }
    }

    pub fn gauge_id(&self, name: &str) -> Option<GaugeId> {
        let name_id = self.interner.get(name)?;
        let defs = self.defs.read();
        defs.iter()
            .position(|d| d.name == name_id)
            .and_then(|idx| u32::try_from(idx).ok())
            .map(GaugeId)
    }

    pub fn len(&self) -> usize {
        self.defs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_arity(&self, id: GaugeId, got: usize) -> Result<()> {
        let defs = self.defs.read();
        let def = defs.get(id.0 as usize).ok_or(Error::UnknownGauge(id.0))?;
        if def.label_names.len() != got {
            return Err(Error::LabelArity {
                name: self
                    .interner
                    .resolve(def.name)
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
                expected: def.label_names.len(),
                got,
            });
        }
        Ok(())
    }

    fn resolve_values(&self, label_values: &[&str]) -> LabelValues {
        LabelValues::from_iter_ordered(
            label_values
                .iter()
                .map(|v| self.interner.get_or_intern(v)),
        )
    }

    /// Sets one series of gauge `id`, creating the series on first write.
    pub fn set(&self, id: GaugeId, label_values: &[&str], value: f64) -> Result<()> {
        self.cell(id, label_values)?.set(value);
        Ok(())
    }

    fn cell(&self, id: GaugeId, label_values: &[&str]) -> Result<GaugeCell> {
        self.check_arity(id, label_values.len())?;
        let series_map = self.storage.get(&id).ok_or(Error::UnknownGauge(id.0))?;
        let key = self.resolve_values(label_values);

        if let Some(cell) = series_map.get(&key) {
            return Ok(cell.value().clone());
        }

        Ok(series_map.entry(key).or_insert_with(GaugeCell::new).clone())
    }

    /// Current value of a series, `None` if it was never written.
    pub fn get(&self, id: GaugeId, label_values: &[&str]) -> Option<f64> {
        let series_map = self.storage.get(&id)?;
        let mut values = SmallVec::<[KeyId; 4]>::new();
        for v in label_values {
            values.push(self.interner.get(v)?);
        }
        let key = LabelValues::from_iter_ordered(values);
        series_map.get(&key).map(|cell| cell.get())
    }

    fn resolve_str(&self, id: KeyId) -> String {
        self.interner
            .resolve(id)
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    pub fn summarize(&self) -> Vec<GaugeSeriesSummary> {
        let mut out = Vec::new();
        let defs = self.defs.read();

        for entry in self.storage.iter() {
            let gauge_id = entry.key();
            let series_map = entry.value();

            let Some(def) = defs.get(gauge_id.0 as usize) else {
                continue;
            };

            let name = self.resolve_str(def.name);

            for series in series_map.iter() {
                let labels = def
                    .label_names
                    .iter()
                    .zip(series.key().iter())
                    .map(|(k, v)| (self.resolve_str(*k), self.resolve_str(v)))
                    .collect();

                out.push(GaugeSeriesSummary {
                    name: name.clone(),
                    help: def.help.to_string(),
                    labels,
                    value: series.value().get(),
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        out
    }

    /// Renders every series in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let mut last_name: Option<String> = None;

        for series in self.summarize() {
            if last_name.as_deref() != Some(series.name.as_str()) {
                let _ = writeln!(out, "# HELP {} {}", series.name, series.help);
                let _ = writeln!(out, "# TYPE {} gauge", series.name);
                last_name = Some(series.name.clone());
            }

            let labels = series
                .labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
                .collect::<Vec<_>>()
                .join(",");
            let _ = writeln!(out, "{}{{{labels}}} {}", series.name, series.value);
        }

        out
    }
}

fn escape_label_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}
