//! Lifecycle events of a stress run.

use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;

use super::orchestrator::WorkloadRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Start,
    Error,
    Failure,
    Finish,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StressEvent {
    pub kind: EventKind,
    pub run_id: String,
    pub node: String,
    pub stress_cmd: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl StressEvent {
    fn new(kind: EventKind, run: &WorkloadRun) -> Self {
        Self {
            kind,
            run_id: run.run_id.clone(),
            node: run.node.clone(),
            stress_cmd: run.command.clone(),
            errors: Vec::new(),
            log_file: None,
        }
    }

    pub fn start(run: &WorkloadRun) -> Self {
        Self::new(EventKind::Start, run)
    }

    /// A failure-pattern match in live output. The run continues.
    pub fn error(run: &WorkloadRun, line: &str) -> Self {
        Self {
            errors: vec![line.to_string()],
            ..Self::new(EventKind::Error, run)
        }
    }

    pub fn failure(run: &WorkloadRun, detail: String) -> Self {
        Self {
            errors: vec![detail],
            log_file: Some(run.log_path.clone()),
            ..Self::new(EventKind::Failure, run)
        }
    }

    pub fn finish(run: &WorkloadRun) -> Self {
        Self {
            log_file: Some(run.log_path.clone()),
            ..Self::new(EventKind::Finish, run)
        }
    }

    pub fn publish(self, publisher: &dyn EventPublisher) {
        publisher.publish(self);
    }
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: StressEvent);
}

/// Writes every event to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl EventPublisher for TracingEvents {
    fn publish(&self, event: StressEvent) {
        let log_file = event
            .log_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match event.kind {
            EventKind::Start | EventKind::Finish => tracing::info!(
                kind = %event.kind,
                run_id = %event.run_id,
                node = %event.node,
                stress_cmd = %event.stress_cmd,
                log_file = %log_file,
                "ycsb stress event"
            ),
            EventKind::Error => tracing::warn!(
                kind = %event.kind,
                run_id = %event.run_id,
                node = %event.node,
                errors = ?event.errors,
                "ycsb stress event"
            ),
            EventKind::Failure => tracing::error!(
                kind = %event.kind,
                run_id = %event.run_id,
                node = %event.node,
                stress_cmd = %event.stress_cmd,
                errors = ?event.errors,
                log_file = %log_file,
                "ycsb stress event"
            ),
        }
    }
}

/// Keeps events in memory in publish order.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<StressEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<StressEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn take(&self) -> Vec<StressEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventPublisher for RecordingEvents {
    fn publish(&self, event: StressEvent) {
        self.events.lock().push(event);
    }
}
