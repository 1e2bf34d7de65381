use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use ycsb_core::runner::{
    BuiltCommand, EventPublisher, RunOutcome, StressConfig, StressEvent, SummaryResult,
};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_check(&self, _config_path: &Path, config: &StressConfig, built: &BuiltCommand) {
        let line = JsonCheckLine {
            kind: "check",
            image: &config.stress_image,
            command: &built.command,
            staged_files: built
                .staged_files
                .iter()
                .map(|f| f.container_path.as_str())
                .collect(),
        };
        emit_json_line(&line);
    }

    fn print_header(&self, _config_path: &Path, _config: &StressConfig) {}

    fn events(&self) -> Arc<dyn EventPublisher> {
        Arc::new(JsonEvents)
    }

    fn print_outcome(&self, outcome: &RunOutcome) {
        emit_json_line(&build_outcome_line(outcome));
    }
}

struct JsonEvents;

impl EventPublisher for JsonEvents {
    fn publish(&self, event: StressEvent) {
        emit_json_line(&JsonEventLine {
            kind: "event",
            event: &event,
        });
    }
}

#[derive(Debug, Serialize)]
struct JsonCheckLine<'a> {
    kind: &'static str,
    image: &'a str,
    command: &'a str,
    staged_files: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct JsonEventLine<'a> {
    kind: &'static str,
    event: &'a StressEvent,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonOutcomeLine<'a> {
    pub kind: &'static str,
    pub loader_idx: usize,
    pub cpu_idx: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'a SummaryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(crate) fn build_outcome_line(outcome: &RunOutcome) -> JsonOutcomeLine<'_> {
    let (summary, error) = match &outcome.result {
        Ok(summary) => (Some(summary), None),
        Err(err) => (None, Some(err.to_string())),
    };
    JsonOutcomeLine {
        kind: "summary",
        loader_idx: outcome.loader_idx,
        cpu_idx: outcome.cpu_idx,
        summary,
        error,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
