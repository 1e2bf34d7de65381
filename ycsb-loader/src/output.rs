use crate::cli::OutputFormat;
use std::path::Path;
use std::sync::Arc;

use ycsb_core::runner::{BuiltCommand, EventPublisher, RunOutcome, StressConfig};

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_check(&self, config_path: &Path, config: &StressConfig, built: &BuiltCommand);
    fn print_header(&self, config_path: &Path, config: &StressConfig);
    /// Where lifecycle events of every run are published.
    fn events(&self) -> Arc<dyn EventPublisher>;
    fn print_outcome(&self, outcome: &RunOutcome);
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
