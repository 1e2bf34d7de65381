use std::path::Path;
use std::sync::Arc;

use ycsb_core::runner::{
    BuiltCommand, EventPublisher, RunOutcome, StressConfig, SummaryResult, TracingEvents,
};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput;

impl OutputFormatter for HumanReadableOutput {
    fn print_check(&self, config_path: &Path, config: &StressConfig, built: &BuiltCommand) {
        println!("config: {}", config_path.display());
        println!("image: {}", config.stress_image);
        println!("command: {}", built.command);
        for file in &built.staged_files {
            println!();
            println!("--- {} ---", file.container_path);
            print!("{}", file.contents);
        }
    }

    fn print_header(&self, config_path: &Path, config: &StressConfig) {
        println!("config: {}", config_path.display());
        println!(
            "loaders: {} stress_num={} timeout={}",
            config.loaders.len(),
            config.stress_num,
            humantime::format_duration(config.timeout)
        );
        println!();
    }

    fn events(&self) -> Arc<dyn EventPublisher> {
        Arc::new(TracingEvents)
    }

    fn print_outcome(&self, outcome: &RunOutcome) {
        match &outcome.result {
            Ok(summary) => println!(
                "loader {} cpu {}: {}",
                outcome.loader_idx,
                outcome.cpu_idx,
                render_summary(summary)
            ),
            Err(err) => println!(
                "loader {} cpu {}: FAILED: {err}",
                outcome.loader_idx, outcome.cpu_idx
            ),
        }
    }
}

fn render_summary(summary: &SummaryResult) -> String {
    format!(
        "op rate={} ops/s, latency mean={} ms, latency 99th percentile={} ms",
        summary.op_rate, summary.latency_mean, summary.latency_99th
    )
}
