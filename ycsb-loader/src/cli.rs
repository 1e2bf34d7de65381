use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 90s, 30m, 1h)".to_string());
    }

    let d = humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}': {e} (expected e.g. 90s, 30m, 1h)"))?;
    if d.is_zero() {
        return Err(format!("duration '{s}' must be positive"));
    }
    Ok(d)
}

fn parse_stress_num(input: &str) -> Result<usize, String> {
    match input.trim().parse::<usize>() {
        Ok(0) => Err("stress-num must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("invalid stress-num '{input}' (expected a positive integer)")),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable event and summary lines.
    HumanReadable,
    /// Emit events and summaries as JSON lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "ycsb-loader",
    author,
    version,
    about = "Runs YCSB stress workloads in containers and publishes live stats",
    long_about = "ycsb-loader runs YCSB workloads inside containers on each configured loader.\n\nStatus lines of every running workload are parsed as they are written and published as gauges; the final YCSB report is summarized per run.\n\nCLI flags override values from the stress config file.",
    after_help = "Examples:\n  ycsb-loader check stress.yaml\n  ycsb-loader run stress.yaml\n  ycsb-loader run stress.yaml --stress-num 4 --timeout 30m --output json\n  ycsb-loader run stress.yaml --metrics-out ycsb.prom"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the configured YCSB workload on every loader
    #[command(
        long_about = "Run `stress_num` workloads per loader concurrently. Exits non-zero if any run faulted."
    )]
    Run(RunArgs),

    /// Validate a stress config and print the command it would run
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Path to the stress config (.yaml)
    pub config: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the stress config (.yaml)
    pub config: PathBuf,

    /// Override concurrent workloads per loader
    #[arg(long, env = "YCSB_STRESS_NUM", value_parser = parse_stress_num)]
    pub stress_num: Option<usize>,

    /// Override the workload timeout (e.g. 90s, 30m, 1h)
    #[arg(long, env = "YCSB_TIMEOUT", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Docker client binary
    #[arg(long, env = "YCSB_DOCKER", default_value = "docker")]
    pub docker: PathBuf,

    /// Write the final gauge values in Prometheus text format to this file
    #[arg(long, value_name = "PATH")]
    pub metrics_out: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
