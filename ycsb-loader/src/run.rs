use anyhow::Context as _;
use std::path::Path;
use std::sync::Arc;

use ycsb_core::runner::{DockerRunner, RunOutcome, StressConfig, StressRunner, build_stress_cmd};
use ycsb_metrics::Registry;

use crate::cli::{CheckArgs, RunArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;

pub async fn check(args: CheckArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);
    let config = load_config(&args.config).await?;
    let built = build_stress_cmd(&config)?;
    out.print_check(&args.config, &config, &built);
    Ok(ExitCode::Success)
}

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let mut config = load_config(&args.config).await?;
    apply_overrides(&mut config, &args)?;
    if config.loaders.is_empty() {
        return Err(RunError::InvalidInput(anyhow::anyhow!(
            "stress config has no loaders: {}",
            args.config.display()
        )));
    }
    // Surface config errors before anything is launched on any loader.
    build_stress_cmd(&config)?;

    out.print_header(&args.config, &config);
    let expected = config.loaders.len() * config.stress_num;

    let registry = Registry::new();
    let runner = Arc::new(StressRunner::new(
        Arc::new(config),
        Arc::new(DockerRunner::new(&args.docker)),
        Arc::clone(&registry),
        out.events(),
    ));

    let outcomes = runner.run_all().await;
    for outcome in &outcomes {
        out.print_outcome(outcome);
    }

    if let Some(path) = &args.metrics_out {
        write_metrics(path, &registry)
            .await
            .map_err(RunError::RuntimeError)?;
    }

    let failed = failed_runs(&outcomes, expected);
    if failed > 0 {
        return Err(RunError::RuntimeError(anyhow::anyhow!(
            "{failed} of {expected} stress runs failed"
        )));
    }

    Ok(ExitCode::Success)
}

/// Runs that returned an error plus runs that produced no outcome at all.
fn failed_runs(outcomes: &[RunOutcome], expected: usize) -> usize {
    let errored = outcomes.iter().filter(|o| o.result.is_err()).count();
    errored + expected.saturating_sub(outcomes.len())
}

async fn load_config(path: &Path) -> Result<StressConfig, RunError> {
    match StressConfig::from_path(path).await {
        Ok(config) => Ok(config),
        Err(ycsb_core::Error::Io(err)) => Err(RunError::InvalidInput(
            anyhow::Error::new(err)
                .context(format!("failed to read stress config: {}", path.display())),
        )),
        Err(err) => Err(err.into()),
    }
}

fn apply_overrides(config: &mut StressConfig, args: &RunArgs) -> Result<(), RunError> {
    if let Some(n) = args.stress_num {
        config.stress_num = n;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    config.validate()?;
    Ok(())
}

async fn write_metrics(path: &Path, registry: &Registry) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create metrics output dir: {}", parent.display()))?;
    }
    tokio::fs::write(path, registry.render_prometheus())
        .await
        .with_context(|| format!("failed to write metrics: {}", path.display()))?;
    tracing::info!(path = %path.display(), series = registry.summarize().len(), "wrote ycsb gauges");
    Ok(())
}
