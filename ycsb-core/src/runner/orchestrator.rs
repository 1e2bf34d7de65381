//! Drives one YCSB workload per loader CPU slot: lifecycle events, live
//! stats publishing, failure watching, and the final summary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::classify::FailurePattern;
use super::command::{BuiltCommand, build_stress_cmd};
use super::config::{LoaderNode, StressConfig};
use super::container::{ContainerRequest, ContainerRunner, LineObserver, Sidecar};
use super::error::{Error, ProcessFault, Result};
use super::events::{EventPublisher, StressEvent};
use super::follow::{DEFAULT_POLL_INTERVAL, DEFAULT_READ_INTERVAL, LogFollower};
use super::publisher::{RunLabels, StatsPublisher};
use super::sink::GaugeSink;
use super::summary::{SummaryResult, parse_final_output};

const STDERR_TAIL_LINES: usize = 20;

/// Everything that identifies one launched workload. Fixed once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRun {
    pub run_id: String,
    /// Address of the loader the workload runs on.
    pub node: String,
    pub loader_idx: usize,
    pub cpu_idx: usize,
    pub hosts: Vec<String>,
    pub command: String,
    pub timeout: Duration,
    pub log_path: PathBuf,
}

pub fn log_file_path(logdir: &Path, loader_idx: usize, cpu_idx: usize, run_id: &str) -> PathBuf {
    logdir.join(format!("ycsb-l{loader_idx}-c{cpu_idx}-{run_id}.log"))
}

pub type WatchCallback = fn(&WorkloadRun, &str, &dyn EventPublisher);

/// A pattern checked against every output line and what to do on a match.
/// Matches never stop the run.
#[derive(Debug, Clone)]
pub struct FailureWatcher {
    pub pattern: FailurePattern,
    pub on_match: WatchCallback,
}

impl FailureWatcher {
    pub fn new(pattern: FailurePattern, on_match: WatchCallback) -> Self {
        Self { pattern, on_match }
    }

    pub fn check(&self, run: &WorkloadRun, line: &str, events: &dyn EventPublisher) {
        if self.pattern.is_match(line) {
            (self.on_match)(run, line, events);
        }
    }
}

impl Default for FailureWatcher {
    fn default() -> Self {
        Self::new(FailurePattern::default(), publish_error_event)
    }
}

fn publish_error_event(run: &WorkloadRun, line: &str, events: &dyn EventPublisher) {
    if !line.is_empty() {
        StressEvent::error(run, line).publish(events);
    }
}

struct RunObserver<'a> {
    run: &'a WorkloadRun,
    watchers: &'a [FailureWatcher],
    events: &'a dyn EventPublisher,
}

impl LineObserver for RunObserver<'_> {
    fn on_line(&self, line: &str) {
        for watcher in self.watchers {
            watcher.check(self.run, line, self.events);
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub loader_idx: usize,
    pub cpu_idx: usize,
    pub result: Result<SummaryResult>,
}

pub struct StressRunner<C, S> {
    config: Arc<StressConfig>,
    container: Arc<C>,
    sink: Arc<S>,
    events: Arc<dyn EventPublisher>,
    watchers: Vec<FailureWatcher>,
    follow_intervals: (Duration, Duration),
}

impl<C, S> StressRunner<C, S>
where
    C: ContainerRunner + 'static,
    S: GaugeSink + 'static,
{
    pub fn new(
        config: Arc<StressConfig>,
        container: Arc<C>,
        sink: Arc<S>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            container,
            sink,
            events,
            watchers: vec![FailureWatcher::default()],
            follow_intervals: (DEFAULT_POLL_INTERVAL, DEFAULT_READ_INTERVAL),
        }
    }

    #[must_use]
    pub fn with_watchers(mut self, watchers: Vec<FailureWatcher>) -> Self {
        self.watchers = watchers;
        self
    }

    /// Poll and read intervals of the log tail behind the stats publisher.
    #[must_use]
    pub fn with_follow_intervals(mut self, poll: Duration, read: Duration) -> Self {
        self.follow_intervals = (poll, read);
        self
    }

    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    /// Builds the command and run identity without touching the loader.
    pub fn prepare(
        &self,
        loader: &LoaderNode,
        loader_idx: usize,
        cpu_idx: usize,
    ) -> Result<(WorkloadRun, BuiltCommand)> {
        let built = build_stress_cmd(&self.config)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let run = WorkloadRun {
            log_path: log_file_path(&loader.logdir, loader_idx, cpu_idx, &run_id),
            run_id,
            node: loader.ip_address.clone(),
            loader_idx,
            cpu_idx,
            hosts: self
                .config
                .db_nodes
                .iter()
                .map(|n| n.cql_address.clone())
                .collect(),
            command: built.command.clone(),
            timeout: self.config.run_timeout(),
        };
        Ok((run, built))
    }

    /// Runs one workload to completion and returns its summary.
    ///
    /// Configuration errors are returned before anything is launched or
    /// published. Once `start` is published, `finish` is published exactly
    /// once: after the stats publisher has fully stopped on return, or from
    /// a drop guard (after a `failure`) when the run panics or its future is
    /// dropped.
    pub async fn run_stress(
        &self,
        loader: &LoaderNode,
        loader_idx: usize,
        cpu_idx: usize,
    ) -> Result<SummaryResult> {
        let (run, built) = self.prepare(loader, loader_idx, cpu_idx)?;
        let dns_command = self.dns_sidecar_command()?;

        tokio::fs::create_dir_all(&loader.logdir).await?;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&run.log_path)
            .await?;
        tracing::debug!(
            run_id = %run.run_id,
            path = %run.log_path.display(),
            "ycsb-stress local log"
        );

        // Opened before launch so the tail starts at offset zero.
        let (poll, read) = self.follow_intervals;
        let mut follower = LogFollower::new(&run.log_path, CancellationToken::new())
            .with_intervals(poll, read);
        follower.open().await?;

        StressEvent::start(&run).publish(&*self.events);
        let mut guard = RunGuard {
            run,
            events: Arc::clone(&self.events),
            container: Arc::clone(&self.container),
            sidecar: None,
            finished: false,
        };

        if let Some(command) = dns_command {
            match self
                .container
                .start_sidecar(&self.config.dns_image, &command, &self.marker_opts())
                .await
            {
                Ok(sidecar) => guard.sidecar = Some(sidecar),
                Err(err) => {
                    self.report_failure(&guard.run, &err);
                    guard.finish().await;
                    return Err(err);
                }
            }
        }

        let request = self.container_request(&guard.run, built, guard.sidecar.as_ref());
        tracing::debug!(run_id = %guard.run.run_id, command = %request.command, "running ycsb");

        let labels = RunLabels {
            instance: guard.run.node.clone(),
            loader_idx: loader_idx.to_string(),
            run_id: guard.run.run_id.clone(),
        };
        // Declared after the guard so an early drop cancels it first.
        let mut publisher = StatsPublisher::new(Arc::clone(&self.sink), labels).start_with(follower);

        let outcome = self.execute(&guard.run, &request).await;

        let report = publisher.stop().await;
        tracing::debug!(
            run_id = %guard.run.run_id,
            lines = report.lines_seen,
            stats = report.stats_published,
            line_errors = report.line_errors,
            "ycsb stats publisher finished"
        );

        guard.finish().await;
        outcome
    }

    async fn execute(&self, run: &WorkloadRun, request: &ContainerRequest) -> Result<SummaryResult> {
        let observer = RunObserver {
            run,
            watchers: &self.watchers,
            events: &*self.events,
        };

        let result = match self.container.run(request, &observer).await {
            Ok(exec) if exec.success() => Ok(parse_final_output(&exec.stdout)),
            Ok(exec) => Err(Error::from(ProcessFault::BadExit {
                code: exec.exit_code,
                stderr_tail: exec.stderr_tail(STDERR_TAIL_LINES),
            })),
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            self.report_failure(run, err);
        }
        result
    }

    fn report_failure(&self, run: &WorkloadRun, err: &Error) {
        tracing::error!(run_id = %run.run_id, error = %err, "ycsb stress command failed");
        StressEvent::failure(run, err.to_string()).publish(&*self.events);
    }

    fn container_request(
        &self,
        run: &WorkloadRun,
        built: BuiltCommand,
        sidecar: Option<&Sidecar>,
    ) -> ContainerRequest {
        let mut extra_opts = Vec::new();
        if let Some(sidecar) = sidecar {
            extra_opts.extend([
                "--dns".to_string(),
                sidecar.internal_ip.clone(),
                "--dns-option".to_string(),
                "use-vc".to_string(),
            ]);
        }
        if self.config.stress_num > 1 {
            extra_opts.push(format!("--cpuset-cpus={}", run.cpu_idx));
        }
        extra_opts.extend(self.marker_opts());

        ContainerRequest {
            name: format!("ycsb-l{}-c{}-{}", run.loader_idx, run.cpu_idx, run.run_id),
            image: self.config.stress_image.clone(),
            command: format!("cd /YCSB && {}", built.command),
            extra_opts,
            staged_files: built.staged_files,
            timeout: run.timeout,
            log_file: run.log_path.clone(),
        }
    }

    fn marker_opts(&self) -> [String; 2] {
        [
            "--label".to_string(),
            format!("shell_marker={}", self.config.shell_marker),
        ]
    }

    /// The DNS server command, when routing through a sidecar is enabled.
    fn dns_sidecar_command(&self) -> Result<Option<String>> {
        if !self.config.alternator.use_dns_routing {
            return Ok(None);
        }
        let port = self
            .config
            .alternator
            .port
            .ok_or(Error::MissingParam("alternator.port"))?;
        let node = self
            .config
            .db_nodes
            .first()
            .ok_or(Error::MissingParam("db_nodes"))?;
        Ok(Some(format!(
            "python3 /dns_server.py {} {port}",
            node.cql_address
        )))
    }

    /// Launches `stress_num` workloads on every loader concurrently.
    /// Outcomes are ordered by loader, then CPU slot. A run whose task
    /// panicked still yields an outcome, carrying [`ProcessFault::Aborted`].
    pub async fn run_all(self: &Arc<Self>) -> Vec<RunOutcome> {
        let mut set = JoinSet::new();
        let mut slots = HashMap::new();
        for (loader_idx, loader) in self.config.loaders.iter().enumerate() {
            for cpu_idx in 0..self.config.stress_num {
                let runner = Arc::clone(self);
                let loader = loader.clone();
                let handle = set.spawn(async move {
                    let result = runner.run_stress(&loader, loader_idx, cpu_idx).await;
                    RunOutcome {
                        loader_idx,
                        cpu_idx,
                        result,
                    }
                });
                slots.insert(handle.id(), (loader_idx, cpu_idx));
            }
        }

        let mut outcomes = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(err) => {
                    let (loader_idx, cpu_idx) = slots.get(&err.id()).copied().unwrap_or_default();
                    tracing::error!(loader_idx, cpu_idx, error = %err, "ycsb stress task failed");
                    outcomes.push(RunOutcome {
                        loader_idx,
                        cpu_idx,
                        result: Err(ProcessFault::Aborted(err.to_string()).into()),
                    });
                }
            }
        }
        outcomes.sort_by_key(|o| (o.loader_idx, o.cpu_idx));
        outcomes
    }
}

/// Closes the event sequence of a started run. [`RunGuard::finish`] is the
/// normal path; dropping an unfinished guard publishes `failure` and
/// `finish` and hands sidecar removal to the runtime.
struct RunGuard<C: ContainerRunner + 'static> {
    run: WorkloadRun,
    events: Arc<dyn EventPublisher>,
    container: Arc<C>,
    sidecar: Option<Sidecar>,
    finished: bool,
}

impl<C: ContainerRunner + 'static> RunGuard<C> {
    async fn finish(mut self) {
        self.finished = true;
        StressEvent::finish(&self.run).publish(&*self.events);
        if let Some(sidecar) = self.sidecar.take() {
            remove_sidecar(&*self.container, &self.run.run_id, &sidecar).await;
        }
    }
}

impl<C: ContainerRunner + 'static> Drop for RunGuard<C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let detail = if std::thread::panicking() {
            "run panicked"
        } else {
            "run cancelled before completion"
        };
        tracing::error!(run_id = %self.run.run_id, detail, "ycsb stress run abandoned");
        let fault = ProcessFault::Aborted(detail.to_string());
        StressEvent::failure(&self.run, fault.to_string()).publish(&*self.events);
        StressEvent::finish(&self.run).publish(&*self.events);

        let Some(sidecar) = self.sidecar.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let container = Arc::clone(&self.container);
                let run_id = self.run.run_id.clone();
                handle.spawn(async move {
                    remove_sidecar(&*container, &run_id, &sidecar).await;
                });
            }
            Err(_) => tracing::warn!(
                run_id = %self.run.run_id,
                sidecar = %sidecar.id,
                "no runtime left to remove dns sidecar"
            ),
        }
    }
}

async fn remove_sidecar<C: ContainerRunner>(container: &C, run_id: &str, sidecar: &Sidecar) {
    if let Err(err) = container.remove_sidecar(sidecar).await {
        tracing::warn!(run_id, sidecar = %sidecar.id, error = %err, "failed to remove dns sidecar");
    }
}
