//! Background task feeding classified log lines into a [`GaugeSink`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::classify::{Operation, OperationStat, classify_line, verify_stats};
use super::follow::{DEFAULT_POLL_INTERVAL, LogFollower};
use super::sink::{GaugeSink, gauge_name};

/// Fixed label values of one run. The fourth label, `type`, comes from
/// each published value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLabels {
    pub instance: String,
    pub loader_idx: String,
    pub run_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PublisherState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherReport {
    pub lines_seen: u64,
    pub stats_published: u64,
    pub line_errors: u64,
}

pub struct StatsPublisher<S: GaugeSink> {
    sink: Arc<S>,
    labels: RunLabels,
    gauges: HashMap<Operation, S::Gauge>,
}

impl<S: GaugeSink + 'static> StatsPublisher<S> {
    pub fn new(sink: Arc<S>, labels: RunLabels) -> Self {
        Self {
            sink,
            labels,
            gauges: HashMap::new(),
        }
    }

    pub fn labels(&self) -> &RunLabels {
        &self.labels
    }

    /// Tails `log_path` with default intervals until the handle is stopped.
    pub fn start(self, log_path: impl Into<PathBuf>) -> PublisherHandle {
        self.start_with(LogFollower::new(log_path, CancellationToken::new()))
    }

    /// Runs over a caller-configured follower; stopping the handle cancels it.
    pub fn start_with(self, follower: LogFollower) -> PublisherHandle {
        let cancel = follower.cancellation();
        tracing::debug!(
            run_id = %self.labels.run_id,
            path = %follower.path().display(),
            "starting ycsb stats publisher"
        );
        let task = tokio::spawn(self.run(follower));
        PublisherHandle {
            cancel,
            task: Some(task),
            report: None,
        }
    }

    /// Publishes every value found in `line`. Returns how many values were
    /// set and how many segments were rejected.
    pub fn publish_line(&mut self, line: &str) -> (u64, u64) {
        let mut published = 0;
        let mut errors = 0;

        for segment in classify_line(line) {
            match segment {
                Ok(stats) => {
                    for stat in stats.stats() {
                        self.publish(&stat);
                        published += 1;
                    }
                }
                Err(err) => {
                    errors += 1;
                    tracing::warn!(
                        run_id = %self.labels.run_id,
                        error = %err,
                        line,
                        "skipping malformed ycsb status segment"
                    );
                }
            }
        }

        for stat in verify_stats(line) {
            self.publish(&stat);
            published += 1;
        }

        (published, errors)
    }

    fn publish(&mut self, stat: &OperationStat) {
        let sink = &self.sink;
        let gauge = self
            .gauges
            .entry(stat.operation)
            .or_insert_with(|| sink.ensure_gauge(&gauge_name(stat.operation)));
        let labels = [
            self.labels.instance.as_str(),
            self.labels.loader_idx.as_str(),
            self.labels.run_id.as_str(),
            stat.name.as_label(),
        ];
        self.sink.set_value(gauge, &labels, stat.value);
    }

    async fn run(mut self, mut follower: LogFollower) -> PublisherReport {
        let cancel = follower.cancellation();
        let mut report = PublisherReport::default();

        while !cancel.is_cancelled() {
            match follower.next_line().await {
                Ok(Some(line)) => {
                    // A line read concurrently with stop is dropped.
                    if cancel.is_cancelled() {
                        break;
                    }
                    report.lines_seen += 1;
                    let (published, errors) = self.publish_line(&line);
                    report.stats_published += published;
                    report.line_errors += errors;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(
                        run_id = %self.labels.run_id,
                        path = %follower.path().display(),
                        error = %err,
                        "failed to read ycsb log"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(DEFAULT_POLL_INTERVAL) => {}
                    }
                }
            }
        }

        tracing::debug!(
            run_id = %self.labels.run_id,
            lines = report.lines_seen,
            stats = report.stats_published,
            "ycsb stats publisher stopped"
        );
        report
    }
}

/// Owner of a running publisher. [`PublisherHandle::stop`] must be awaited
/// to guarantee no further gauge writes; dropping only cancels.
#[derive(Debug)]
pub struct PublisherHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<PublisherReport>>,
    report: Option<PublisherReport>,
}

impl PublisherHandle {
    pub fn state(&self) -> PublisherState {
        if self.task.is_some() {
            PublisherState::Running
        } else {
            PublisherState::Stopped
        }
    }

    /// Cancels the tail and waits for the task to exit. Idempotent.
    pub async fn stop(&mut self) -> PublisherReport {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let report = match task.await {
                Ok(report) => report,
                Err(err) => {
                    tracing::warn!(error = %err, "ycsb stats publisher task failed");
                    PublisherReport::default()
                }
            };
            self.report = Some(report);
        }
        self.report.unwrap_or_default()
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
