use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt as _;
use ycsb_core::runner::{
    ContainerRequest, ContainerRunner, Error, EventKind, EventPublisher, ExecResult,
    FailurePattern, FailureWatcher, GaugeSink, LineObserver, ProcessFault, RecordingEvents,
    Sidecar, StressConfig, StressRunner, WorkloadRun, gauge_name,
};
use ycsb_metrics::{GaugeHandle, Registry};

const STATUS_LINE: &str = "2024-05-01 10:00:10:123 10 sec: 7293 operations; 729.39 current ops/sec; \
     [READ: Count=510, Max=195327, Min=2011, Avg=4598.69, 90=5743, 99=12583, 99.9=194815, 99.99=195327]";

const FINAL_OUTPUT: &str = "\
[OVERALL], Throughput(ops/sec), 729.39
[READ], AverageLatency(us), 4000
[READ], 99thPercentileLatency(us), 12000
";

#[derive(Debug, Clone)]
enum Behavior {
    Succeed { lines: Vec<String> },
    Exit { code: i32, stderr: String },
    Timeout,
    /// Keeps appending to the log after the run has returned.
    SucceedWithLingeringWriter,
    /// Never completes on its own.
    Hang,
    /// The DNS sidecar cannot be started.
    SidecarLaunchFails,
}

struct FakeRunner {
    behavior: Behavior,
    requests: Mutex<Vec<ContainerRequest>>,
    sidecars: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
            sidecars: Mutex::new(Vec::new()),
        }
    }
}

async fn append_line(path: &Path, line: &str) {
    let mut f = tokio::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await
        .unwrap_or_else(|e| panic!("open log: {e}"));
    f.write_all(format!("{line}\n").as_bytes())
        .await
        .unwrap_or_else(|e| panic!("write log: {e}"));
    let _ = f.flush().await;
}

impl ContainerRunner for FakeRunner {
    async fn run(
        &self,
        request: &ContainerRequest,
        observer: &dyn LineObserver,
    ) -> ycsb_core::Result<ExecResult> {
        self.requests.lock().push(request.clone());

        match &self.behavior {
            Behavior::Succeed { lines } => {
                for line in lines {
                    append_line(&request.log_file, line).await;
                    observer.on_line(line);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                // Give the tail time to pick up the last line.
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(ExecResult {
                    stdout: FINAL_OUTPUT.to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                })
            }
            Behavior::Exit { code, stderr } => Ok(ExecResult {
                stdout: String::new(),
                stderr: stderr.clone(),
                exit_code: *code,
            }),
            Behavior::Timeout => Err(ProcessFault::Timeout {
                after: request.timeout,
            }
            .into()),
            Behavior::SucceedWithLingeringWriter => {
                let path = request.log_file.clone();
                tokio::spawn(async move {
                    for _ in 0..40 {
                        append_line(&path, STATUS_LINE).await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                });
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(ExecResult {
                    stdout: FINAL_OUTPUT.to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                })
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ExecResult::default())
            }
            Behavior::SidecarLaunchFails => panic!("container launched without its sidecar"),
        }
    }

    async fn start_sidecar(
        &self,
        image: &str,
        command: &str,
        _extra_opts: &[String],
    ) -> ycsb_core::Result<Sidecar> {
        self.sidecars.lock().push(format!("start {image} {command}"));
        if matches!(self.behavior, Behavior::SidecarLaunchFails) {
            return Err(ProcessFault::Launch("no such image".to_string()).into());
        }
        Ok(Sidecar {
            id: "dns-1".to_string(),
            internal_ip: "172.17.0.9".to_string(),
        })
    }

    async fn remove_sidecar(&self, sidecar: &Sidecar) -> ycsb_core::Result<()> {
        self.sidecars.lock().push(format!("remove {}", sidecar.id));
        Ok(())
    }
}

/// Registry wrapper that counts writes.
struct CountingSink {
    registry: Arc<Registry>,
    sets: AtomicUsize,
}

impl GaugeSink for CountingSink {
    type Gauge = GaugeHandle;

    fn ensure_gauge(self: &Arc<Self>, name: &str) -> GaugeHandle {
        self.registry.ensure_gauge(name)
    }

    fn set_value(&self, gauge: &GaugeHandle, labels: &[&str], value: f64) {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.registry.set_value(gauge, labels, value);
    }
}

fn config(logdir: &Path, extra: &str) -> StressConfig {
    let yaml = format!(
        r#"
stress_cmd: "bin/ycsb run scylla -P workloads/workloada"
timeout: 1m
shutdown_timeout: 5s
db_nodes:
  - cql_address: 10.0.0.1
  - cql_address: 10.0.0.2
loaders:
  - ip_address: 10.0.1.1
    logdir: {}
{extra}"#,
        logdir.display()
    );
    StressConfig::from_yaml_str(&yaml).unwrap_or_else(|e| panic!("config: {e}"))
}

struct Harness {
    runner: Arc<StressRunner<FakeRunner, CountingSink>>,
    container: Arc<FakeRunner>,
    sink: Arc<CountingSink>,
    events: Arc<RecordingEvents>,
    _dir: tempfile::TempDir,
}

fn harness(behavior: Behavior, extra: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let cfg = config(&dir.path().join("logs"), extra);
    let container = Arc::new(FakeRunner::new(behavior));
    let sink = Arc::new(CountingSink {
        registry: Registry::new(),
        sets: AtomicUsize::new(0),
    });
    let events = Arc::new(RecordingEvents::new());
    let runner = StressRunner::new(
        Arc::new(cfg),
        Arc::clone(&container),
        Arc::clone(&sink),
        events.clone(),
    )
    .with_follow_intervals(Duration::from_millis(10), Duration::from_millis(10));
    Harness {
        runner: Arc::new(runner),
        container,
        sink,
        events,
        _dir: dir,
    }
}

fn loader(h: &Harness) -> ycsb_core::runner::LoaderNode {
    h.runner.config().loaders[0].clone()
}

#[tokio::test]
async fn successful_run_publishes_stats_and_returns_summary() {
    let h = harness(
        Behavior::Succeed {
            lines: vec![STATUS_LINE.to_string()],
        },
        "",
    );

    let summary = h
        .runner
        .run_stress(&loader(&h), 0, 0)
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert_eq!(summary.op_rate, "729.39");
    assert_eq!(summary.latency_mean, "2.0");
    assert_eq!(summary.latency_99th, "6.0");
    assert_eq!(h.events.kinds(), vec![EventKind::Start, EventKind::Finish]);

    let registry = &h.sink.registry;
    let gauge = registry
        .gauge_id(&gauge_name(ycsb_core::runner::Operation::Read))
        .unwrap_or_else(|| panic!("read gauge not registered"));
    let events = h.events.snapshot();
    let run_id = events[0].run_id.as_str();
    assert_eq!(
        registry.get(gauge, &["10.0.1.1", "0", run_id, "count"]),
        Some(510.0)
    );
    let p99 = registry
        .get(gauge, &["10.0.1.1", "0", run_id, "p99"])
        .unwrap_or_else(|| panic!("p99 missing"));
    assert!((p99 - 12.583).abs() < 1e-9);

    let log_path = events[1]
        .log_file
        .clone()
        .unwrap_or_else(|| panic!("finish event without log file"));
    let name = log_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    assert_eq!(name, format!("ycsb-l0-c0-{run_id}.log"));
    let logged = tokio::fs::read_to_string(&log_path)
        .await
        .unwrap_or_else(|e| panic!("read log: {e}"));
    assert!(logged.contains("[READ: Count=510"));

    let requests = h.container.requests.lock();
    let request = &requests[0];
    assert!(request.command.starts_with("cd /YCSB && bin/ycsb run scylla"));
    assert!(request.command.contains("-p scylla.hosts=10.0.0.1,10.0.0.2"));
    assert_eq!(request.extra_opts, vec!["--label", "shell_marker=ycsb"]);
    assert_eq!(request.timeout, Duration::from_secs(65));
}

#[tokio::test]
async fn failure_pattern_lines_emit_error_events_without_failing() {
    let h = harness(
        Behavior::Succeed {
            lines: vec![
                "starting".to_string(),
                "2024-05-01 10:00:01 ERROR connection reset".to_string(),
                "[VERIFY], Return=UNEXPECTED_STATE, 2".to_string(),
            ],
        },
        "",
    );

    let result = h.runner.run_stress(&loader(&h), 0, 0).await;
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(
        h.events.kinds(),
        vec![
            EventKind::Start,
            EventKind::Error,
            EventKind::Error,
            EventKind::Finish
        ]
    );
}

#[tokio::test]
async fn bad_exit_emits_failure_then_finish_and_propagates() {
    let h = harness(
        Behavior::Exit {
            code: 1,
            stderr: "Exception in thread main\njava.lang.OutOfMemoryError".to_string(),
        },
        "",
    );

    let err = match h.runner.run_stress(&loader(&h), 0, 0).await {
        Ok(summary) => panic!("expected failure, got {summary:?}"),
        Err(err) => err,
    };
    assert!(matches!(
        err,
        Error::Process(ProcessFault::BadExit { code: 1, .. })
    ));

    let events = h.events.snapshot();
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Start, EventKind::Failure, EventKind::Finish]
    );
    assert_eq!(
        events[1].errors,
        vec![
            "Stress command completed with bad status 1: Exception in thread main\n\
             java.lang.OutOfMemoryError"
                .to_string()
        ]
    );
    assert!(events[1].log_file.is_some());
}

#[tokio::test]
async fn timeout_is_a_failure() {
    let h = harness(Behavior::Timeout, "");

    let result = h.runner.run_stress(&loader(&h), 0, 0).await;
    assert!(matches!(
        result,
        Err(Error::Process(ProcessFault::Timeout { .. }))
    ));

    let events = h.events.snapshot();
    assert_eq!(
        events.iter().map(|e| e.kind).collect::<Vec<_>>(),
        vec![EventKind::Start, EventKind::Failure, EventKind::Finish]
    );
    assert_eq!(
        events[1].errors[0],
        "Stress command did not complete within 65 seconds!"
    );
}

#[tokio::test]
async fn config_error_launches_nothing() {
    let h = harness(
        Behavior::Succeed { lines: Vec::new() },
        "",
    );
    let mut cfg = h.runner.config().clone();
    cfg.stress_cmd = "bin/ycsb run dynamodb".to_string();
    let runner = StressRunner::new(
        Arc::new(cfg),
        Arc::clone(&h.container),
        Arc::clone(&h.sink),
        h.events.clone(),
    );

    let result = runner.run_stress(&loader(&h), 0, 0).await;
    assert!(
        matches!(&result, Err(err) if err.is_config()),
        "{result:?}"
    );
    assert!(h.events.snapshot().is_empty());
    assert!(h.container.requests.lock().is_empty());
}

#[tokio::test]
async fn no_gauge_updates_after_run_returns() {
    let h = harness(Behavior::SucceedWithLingeringWriter, "");

    let result = h.runner.run_stress(&loader(&h), 0, 0).await;
    assert!(result.is_ok(), "{result:?}");
    let at_exit = h.sink.sets.load(Ordering::SeqCst);
    assert!(at_exit > 0, "publisher never saw the writer");

    // The writer keeps appending for a while after the run returned.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.sink.sets.load(Ordering::SeqCst), at_exit);
}

#[tokio::test]
async fn dns_routing_runs_behind_a_sidecar() {
    let extra = "\
stress_num: 2
alternator:
  use_dns_routing: true
  port: 8080
";
    let h = harness(Behavior::Succeed { lines: Vec::new() }, extra);

    let outcomes = h.runner.run_all().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert_eq!(
        outcomes.iter().map(|o| o.cpu_idx).collect::<Vec<_>>(),
        vec![0, 1]
    );

    let requests = h.container.requests.lock();
    assert_eq!(requests.len(), 2);
    for request in requests.iter() {
        assert_eq!(&request.extra_opts[..4], ["--dns", "172.17.0.9", "--dns-option", "use-vc"]);
        assert!(request.extra_opts[4].starts_with("--cpuset-cpus="));
    }

    let sidecars = h.container.sidecars.lock();
    assert_eq!(
        sidecars
            .iter()
            .filter(|s| s.as_str() == "remove dns-1")
            .count(),
        2
    );
    assert!(sidecars.iter().any(|s| s.contains("python3 /dns_server.py 10.0.0.1 8080")));
    assert_eq!(h.events.kinds().iter().filter(|k| **k == EventKind::Finish).count(), 2);
}

const DNS_ROUTING: &str = "\
alternator:
  use_dns_routing: true
  port: 8080
";

#[tokio::test]
async fn dropped_run_still_finishes_and_removes_sidecar() {
    let h = harness(Behavior::Hang, DNS_ROUTING);

    let loader_ = loader(&h);
    let run = h.runner.run_stress(&loader_, 0, 0);
    let timed_out = tokio::time::timeout(Duration::from_millis(200), run).await;
    assert!(timed_out.is_err(), "hanging run completed: {timed_out:?}");

    let events = h.events.snapshot();
    assert_eq!(
        events.iter().map(|e| e.kind).collect::<Vec<_>>(),
        vec![EventKind::Start, EventKind::Failure, EventKind::Finish]
    );
    assert_eq!(
        events[1].errors,
        vec!["Stress run aborted: run cancelled before completion".to_string()]
    );

    // Removal is handed to the runtime once the run is dropped.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.container.sidecars.lock().last().map(String::as_str),
        Some("remove dns-1")
    );
}

#[tokio::test]
async fn panicking_run_yields_an_aborted_outcome() {
    fn explode(_run: &WorkloadRun, line: &str, _events: &dyn EventPublisher) {
        panic!("watcher cannot handle {line}");
    }

    let h = harness(
        Behavior::Succeed {
            lines: vec!["boom".to_string()],
        },
        "",
    );
    let pattern = FailurePattern::new("boom").unwrap_or_else(|e| panic!("pattern: {e}"));
    let runner = Arc::new(
        StressRunner::new(
            Arc::new(h.runner.config().clone()),
            Arc::clone(&h.container),
            Arc::clone(&h.sink),
            h.events.clone(),
        )
        .with_watchers(vec![FailureWatcher::new(pattern, explode)]),
    );

    let outcomes = runner.run_all().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!((outcomes[0].loader_idx, outcomes[0].cpu_idx), (0, 0));
    assert!(
        matches!(
            &outcomes[0].result,
            Err(Error::Process(ProcessFault::Aborted(_)))
        ),
        "{:?}",
        outcomes[0].result
    );
    assert_eq!(
        h.events.kinds(),
        vec![EventKind::Start, EventKind::Failure, EventKind::Finish]
    );
}

#[tokio::test]
async fn sidecar_launch_failure_follows_start_failure_finish() {
    let h = harness(Behavior::SidecarLaunchFails, DNS_ROUTING);

    let result = h.runner.run_stress(&loader(&h), 0, 0).await;
    assert!(
        matches!(result, Err(Error::Process(ProcessFault::Launch(_)))),
        "{result:?}"
    );

    let events = h.events.snapshot();
    assert_eq!(
        events.iter().map(|e| e.kind).collect::<Vec<_>>(),
        vec![EventKind::Start, EventKind::Failure, EventKind::Finish]
    );
    assert_eq!(
        events[1].errors,
        vec!["Stress command failed to launch: no such image".to_string()]
    );
    assert!(h.container.requests.lock().is_empty());
    assert!(
        !h.container
            .sidecars
            .lock()
            .iter()
            .any(|s| s.starts_with("remove"))
    );
}

#[tokio::test]
async fn dns_routing_without_port_is_a_config_error() {
    let h = harness(
        Behavior::Succeed { lines: Vec::new() },
        "alternator:\n  use_dns_routing: true\n",
    );

    let result = h.runner.run_stress(&loader(&h), 0, 0).await;
    assert!(matches!(&result, Err(err) if err.is_config()), "{result:?}");
    assert!(h.events.snapshot().is_empty());
    assert!(h.container.sidecars.lock().is_empty());
}
