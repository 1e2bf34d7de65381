mod classify;
mod command;
mod config;
mod container;
mod error;
mod events;
mod follow;
mod orchestrator;
mod publisher;
mod sink;
mod summary;

pub use classify::{
    ClassifyError, DEFAULT_FAILURE_PATTERN, FailurePattern, Operation, OperationStat,
    OperationStats, StatField, StatName, classify_line, scale_value, verify_stats,
};
pub use command::{
    ALTERNATOR_DNS_TARGET, AWS_CREDENTIALS_PATH, BuiltCommand, DYNAMODB_PROPERTIES_PATH,
    HASH_KEY_NAME, RANGE_KEY_NAME, StagedFile, WorkloadFamily, build_stress_cmd, target_address,
};
pub use config::{
    AlternatorConfig, DEFAULT_DNS_IMAGE, DEFAULT_STRESS_IMAGE, LoaderNode, NodeGroup, SchemaType,
    StressConfig, TargetNode,
};
pub use container::{
    ContainerRequest, ContainerRunner, DockerRunner, ExecResult, LineObserver, Sidecar,
};
pub use error::{Error, ProcessFault, Result};
pub use events::{EventKind, EventPublisher, RecordingEvents, StressEvent, TracingEvents};
pub use follow::{DEFAULT_POLL_INTERVAL, DEFAULT_READ_INTERVAL, LogFollower};
pub use orchestrator::{
    FailureWatcher, RunOutcome, StressRunner, WatchCallback, WorkloadRun, log_file_path,
};
pub use publisher::{
    PublisherHandle, PublisherReport, PublisherState, RunLabels, StatsPublisher,
};
pub use sink::{GAUGE_HELP, GAUGE_LABELS, GaugeSink, gauge_name};
pub use summary::{
    LATENCY_99TH_KEY, LATENCY_MEAN_KEY, OP_RATE_KEY, SummaryResult, parse_final_output,
};
