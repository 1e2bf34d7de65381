use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::error::{Error, Result};

pub const DEFAULT_STRESS_IMAGE: &str = "scylladb/hydra-loaders:ycsb-jdk8-20211104";
pub const DEFAULT_DNS_IMAGE: &str = "scylladb/hydra-loaders:alternator-dns-0.2";

/// Primary-key shape of the table driven through the DynamoDB binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
pub enum SchemaType {
    #[serde(rename = "HASH")]
    #[strum(serialize = "HASH")]
    Hash,

    #[serde(rename = "HASH_AND_RANGE")]
    #[strum(serialize = "HASH_AND_RANGE")]
    HashAndRange,
}

/// Alternator (DynamoDB-compatible API) connection settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlternatorConfig {
    #[serde(default)]
    pub use_dns_routing: bool,
    pub port: Option<u16>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub primary_key_type: Option<SchemaType>,
}

/// A group of nodes a target node belongs to (e.g. a multi-DC cluster).
/// Addresses are resolved through the group when present.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeGroup {
    pub name: String,
    pub nodes: Vec<String>,
}

impl NodeGroup {
    pub fn get_node(&self) -> Option<&str> {
        self.nodes.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetNode {
    pub cql_address: String,
    #[serde(default)]
    pub parent_cluster: Option<NodeGroup>,
}

impl TargetNode {
    pub fn new(cql_address: impl Into<String>) -> Self {
        Self {
            cql_address: cql_address.into(),
            parent_cluster: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderNode {
    pub ip_address: String,
    pub logdir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StressConfig {
    pub stress_cmd: String,

    /// Workload time limit (e.g. `30m`).
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,

    /// Extra time granted on top of `timeout` before the container is killed.
    #[serde(default = "default_shutdown_timeout", deserialize_with = "de_duration")]
    pub shutdown_timeout: Duration,

    /// Concurrent stress instances per loader.
    #[serde(default = "default_stress_num")]
    pub stress_num: usize,

    #[serde(default = "default_stress_image")]
    pub stress_image: String,

    #[serde(default = "default_dns_image")]
    pub dns_image: String,

    #[serde(default = "default_shell_marker")]
    pub shell_marker: String,

    #[serde(default = "default_consistency_level")]
    pub consistency_level: String,

    #[serde(default)]
    pub alternator: AlternatorConfig,

    #[serde(default)]
    pub db_nodes: Vec<TargetNode>,

    #[serde(default)]
    pub loaders: Vec<LoaderNode>,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_stress_num() -> usize {
    1
}

fn default_stress_image() -> String {
    DEFAULT_STRESS_IMAGE.to_string()
}

fn default_dns_image() -> String {
    DEFAULT_DNS_IMAGE.to_string()
}

fn default_shell_marker() -> String {
    "ycsb".to_string()
}

fn default_consistency_level() -> String {
    "QUORUM".to_string()
}

fn de_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

impl StressConfig {
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(input)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let input = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stress_cmd.trim().is_empty() {
            return Err(Error::MissingParam("stress_cmd"));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidParam {
                key: "timeout",
                reason: "must be a positive duration".to_string(),
            });
        }
        if self.stress_num == 0 {
            return Err(Error::InvalidParam {
                key: "stress_num",
                reason: "must be a positive integer".to_string(),
            });
        }
        Ok(())
    }

    /// Hard bound on one container run: workload timeout plus shutdown grace.
    pub fn run_timeout(&self) -> Duration {
        self.timeout.saturating_add(self.shutdown_timeout)
    }
}
