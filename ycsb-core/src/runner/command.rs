//! Assembles the YCSB command line and the files it expects inside the
//! container.

use std::fmt::Write as _;

use super::config::{SchemaType, StressConfig};
use super::error::{Error, Result};

pub const DYNAMODB_PROPERTIES_PATH: &str = "/tmp/dynamodb.properties";
pub const AWS_CREDENTIALS_PATH: &str = "/tmp/aws_empty_file";

/// Name the DNS sidecar answers for when Alternator DNS routing is on.
pub const ALTERNATOR_DNS_TARGET: &str = "alternator";

pub const HASH_KEY_NAME: &str = "p";
pub const RANGE_KEY_NAME: &str = "c";

/// A file that must exist at `container_path` before the command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub container_path: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommand {
    pub command: String,
    pub staged_files: Vec<StagedFile>,
}

/// YCSB database bindings that need extra parameters. Detection is by
/// substring of the base command and more than one may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum WorkloadFamily {
    Dynamodb,
    CassandraCql,
    Scylla,
}

impl WorkloadFamily {
    pub const ALL: [WorkloadFamily; 3] = [Self::Dynamodb, Self::CassandraCql, Self::Scylla];

    fn marker(self) -> &'static str {
        match self {
            Self::Dynamodb => "dynamodb",
            Self::CassandraCql => "cassandra-cql",
            Self::Scylla => "scylla",
        }
    }

    pub fn detect(stress_cmd: &str) -> Vec<WorkloadFamily> {
        Self::ALL
            .into_iter()
            .filter(|f| stress_cmd.contains(f.marker()))
            .collect()
    }
}

/// Address the DynamoDB endpoint points at.
pub fn target_address(cfg: &StressConfig) -> Result<String> {
    if cfg.alternator.use_dns_routing {
        return Ok(ALTERNATOR_DNS_TARGET.to_string());
    }
    let node = cfg.db_nodes.first().ok_or(Error::MissingParam("db_nodes"))?;
    let address = node
        .parent_cluster
        .as_ref()
        .and_then(|group| group.get_node())
        .unwrap_or(node.cql_address.as_str());
    Ok(address.to_string())
}

pub fn build_stress_cmd(cfg: &StressConfig) -> Result<BuiltCommand> {
    let families = WorkloadFamily::detect(&cfg.stress_cmd);
    let mut command = format!("{} -s ", cfg.stress_cmd);
    let mut staged_files = Vec::new();

    if families.contains(&WorkloadFamily::Dynamodb) {
        staged_files.push(StagedFile {
            container_path: DYNAMODB_PROPERTIES_PATH.to_string(),
            contents: dynamodb_properties(cfg)?,
        });
        staged_files.push(StagedFile {
            container_path: AWS_CREDENTIALS_PATH.to_string(),
            contents: aws_credentials(cfg)?,
        });
        let _ = write!(command, " -P {DYNAMODB_PROPERTIES_PATH}");
    }

    if families.contains(&WorkloadFamily::CassandraCql) {
        let hosts = hosts(cfg)?;
        let level = &cfg.consistency_level;
        let _ = write!(
            command,
            " -p hosts={hosts} -p cassandra.readconsistencylevel={level} \
             -p cassandra.writeconsistencylevel={level}"
        );
    }

    if families.contains(&WorkloadFamily::Scylla) {
        let hosts = hosts(cfg)?;
        let _ = write!(command, " -p scylla.hosts={hosts}");
    }

    if !command.contains("maxexecutiontime") {
        let _ = write!(command, " -p maxexecutiontime={}", cfg.timeout.as_secs());
    }

    Ok(BuiltCommand {
        command,
        staged_files,
    })
}

fn hosts(cfg: &StressConfig) -> Result<String> {
    if cfg.db_nodes.is_empty() {
        return Err(Error::MissingParam("db_nodes"));
    }
    Ok(cfg
        .db_nodes
        .iter()
        .map(|n| n.cql_address.as_str())
        .collect::<Vec<_>>()
        .join(","))
}

fn dynamodb_properties(cfg: &StressConfig) -> Result<String> {
    let alternator = &cfg.alternator;
    let port = alternator.port.ok_or(Error::MissingParam("alternator.port"))?;
    let schema = alternator
        .primary_key_type
        .ok_or(Error::MissingParam("alternator.primary_key_type"))?;
    let target = target_address(cfg)?;

    let mut out = String::new();
    out.push_str("measurementtype=hdrhistogram\n");
    let _ = writeln!(out, "dynamodb.awsCredentialsFile = {AWS_CREDENTIALS_PATH}");
    let _ = writeln!(out, "dynamodb.endpoint = http://{target}:{port}");
    out.push_str("dynamodb.connectMax = 200\n");
    out.push_str("requestdistribution = uniform\n");
    out.push_str("dynamodb.consistentReads = true\n");

    let _ = writeln!(out, "dynamodb.primaryKey = {HASH_KEY_NAME}");
    if schema == SchemaType::HashAndRange {
        let _ = writeln!(out, "dynamodb.hashKeyName = {RANGE_KEY_NAME}");
    }
    let _ = writeln!(out, "dynamodb.primaryKeyType = {schema}");
    Ok(out)
}

fn aws_credentials(cfg: &StressConfig) -> Result<String> {
    let access = cfg
        .alternator
        .access_key_id
        .as_deref()
        .ok_or(Error::MissingParam("alternator.access_key_id"))?;
    let secret = cfg
        .alternator
        .secret_access_key
        .as_deref()
        .ok_or(Error::MissingParam("alternator.secret_access_key"))?;
    Ok(format!("accessKey = {access}\nsecretKey = {secret}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::config::{NodeGroup, TargetNode};

    fn config(stress_cmd: &str) -> StressConfig {
        let yaml = format!(
            "stress_cmd: \"{stress_cmd}\"\ntimeout: 10m\ndb_nodes:\n  - cql_address: 10.0.0.1\n"
        );
        StressConfig::from_yaml_str(&yaml).unwrap_or_else(|e| panic!("config: {e}"))
    }

    fn alternator(cfg: &mut StressConfig, schema: SchemaType) {
        cfg.alternator.port = Some(8080);
        cfg.alternator.access_key_id = Some("alternator".to_string());
        cfg.alternator.secret_access_key = Some("secret".to_string());
        cfg.alternator.primary_key_type = Some(schema);
    }

    #[test]
    fn dynamodb_hash_schema_references_properties_file() {
        let mut cfg = config("bin/ycsb load dynamodb -P workloads/workloada");
        alternator(&mut cfg, SchemaType::Hash);

        let built = build_stress_cmd(&cfg).unwrap_or_else(|e| panic!("build: {e}"));
        assert_eq!(
            built.command,
            "bin/ycsb load dynamodb -P workloads/workloada -s  -P /tmp/dynamodb.properties \
             -p maxexecutiontime=600"
        );

        assert_eq!(built.staged_files.len(), 2);
        let props = &built.staged_files[0];
        assert_eq!(props.container_path, DYNAMODB_PROPERTIES_PATH);
        assert!(props.contents.contains("dynamodb.endpoint = http://10.0.0.1:8080\n"));
        assert!(props.contents.contains("dynamodb.primaryKey = p\n"));
        assert!(props.contents.contains("dynamodb.primaryKeyType = HASH\n"));
        assert!(!props.contents.contains("hashKeyName"));

        let creds = &built.staged_files[1];
        assert_eq!(creds.container_path, AWS_CREDENTIALS_PATH);
        assert_eq!(creds.contents, "accessKey = alternator\nsecretKey = secret\n");
    }

    #[test]
    fn hash_and_range_adds_range_key_and_dns_target() {
        let mut cfg = config("bin/ycsb run dynamodb");
        alternator(&mut cfg, SchemaType::HashAndRange);
        cfg.alternator.use_dns_routing = true;

        let built = build_stress_cmd(&cfg).unwrap_or_else(|e| panic!("build: {e}"));
        let props = &built.staged_files[0].contents;
        assert!(props.contains("dynamodb.endpoint = http://alternator:8080\n"));
        assert!(props.contains("dynamodb.hashKeyName = c\n"));
        assert!(props.contains("dynamodb.primaryKeyType = HASH_AND_RANGE\n"));
    }

    #[test]
    fn cassandra_cql_lists_all_hosts_and_consistency() {
        let mut cfg = config("bin/ycsb load cassandra-cql -P workloads/workloada");
        cfg.consistency_level = "ONE".to_string();
        cfg.db_nodes = vec![
            TargetNode::new("10.0.0.1"),
            TargetNode::new("10.0.0.2"),
            TargetNode::new("10.0.0.3"),
        ];

        let built = build_stress_cmd(&cfg).unwrap_or_else(|e| panic!("build: {e}"));
        assert!(built.command.contains("-p hosts=10.0.0.1,10.0.0.2,10.0.0.3"));
        assert!(built.command.contains("-p cassandra.readconsistencylevel=ONE"));
        assert!(built.command.contains("-p cassandra.writeconsistencylevel=ONE"));
        assert!(built.staged_files.is_empty());
    }

    #[test]
    fn existing_max_execution_time_is_kept() {
        let cfg = config("bin/ycsb run scylla -p maxexecutiontime=60");
        let built = build_stress_cmd(&cfg).unwrap_or_else(|e| panic!("build: {e}"));
        assert_eq!(
            built.command,
            "bin/ycsb run scylla -p maxexecutiontime=60 -s  -p scylla.hosts=10.0.0.1"
        );
    }

    #[test]
    fn missing_alternator_port_is_reported() {
        let mut cfg = config("bin/ycsb load dynamodb");
        alternator(&mut cfg, SchemaType::Hash);
        cfg.alternator.port = None;
        assert!(matches!(
            build_stress_cmd(&cfg),
            Err(Error::MissingParam("alternator.port"))
        ));
    }

    #[test]
    fn target_resolves_through_parent_cluster() {
        let mut cfg = config("bin/ycsb load dynamodb");
        cfg.db_nodes[0].parent_cluster = Some(NodeGroup {
            name: "dc1".to_string(),
            nodes: vec!["10.0.9.9".to_string()],
        });
        assert_eq!(
            target_address(&cfg).unwrap_or_else(|e| panic!("target: {e}")),
            "10.0.9.9"
        );

        cfg.db_nodes.clear();
        assert!(matches!(
            target_address(&cfg),
            Err(Error::MissingParam("db_nodes"))
        ));
    }
}
