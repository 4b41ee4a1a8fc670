//! Configuration for quorumdb nodes

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::common::{Error, Result};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    pub node_id: String,

    /// Bind address for the wire protocol listener
    pub bind_addr: SocketAddr,

    /// Network id stamped on and expected in entry headers
    #[serde(default = "default_network_id")]
    pub network_id: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-node request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Cluster peers (including this node)
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Tables served by this cluster
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

fn default_network_id() -> u64 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_request_timeout() -> u64 {
    60
}

/// A peer node in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub addr: SocketAddr,
}

/// A table definition: schema plus replication factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub tablespace: String,
    pub table: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    pub fields: Vec<FieldConfig>,
}

fn default_replication_factor() -> usize {
    3
}

/// A field in a table definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,

    /// Value type name ("u64", "i64", "string", "bytes", ...)
    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub primary_key: bool,
}

impl Config {
    /// Load configuration from a TOML file, layered under
    /// `QUORUMDB_`-prefixed environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("QUORUMDB").separator("__"))
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let cfg: Config = settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(Error::InvalidConfig("node_id cannot be empty".into()));
        }
        for table in &self.tables {
            if table.replication_factor == 0 {
                return Err(Error::InvalidConfig(format!(
                    "{}.{}: replication_factor must be at least 1",
                    table.tablespace, table.table
                )));
            }
            if !table.fields.iter().any(|f| f.primary_key) {
                return Err(Error::InvalidConfig(format!(
                    "{}.{}: at least one primary key field required",
                    table.tablespace, table.table
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
node_id = "node-1"
bind_addr = "127.0.0.1:7400"

[[peers]]
id = "node-1"
addr = "127.0.0.1:7400"

[[tables]]
tablespace = "crops"
table = "harvest"

[[tables.fields]]
name = "id"
type = "u64"
primary_key = true
"#
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.node_id, "node-1");
        assert_eq!(cfg.network_id, 1);
        assert_eq!(cfg.request_timeout_secs, 60);
        assert_eq!(cfg.tables[0].replication_factor, 3);
        assert!(cfg.tables[0].fields[0].primary_key);
    }

    #[test]
    fn test_validate_requires_primary_key() {
        let cfg = Config {
            node_id: "n".into(),
            bind_addr: "127.0.0.1:7400".parse().unwrap(),
            network_id: 1,
            log_level: "info".into(),
            request_timeout_secs: 60,
            peers: vec![],
            tables: vec![TableConfig {
                tablespace: "ts".into(),
                table: "t".into(),
                replication_factor: 3,
                fields: vec![FieldConfig {
                    name: "a".into(),
                    field_type: "u64".into(),
                    primary_key: false,
                }],
            }],
        };
        assert!(cfg.validate().is_err());
    }
}
