//! Schema and routing service
//!
//! Answers which fields a table has, which nodes own a partition, and
//! the table's replication factor. The static implementation selects
//! replica sets with HRW hashing over the configured membership.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::cluster::Node;
use crate::common::hash::{select_replicas, PartitionKey};
use crate::common::{Config, Error, Result};
use crate::protocol::{FieldDescription, FieldType};

#[async_trait]
pub trait SchemaService: Send + Sync {
    /// Field descriptions for a table.
    async fn get_fields(&self, tablespace: &str, table: &str) -> Result<Vec<FieldDescription>>;

    /// The replica set owning one partition of a table.
    async fn get_nodes(
        &self,
        tablespace: &str,
        table: &str,
        partition: &PartitionKey,
    ) -> Result<HashSet<Node>>;

    /// Every node that may hold data for a table (table-wide operations).
    async fn get_all_nodes(&self, tablespace: &str, table: &str) -> Result<HashSet<Node>>;

    /// Replication factor for a table.
    async fn replication_factor(&self, tablespace: &str, table: &str) -> Result<usize>;

    /// Names of the table's primary-key fields.
    async fn primary_key_fields(&self, tablespace: &str, table: &str) -> Result<Vec<String>> {
        let fields = self.get_fields(tablespace, table).await?;
        Ok(fields
            .into_iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.as_str().to_string())
            .collect())
    }
}

struct TableSchema {
    fields: Vec<FieldDescription>,
    replication_factor: usize,
}

/// In-memory schema registry over a fixed membership.
pub struct StaticSchema {
    nodes: Vec<Node>,
    tables: HashMap<(String, String), TableSchema>,
}

impl StaticSchema {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            tables: HashMap::new(),
        }
    }

    pub fn with_table(
        mut self,
        tablespace: &str,
        table: &str,
        replication_factor: usize,
        fields: Vec<FieldDescription>,
    ) -> Self {
        self.tables.insert(
            (tablespace.to_string(), table.to_string()),
            TableSchema {
                fields,
                replication_factor,
            },
        );
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let nodes = config
            .peers
            .iter()
            .map(|peer| Node::new(peer.id.clone(), peer.addr))
            .collect();
        let mut schema = Self::new(nodes);

        for table in &config.tables {
            let mut fields = Vec::with_capacity(table.fields.len());
            for field in &table.fields {
                let field_type: FieldType = field.field_type.parse()?;
                fields.push(FieldDescription {
                    name: crate::codec::AsciiString::new(field.name.clone())?,
                    field_type,
                    primary_key: field.primary_key,
                });
            }
            schema = schema.with_table(
                &table.tablespace,
                &table.table,
                table.replication_factor,
                fields,
            );
        }
        Ok(schema)
    }

    fn table(&self, tablespace: &str, table: &str) -> Result<&TableSchema> {
        self.tables
            .get(&(tablespace.to_string(), table.to_string()))
            .ok_or_else(|| Error::UnknownTable {
                tablespace: tablespace.to_string(),
                table: table.to_string(),
            })
    }
}

#[async_trait]
impl SchemaService for StaticSchema {
    async fn get_fields(&self, tablespace: &str, table: &str) -> Result<Vec<FieldDescription>> {
        Ok(self.table(tablespace, table)?.fields.clone())
    }

    async fn get_nodes(
        &self,
        tablespace: &str,
        table: &str,
        partition: &PartitionKey,
    ) -> Result<HashSet<Node>> {
        let schema = self.table(tablespace, table)?;
        let ids: Vec<String> = self.nodes.iter().map(|n| n.id.clone()).collect();
        let selected = select_replicas(partition, &ids, schema.replication_factor);
        Ok(self
            .nodes
            .iter()
            .filter(|n| selected.contains(&n.id))
            .cloned()
            .collect())
    }

    async fn get_all_nodes(&self, tablespace: &str, table: &str) -> Result<HashSet<Node>> {
        self.table(tablespace, table)?;
        Ok(self.nodes.iter().cloned().collect())
    }

    async fn replication_factor(&self, tablespace: &str, table: &str) -> Result<usize> {
        Ok(self.table(tablespace, table)?.replication_factor)
    }
}
