//! Fan-out coordination engine
//!
//! One coordinator serves every client operation. Each operation resolves
//! its replica set, issues the request to every replica concurrently
//! through the request pool, waits for the full join (each node bounded
//! by the per-request timeout), segregates the per-node outcomes into
//! categories, and applies the arbiter. Healing is scheduled on a
//! separate task; the client-visible result never waits on it.
//!
//! A single node's routing failure, transport error, or timeout becomes
//! that node's own `Failure` outcome and never aborts the fan-out.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::cluster::{Completion, Node, SchemaService, Transport};
use crate::common::digest::ContentDigest;
use crate::common::hash::{partition_key, PartitionKey};
use crate::common::{display_list, Error, Result};
use crate::coordinator::arbiter::Arbiter;
use crate::coordinator::healing::{HealContext, HealingEngine};
use crate::coordinator::pool::RequestPool;
use crate::protocol::{
    ApplyStatus, ConsistencyRequirement, Entry, FilterOp, FilterPredicate, HealingRequest,
    ModificationKind, ModificationRequest, NodeRequest, NodeResponse, RecollectionRequest,
};

/// Per-node request timeout, shared by data fan-out and healing donor
/// reads.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One node's contribution to an operation.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Response(NodeResponse),
    /// Routing error, transport failure, or timeout, rendered as text.
    Failed(String),
}

/// Per-node results of one fan-out, handed to the healing engine.
pub type ResultMap = HashMap<Node, NodeOutcome>;

/// Outcome categories for modifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WriteCategory {
    Success,
    Miss,
    Error,
    Failure,
}

/// Outcome categories for reads: agreement is keyed by entry content
/// hash, with a reserved pseudo-category for failed nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ReadCategory {
    Entry(ContentDigest),
    Error,
}

/// A merged read result. `errors` is non-empty for partial results.
#[derive(Debug, Clone)]
pub struct Recollection {
    pub entries: Vec<Entry>,
    pub errors: Vec<String>,
}

impl Recollection {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty() && !self.entries.is_empty()
    }
}

pub struct Coordinator {
    schema: Arc<dyn SchemaService>,
    transport: Arc<dyn Transport>,
    pool: RequestPool,
    healing: Arc<HealingEngine>,
    runtime: tokio::runtime::Handle,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(
        schema: Arc<dyn SchemaService>,
        transport: Arc<dyn Transport>,
        pool: RequestPool,
        healing: Arc<HealingEngine>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            schema,
            transport,
            pool,
            healing,
            runtime,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Shorten the per-node timeout (tests).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool(&self) -> &RequestPool {
        &self.pool
    }

    /// Unblock every in-flight waiter. Called at shutdown.
    pub fn shutdown(&self) {
        self.pool.cancel_all();
    }

    /// Insert, update, or delete one entry at the declared consistency.
    pub async fn modify(
        &self,
        kind: ModificationKind,
        entry: Entry,
        consistency: ConsistencyRequirement,
    ) -> Result<()> {
        let tablespace = entry.header.tablespace.as_str().to_string();
        let table = entry.header.table.as_str().to_string();

        let pk_fields = self.schema.primary_key_fields(&tablespace, &table).await?;
        let partition = entry.partition(&pk_fields)?;
        let nodes = self
            .schema
            .get_nodes(&tablespace, &table, &partition)
            .await?;
        if nodes.is_empty() {
            return Err(Error::NoTargetNodes { tablespace, table });
        }
        let total = self.schema.replication_factor(&tablespace, &table).await?;

        let expected_hash = entry.header.content_hash;
        tracing::debug!(
            %kind,
            table = format!("{}.{}", tablespace, table),
            partition = %partition.short(),
            replicas = nodes.len(),
            "dispatching modification"
        );

        let request = NodeRequest::Modification(ModificationRequest {
            kind,
            consistency,
            entry,
        });
        let results = self.fan_out(&nodes, request).await?;

        let decision = decide_modification(expected_hash, consistency, total, &results);
        self.schedule_healing(&tablespace, &table, results);
        decision
    }

    /// Query entries at the declared consistency. Equality filters
    /// covering the whole primary key pin the operation to one partition;
    /// anything else fans out to the table's full node set.
    pub async fn recollect(&self, request: RecollectionRequest) -> Result<Recollection> {
        let tablespace = request.tablespace.as_str().to_string();
        let table = request.table.as_str().to_string();
        let consistency = request.consistency;

        let pk_fields = self.schema.primary_key_fields(&tablespace, &table).await?;
        let nodes = match partition_from_filters(&pk_fields, &request.filters) {
            Some(partition) => {
                self.schema
                    .get_nodes(&tablespace, &table, &partition)
                    .await?
            }
            None => self.schema.get_all_nodes(&tablespace, &table).await?,
        };
        if nodes.is_empty() {
            return Err(Error::NoTargetNodes { tablespace, table });
        }
        let total = self.schema.replication_factor(&tablespace, &table).await?;

        let results = self
            .fan_out(&nodes, NodeRequest::Recollection(request))
            .await?;

        let decision = decide_recollection(consistency, total, &results);
        self.schedule_healing(&tablespace, &table, results);
        decision
    }

    /// Propagate an already-merged entry to its replica set as a heal.
    pub async fn heal(
        &self,
        entry: Entry,
        consistency: ConsistencyRequirement,
    ) -> Result<()> {
        let tablespace = entry.header.tablespace.as_str().to_string();
        let table = entry.header.table.as_str().to_string();

        let pk_fields = self.schema.primary_key_fields(&tablespace, &table).await?;
        let partition = entry.partition(&pk_fields)?;
        let nodes = self
            .schema
            .get_nodes(&tablespace, &table, &partition)
            .await?;
        if nodes.is_empty() {
            return Err(Error::NoTargetNodes { tablespace, table });
        }
        let total = self.schema.replication_factor(&tablespace, &table).await?;

        // Healing requests never carry cheques
        let request = NodeRequest::Healing(HealingRequest {
            entry: entry.without_cheques(),
        });
        let results = self.fan_out(&nodes, request).await?;
        decide_healing(consistency, total, &results)
    }

    /// Issue the request to every node concurrently and join every
    /// per-node future. Pool exhaustion aborts the operation; everything
    /// else becomes a per-node outcome.
    async fn fan_out(&self, nodes: &HashSet<Node>, request: NodeRequest) -> Result<ResultMap> {
        let mut waiters: Vec<(Node, crate::coordinator::pool::CoordinatedResult)> =
            Vec::with_capacity(nodes.len());
        for node in nodes {
            let result = match self.pool.register() {
                Ok(result) => result,
                Err(error) => {
                    for (_, pending) in &waiters {
                        self.pool.cancel(pending.id());
                    }
                    return Err(error);
                }
            };

            match self.transport.client(node).await {
                Ok(client) => {
                    let completion = Completion::new(self.pool.clone(), result.id());
                    client.submit(request.clone(), completion);
                }
                Err(error) => {
                    tracing::warn!(node = %node, "routing failed: {}", error);
                    self.pool.fail(result.id(), error);
                }
            }
            waiters.push((node.clone(), result));
        }

        let timeout = self.timeout;
        let joined = join_all(waiters.into_iter().map(|(node, result)| async move {
            (node, result.get(timeout).await)
        }))
        .await;

        let mut results = ResultMap::with_capacity(joined.len());
        for (node, outcome) in joined {
            let outcome = match outcome {
                Ok(response) => NodeOutcome::Response(response),
                Err(error) => {
                    if !error.is_node_scoped() {
                        tracing::warn!(node = %node, "unexpected per-node error: {}", error);
                    }
                    NodeOutcome::Failed(error.to_string())
                }
            };
            results.insert(node, outcome);
        }
        Ok(results)
    }

    /// Hand the per-node result map to the healing engine without
    /// blocking the client-visible response.
    fn schedule_healing(&self, tablespace: &str, table: &str, results: ResultMap) {
        let healing = Arc::clone(&self.healing);
        let ctx = HealContext {
            tablespace: tablespace.to_string(),
            table: table.to_string(),
        };
        self.runtime.spawn(async move {
            healing.run(ctx, results).await;
        });
    }
}

/// Partition for a read whose equality filters pin every primary-key
/// field.
fn partition_from_filters(
    pk_fields: &[String],
    filters: &[FilterPredicate],
) -> Option<PartitionKey> {
    if pk_fields.is_empty() {
        return None;
    }
    let mut pairs: Vec<(&str, Vec<u8>)> = Vec::with_capacity(pk_fields.len());
    for name in pk_fields {
        let filter = filters
            .iter()
            .find(|f| f.op == FilterOp::Eq && f.field.as_str() == name)?;
        pairs.push((name.as_str(), filter.operand.body_bytes()));
    }
    let borrowed: Vec<(&str, &[u8])> = pairs.iter().map(|(n, v)| (*n, v.as_slice())).collect();
    Some(partition_key(&borrowed))
}

fn decide_modification(
    expected_hash: ContentDigest,
    consistency: ConsistencyRequirement,
    total: usize,
    results: &ResultMap,
) -> Result<()> {
    let mut categories: HashMap<WriteCategory, HashSet<&Node>> = HashMap::new();
    let mut messages: BTreeSet<String> = BTreeSet::new();
    let mut failed_nodes: BTreeSet<String> = BTreeSet::new();

    for (node, outcome) in results {
        let category = match outcome {
            NodeOutcome::Response(NodeResponse::Modification(response)) => {
                match &response.status {
                    ApplyStatus::Applied if response.header_hash == expected_hash => {
                        WriteCategory::Success
                    }
                    ApplyStatus::Applied => WriteCategory::Miss,
                    ApplyStatus::Rejected(message) => {
                        messages.insert(message.clone());
                        WriteCategory::Error
                    }
                }
            }
            NodeOutcome::Response(other) => {
                failed_nodes.insert(node.id.clone());
                messages.insert(format!("unexpected {} result", other.kind_name()));
                WriteCategory::Failure
            }
            NodeOutcome::Failed(message) => {
                failed_nodes.insert(node.id.clone());
                messages.insert(message.clone());
                WriteCategory::Failure
            }
        };
        categories.entry(category).or_default().insert(node);
    }

    let arbiter = Arbiter::new(consistency, total);
    let passing = arbiter.passing(&categories);

    if passing.contains(&WriteCategory::Success) {
        Ok(())
    } else if passing.contains(&WriteCategory::Error) {
        Err(Error::ReplicaErrors(display_list(&messages)))
    } else if passing.contains(&WriteCategory::Miss) {
        Err(Error::WriteMissed)
    } else if passing.contains(&WriteCategory::Failure) {
        Err(Error::WriteFailed(display_list(&failed_nodes)))
    } else {
        Err(Error::NoResults)
    }
}

fn decide_recollection(
    consistency: ConsistencyRequirement,
    total: usize,
    results: &ResultMap,
) -> Result<Recollection> {
    let mut categories: HashMap<ReadCategory, HashSet<&Node>> = HashMap::new();
    let mut entries_by_hash: HashMap<ContentDigest, Entry> = HashMap::new();
    let mut messages: BTreeSet<String> = BTreeSet::new();

    for (node, outcome) in results {
        match outcome {
            NodeOutcome::Response(NodeResponse::Recollection(response)) => {
                if let Some(error) = &response.error {
                    messages.insert(error.clone());
                    categories
                        .entry(ReadCategory::Error)
                        .or_default()
                        .insert(node);
                }
                for entry in &response.entries {
                    let hash = entry.content_hash();
                    categories
                        .entry(ReadCategory::Entry(hash))
                        .or_default()
                        .insert(node);
                    // Keep the most-disclosed copy of each version
                    entries_by_hash
                        .entry(hash)
                        .and_modify(|known| *known = known.merge_values_from(entry))
                        .or_insert_with(|| entry.clone());
                }
            }
            NodeOutcome::Response(other) => {
                messages.insert(format!("unexpected {} result", other.kind_name()));
                categories
                    .entry(ReadCategory::Error)
                    .or_default()
                    .insert(node);
            }
            NodeOutcome::Failed(message) => {
                messages.insert(message.clone());
                categories
                    .entry(ReadCategory::Error)
                    .or_default()
                    .insert(node);
            }
        }
    }

    let arbiter = Arbiter::new(consistency, total);
    let passing = arbiter.passing(&categories);

    let mut passing_hashes: Vec<ContentDigest> = passing
        .iter()
        .filter_map(|category| match category {
            ReadCategory::Entry(hash) => Some(*hash),
            ReadCategory::Error => None,
        })
        .collect();
    passing_hashes.sort();

    let entries: Vec<Entry> = passing_hashes
        .iter()
        .filter_map(|hash| entries_by_hash.remove(hash))
        .collect();

    let had_failures = categories
        .get(&ReadCategory::Error)
        .map(|nodes| !nodes.is_empty())
        .unwrap_or(false);

    if entries.is_empty() && had_failures {
        return Err(Error::ReadFailed(display_list(&messages)));
    }

    Ok(Recollection {
        entries,
        errors: messages.into_iter().collect(),
    })
}

fn decide_healing(
    consistency: ConsistencyRequirement,
    total: usize,
    results: &ResultMap,
) -> Result<()> {
    let mut categories: HashMap<WriteCategory, HashSet<&Node>> = HashMap::new();
    let mut messages: BTreeSet<String> = BTreeSet::new();
    let mut failed_nodes: BTreeSet<String> = BTreeSet::new();

    for (node, outcome) in results {
        let category = match outcome {
            NodeOutcome::Response(NodeResponse::Healing(response)) => match &response.status {
                ApplyStatus::Applied => WriteCategory::Success,
                ApplyStatus::Rejected(message) => {
                    messages.insert(message.clone());
                    WriteCategory::Error
                }
            },
            NodeOutcome::Response(other) => {
                failed_nodes.insert(node.id.clone());
                messages.insert(format!("unexpected {} result", other.kind_name()));
                WriteCategory::Failure
            }
            NodeOutcome::Failed(message) => {
                failed_nodes.insert(node.id.clone());
                messages.insert(message.clone());
                WriteCategory::Failure
            }
        };
        categories.entry(category).or_default().insert(node);
    }

    let arbiter = Arbiter::new(consistency, total);
    let passing = arbiter.passing(&categories);

    if passing.contains(&WriteCategory::Success) {
        Ok(())
    } else if passing.contains(&WriteCategory::Error) {
        Err(Error::ReplicaErrors(display_list(&messages)))
    } else if passing.contains(&WriteCategory::Failure) {
        Err(Error::WriteFailed(display_list(&failed_nodes)))
    } else {
        Err(Error::NoResults)
    }
}
