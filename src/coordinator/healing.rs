//! Healing / read-repair engine
//!
//! Runs as a single-pass batch job after every fan-out, on its own task.
//! It detects per-key divergence across the replicas that answered a
//! read, picks a donor holding the authoritative version, pulls a fully
//! valued copy with a single-node read, and propagates the merged entry
//! to every replica that lacks it. There is no retry queue and no
//! backoff; failures are logged and left for the next pass.
//!
//! Only recollection results carry enough information to heal. Healing
//! from modification results is not implemented, and neither is
//! resolution of tied entry versions; both paths log and leave state
//! untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::cluster::{Completion, Node, SchemaService, Transport};
use crate::common::digest::ContentDigest;
use crate::common::hash::PartitionKey;
use crate::common::Result;
use crate::coordinator::fanout::{NodeOutcome, ResultMap, REQUEST_TIMEOUT};
use crate::coordinator::pool::RequestPool;
use crate::protocol::{
    ApplyStatus, ConsistencyRequirement, Entry, FilterPredicate, HealingRequest, HealingResponse,
    NodeRequest, NodeResponse, RecollectionRequest,
};

/// Table context for one healing pass.
#[derive(Debug, Clone)]
pub struct HealContext {
    pub tablespace: String,
    pub table: String,
}

/// What one pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealReport {
    pub keys_checked: usize,
    pub keys_conflicted: usize,
    pub targets_healed: usize,
    pub targets_failed: usize,
}

/// One distinct version of one logical key, and who holds it.
struct VersionGroup {
    entry: Entry,
    holders: HashSet<Node>,
}

pub struct HealingEngine {
    schema: Arc<dyn SchemaService>,
    transport: Arc<dyn Transport>,
    pool: RequestPool,
    timeout: Duration,
}

impl HealingEngine {
    pub fn new(
        schema: Arc<dyn SchemaService>,
        transport: Arc<dyn Transport>,
        pool: RequestPool,
    ) -> Arc<Self> {
        Arc::new(Self {
            schema,
            transport,
            pool,
            timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(self: Arc<Self>, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            schema: Arc::clone(&self.schema),
            transport: Arc::clone(&self.transport),
            pool: self.pool.clone(),
            timeout,
        })
    }

    /// Entry point for scheduled passes: log, never propagate errors.
    pub async fn run(&self, ctx: HealContext, results: ResultMap) {
        match self.heal(ctx.clone(), results).await {
            Ok(report) if report.targets_healed > 0 || report.targets_failed > 0 => {
                tracing::info!(
                    table = format!("{}.{}", ctx.tablespace, ctx.table),
                    healed = report.targets_healed,
                    failed = report.targets_failed,
                    conflicted = report.keys_conflicted,
                    "healing pass finished"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(
                    table = format!("{}.{}", ctx.tablespace, ctx.table),
                    "healing pass failed: {}",
                    error
                );
            }
        }
    }

    /// One healing pass over a fan-out's per-node results.
    pub async fn heal(&self, ctx: HealContext, results: ResultMap) -> Result<HealReport> {
        let mut report = HealReport::default();

        let pk_fields = self
            .schema
            .primary_key_fields(&ctx.tablespace, &ctx.table)
            .await?;

        // Group (key hash → content hash → holders) from recollection
        // results; other result kinds cannot be healed from.
        let mut keys: HashMap<PartitionKey, HashMap<ContentDigest, VersionGroup>> = HashMap::new();
        let mut recollections = 0usize;
        let mut modifications = 0usize;

        for (node, outcome) in &results {
            match outcome {
                NodeOutcome::Response(NodeResponse::Recollection(response)) => {
                    recollections += 1;
                    for entry in &response.entries {
                        let key = match entry.partition(&pk_fields) {
                            Ok(key) => key,
                            Err(error) => {
                                tracing::debug!("skipping entry without key values: {}", error);
                                continue;
                            }
                        };
                        let group = keys
                            .entry(key)
                            .or_default()
                            .entry(entry.content_hash())
                            .or_insert_with(|| VersionGroup {
                                entry: entry.clone(),
                                holders: HashSet::new(),
                            });
                        // Prefer the most-disclosed copy of this version
                        group.entry = group.entry.merge_values_from(entry);
                        group.holders.insert(node.clone());
                    }
                }
                NodeOutcome::Response(NodeResponse::Modification(_)) => {
                    modifications += 1;
                }
                _ => {}
            }
        }

        if recollections == 0 {
            if modifications > 0 {
                tracing::debug!("healing from modification results is not implemented");
            }
            return Ok(report);
        }

        for (key, groups) in keys {
            report.keys_checked += 1;

            let survivor = match resolve_versions(groups) {
                Some(group) => group,
                None => {
                    // FIXME: tied version groups are dropped for this
                    // pass; a resolution policy has not been defined
                    tracing::warn!(
                        key = %key.short(),
                        "conflicting entry versions across replicas; resolution not implemented"
                    );
                    report.keys_conflicted += 1;
                    continue;
                }
            };

            let authoritative = self
                .schema
                .get_nodes(&ctx.tablespace, &ctx.table, &key)
                .await?;
            let targets: Vec<Node> = authoritative
                .difference(&survivor.holders)
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }

            let holders: Vec<Node> = survivor.holders.iter().cloned().collect();
            let donor = holders
                .choose(&mut rand::thread_rng())
                .expect("version group has at least one holder")
                .clone();

            let merged = match self.pull_from_donor(&ctx, &pk_fields, &donor, &survivor).await {
                Some(entry) => entry,
                None => continue,
            };

            tracing::debug!(
                key = %key.short(),
                donor = %donor,
                targets = targets.len(),
                version = merged.header.version,
                "propagating healed entry"
            );

            for target in targets {
                let request = NodeRequest::Healing(HealingRequest {
                    entry: merged.clone(),
                });
                match self.single_request(&target, request).await {
                    Ok(NodeResponse::Healing(HealingResponse {
                        status: ApplyStatus::Applied,
                    })) => report.targets_healed += 1,
                    Ok(NodeResponse::Healing(HealingResponse {
                        status: ApplyStatus::Rejected(message),
                    })) => {
                        tracing::warn!(node = %target, "heal rejected: {}", message);
                        report.targets_failed += 1;
                    }
                    Ok(other) => {
                        tracing::warn!(node = %target, "unexpected {} result", other.kind_name());
                        report.targets_failed += 1;
                    }
                    Err(error) => {
                        tracing::warn!(node = %target, "heal failed: {}", error);
                        report.targets_failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Fetch a complete copy of the surviving version from the donor with
    /// a single-node read, then merge its values over ours and erase
    /// cheques. The held copy may carry hashes only.
    async fn pull_from_donor(
        &self,
        ctx: &HealContext,
        pk_fields: &[String],
        donor: &Node,
        survivor: &VersionGroup,
    ) -> Option<Entry> {
        let mut filters = Vec::with_capacity(pk_fields.len());
        for name in pk_fields {
            let value = survivor
                .entry
                .fields
                .get(name)
                .and_then(|field| field.value.clone());
            match value {
                Some(value) => match FilterPredicate::equals(name, value) {
                    Ok(filter) => filters.push(filter),
                    Err(error) => {
                        tracing::debug!("cannot filter on {}: {}", name, error);
                        return None;
                    }
                },
                None => {
                    tracing::debug!("primary key field {} not disclosed; cannot heal", name);
                    return None;
                }
            }
        }

        let request = NodeRequest::Recollection(RecollectionRequest {
            consistency: ConsistencyRequirement::Count(1),
            tablespace: survivor.entry.header.tablespace.clone(),
            table: survivor.entry.header.table.clone(),
            retrieve: Vec::new(),
            filters,
        });

        let wanted = survivor.entry.content_hash();
        match self.single_request(donor, request).await {
            Ok(NodeResponse::Recollection(response)) => {
                let donor_entry = response
                    .entries
                    .into_iter()
                    .find(|entry| entry.content_hash() == wanted);
                match donor_entry {
                    Some(donor_entry) => Some(
                        survivor
                            .entry
                            .merge_values_from(&donor_entry)
                            .without_cheques(),
                    ),
                    None => {
                        tracing::warn!(
                            donor = %donor,
                            table = format!("{}.{}", ctx.tablespace, ctx.table),
                            "donor no longer holds the expected version"
                        );
                        None
                    }
                }
            }
            Ok(other) => {
                tracing::warn!(donor = %donor, "unexpected {} result", other.kind_name());
                None
            }
            Err(error) => {
                tracing::warn!(donor = %donor, "donor read failed: {}", error);
                None
            }
        }
    }

    /// One request to one node through the pool.
    async fn single_request(&self, node: &Node, request: NodeRequest) -> Result<NodeResponse> {
        let result = self.pool.register()?;
        let client = self.transport.client(node).await?;
        client.submit(request, Completion::new(self.pool.clone(), result.id()));
        result.get(self.timeout).await
    }
}

/// Strict version dominance: a single group with the greatest version
/// survives; a tie resolves nothing.
fn resolve_versions(groups: HashMap<ContentDigest, VersionGroup>) -> Option<VersionGroup> {
    let max_version = groups
        .values()
        .map(|group| group.entry.header.version)
        .max()?;
    let mut dominating: Vec<VersionGroup> = groups
        .into_values()
        .filter(|group| group.entry.header.version == max_version)
        .collect();
    if dominating.len() == 1 {
        dominating.pop()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EntryBuilder, FieldValue};
    use crate::common::Keypair;

    fn node(i: usize) -> Node {
        Node::new(
            format!("node-{}", i),
            format!("127.0.0.1:{}", 7400 + i).parse().unwrap(),
        )
    }

    fn entry(version: u64, name: &str) -> Entry {
        EntryBuilder::new("crops", "harvest")
            .unwrap()
            .version(version)
            .field("id", FieldValue::Unsigned(1))
            .unwrap()
            .field("name", FieldValue::Utf8(name.into()))
            .unwrap()
            .sign(&Keypair::generate())
    }

    fn group(entry: Entry, holders: &[usize]) -> VersionGroup {
        VersionGroup {
            entry,
            holders: holders.iter().map(|&i| node(i)).collect(),
        }
    }

    #[test]
    fn test_resolve_versions_single_group() {
        let e = entry(5, "wheat");
        let mut groups = HashMap::new();
        groups.insert(e.content_hash(), group(e.clone(), &[0, 1]));

        let survivor = resolve_versions(groups).unwrap();
        assert_eq!(survivor.entry.header.version, 5);
    }

    #[test]
    fn test_resolve_versions_dominance() {
        let old = entry(4, "wheat");
        let new = entry(5, "wheat");
        let mut groups = HashMap::new();
        groups.insert(old.content_hash(), group(old, &[0]));
        groups.insert(new.content_hash(), group(new.clone(), &[1, 2]));

        let survivor = resolve_versions(groups).unwrap();
        assert_eq!(survivor.entry.content_hash(), new.content_hash());
    }

    #[test]
    fn test_resolve_versions_tie_resolves_nothing() {
        // Two distinct entries at the same version: no policy is defined
        let a = entry(5, "wheat");
        let b = entry(5, "rye");
        let mut groups = HashMap::new();
        groups.insert(a.content_hash(), group(a, &[0]));
        groups.insert(b.content_hash(), group(b, &[1]));

        assert!(resolve_versions(groups).is_none());
    }

    #[test]
    fn test_resolve_versions_empty() {
        assert!(resolve_versions(HashMap::new()).is_none());
    }
}
