//! Partition hashing for quorumdb
//!
//! - BLAKE3 over primary-key field values for partition addressing
//! - HRW (Highest Random Weight) for replica selection
//!
//! Placement hashing is deliberately distinct from the wire content
//! digests in [`crate::common::digest`]: partition keys never appear in
//! signed material.

use crate::common::digest::DIGEST_LEN;

/// Hash identifying the partition a record belongs to, derived from its
/// primary-key field values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey([u8; DIGEST_LEN]);

impl PartitionKey {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PartitionKey({})", self.short())
    }
}

/// Compute the partition key for a set of primary-key field values.
///
/// Pairs are hashed sorted by field name so the result is independent of
/// the order fields were supplied in. Name and value lengths are mixed in
/// to keep adjacent pairs unambiguous.
pub fn partition_key(pairs: &[(&str, &[u8])]) -> PartitionKey {
    let mut sorted: Vec<&(&str, &[u8])> = pairs.iter().collect();
    sorted.sort_by_key(|(name, _)| *name);

    let mut hasher = blake3::Hasher::new();
    for (name, value) in sorted {
        hasher.update(&(name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&(value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    PartitionKey(*hasher.finalize().as_bytes())
}

/// HRW (Highest Random Weight) hashing for replica placement
///
/// Given a partition and a set of node ids, returns the ids sorted by
/// their weight (deterministic per partition). This keeps placement
/// stable as the cluster membership list is re-read.
pub fn hrw_order(partition: &PartitionKey, node_ids: &[String]) -> Vec<String> {
    let mut weights: Vec<(String, u64)> = node_ids
        .iter()
        .map(|id| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(partition.as_bytes());
            hasher.update(id.as_bytes());
            let hash = hasher.finalize();
            let weight = u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap());
            (id.clone(), weight)
        })
        .collect();

    // Sort by weight (descending)
    weights.sort_by(|a, b| b.1.cmp(&a.1));

    weights.into_iter().map(|(id, _)| id).collect()
}

/// Select N replica node ids for a partition using HRW hashing.
pub fn select_replicas(partition: &PartitionKey, node_ids: &[String], n: usize) -> Vec<String> {
    let sorted = hrw_order(partition, node_ids);
    sorted.into_iter().take(n).collect()
}
