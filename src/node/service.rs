//! Node-local request execution
//!
//! `LocalStore` holds a node's in-memory table state and executes every
//! request kind a peer or coordinator can send it: version-checked
//! modification, filtered recollection with field projection, healing
//! apply, schema lookup, and the cheque ledger for billing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cluster::SchemaService;
use crate::common::hash::PartitionKey;
use crate::common::{Error, Result};
use crate::protocol::query::disclosed_fields;
use crate::protocol::{
    ApplyStatus, BillingRequest, BillingResponse, Cheque, Entry, HealingRequest, HealingResponse,
    ModificationKind, ModificationRequest, ModificationResponse, NodeRequest, NodeResponse,
    RecollectionRequest, RecollectionResponse, SchemaRequest, SchemaResponse,
};

type TableKey = (String, String);

#[derive(Default)]
struct TableState {
    /// Entries keyed by primary-key hash.
    entries: HashMap<PartitionKey, Entry>,
    /// Cheques collected from applied modifications, in arrival order.
    cheques: Vec<Cheque>,
}

pub struct LocalStore {
    node_id: String,
    schema: Arc<dyn SchemaService>,
    tables: Mutex<HashMap<TableKey, TableState>>,
}

impl LocalStore {
    pub fn new(node_id: impl Into<String>, schema: Arc<dyn SchemaService>) -> Self {
        Self {
            node_id: node_id.into(),
            schema,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Execute one request. Per-request failures become error statuses in
    /// the response, never a missing reply.
    pub async fn handle(&self, request: NodeRequest) -> NodeResponse {
        match request {
            NodeRequest::Modification(r) => NodeResponse::Modification(self.modify(r).await),
            NodeRequest::Recollection(r) => NodeResponse::Recollection(self.recollect(r).await),
            NodeRequest::Healing(r) => NodeResponse::Healing(self.heal(r).await),
            NodeRequest::Schema(r) => NodeResponse::Schema(self.schema_fields(r).await),
            NodeRequest::Billing(r) => NodeResponse::Billing(self.billing(r).await),
        }
    }

    async fn modify(&self, request: ModificationRequest) -> ModificationResponse {
        let entry = request.entry;
        let incoming_hash = entry.header.content_hash;

        let key = match self.entry_key(&entry).await {
            Ok(key) => key,
            Err(e) => {
                return ModificationResponse {
                    header_hash: incoming_hash,
                    status: ApplyStatus::Rejected(e.to_string()),
                }
            }
        };

        let table_key = (
            entry.header.tablespace.as_str().to_string(),
            entry.header.table.as_str().to_string(),
        );
        let mut tables = self.tables.lock().await;
        let state = tables.entry(table_key).or_default();

        match request.kind {
            ModificationKind::Insert | ModificationKind::Update => {
                if let Some(existing) = state.entries.get(&key) {
                    if existing.header.version >= entry.header.version {
                        // A newer (or equal) write already holds this key;
                        // report its hash so the coordinator sees a miss.
                        return ModificationResponse {
                            header_hash: existing.header.content_hash,
                            status: ApplyStatus::Applied,
                        };
                    }
                }
                tracing::debug!(
                    node = %self.node_id,
                    key = %key.short(),
                    version = entry.header.version,
                    "applying {}",
                    request.kind
                );
                state.cheques.extend(entry.cheques.iter().cloned());
                state.entries.insert(key, entry);
                ModificationResponse {
                    header_hash: incoming_hash,
                    status: ApplyStatus::Applied,
                }
            }
            ModificationKind::Delete => {
                if let Some(existing) = state.entries.get(&key) {
                    if existing.header.version > entry.header.version {
                        return ModificationResponse {
                            header_hash: existing.header.content_hash,
                            status: ApplyStatus::Applied,
                        };
                    }
                    state.entries.remove(&key);
                }
                ModificationResponse {
                    header_hash: incoming_hash,
                    status: ApplyStatus::Applied,
                }
            }
        }
    }

    async fn recollect(&self, request: RecollectionRequest) -> RecollectionResponse {
        let tablespace = request.tablespace.as_str();
        let table = request.table.as_str();

        let pk_fields = match self.schema.primary_key_fields(tablespace, table).await {
            Ok(fields) => fields,
            Err(e) => {
                return RecollectionResponse {
                    entries: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        let tables = self.tables.lock().await;
        let state = match tables.get(&(tablespace.to_string(), table.to_string())) {
            Some(state) => state,
            None => {
                return RecollectionResponse {
                    entries: Vec::new(),
                    error: None,
                }
            }
        };

        // Fields a selector reaches stay disclosed; everything else is
        // returned as a hash commitment. Primary keys are always
        // disclosed so readers can address the records.
        let disclosed = disclosed_fields(&request.retrieve);

        let mut entries = Vec::new();
        for entry in state.entries.values() {
            if !request.filters.iter().all(|f| f.matches(entry)) {
                continue;
            }
            let mut projected = entry.clone();
            if let Some(disclosed) = &disclosed {
                for (name, field) in &mut projected.fields {
                    if !disclosed.contains(name) && !pk_fields.contains(name) {
                        field.value = None;
                    }
                }
            }
            entries.push(projected);
        }

        RecollectionResponse {
            entries,
            error: None,
        }
    }

    async fn heal(&self, request: HealingRequest) -> HealingResponse {
        let entry = request.entry;
        let key = match self.entry_key(&entry).await {
            Ok(key) => key,
            Err(e) => {
                return HealingResponse {
                    status: ApplyStatus::Rejected(e.to_string()),
                }
            }
        };

        let table_key = (
            entry.header.tablespace.as_str().to_string(),
            entry.header.table.as_str().to_string(),
        );
        let mut tables = self.tables.lock().await;
        let state = tables.entry(table_key).or_default();

        match state.entries.get(&key) {
            Some(existing) if existing.header.version > entry.header.version => {
                HealingResponse {
                    status: ApplyStatus::Rejected("holds a newer version".into()),
                }
            }
            Some(existing)
                if existing.header.version == entry.header.version
                    && existing.header.content_hash != entry.header.content_hash =>
            {
                HealingResponse {
                    status: ApplyStatus::Rejected("conflicting entry at same version".into()),
                }
            }
            _ => {
                tracing::debug!(
                    node = %self.node_id,
                    key = %key.short(),
                    version = entry.header.version,
                    "healing apply"
                );
                state.entries.insert(key, entry);
                HealingResponse {
                    status: ApplyStatus::Applied,
                }
            }
        }
    }

    async fn schema_fields(&self, request: SchemaRequest) -> SchemaResponse {
        let fields = self
            .schema
            .get_fields(request.tablespace.as_str(), request.table.as_str())
            .await
            .unwrap_or_default();
        SchemaResponse { fields }
    }

    async fn billing(&self, request: BillingRequest) -> BillingResponse {
        let tables = self.tables.lock().await;
        let state = match tables.get(&(
            request.tablespace.as_str().to_string(),
            request.table.as_str().to_string(),
        )) {
            Some(state) => state,
            None => return BillingResponse { cheques: Vec::new() },
        };

        let threshold = request.limits.amount_threshold.to_i64().unwrap_or(i64::MAX);
        let mut total: i128 = 0;
        let mut cheques = Vec::new();
        for cheque in &state.cheques {
            if cheques.len() as u64 >= request.limits.count_limit {
                break;
            }
            if total >= threshold as i128 {
                break;
            }
            total += i128::from(cheque.crop.to_i64().unwrap_or(0));
            cheques.push(cheque.clone());
        }
        BillingResponse { cheques }
    }

    /// Primary-key hash for an entry, via the schema service.
    async fn entry_key(&self, entry: &Entry) -> Result<PartitionKey> {
        let pk_fields = self
            .schema
            .primary_key_fields(
                entry.header.tablespace.as_str(),
                entry.header.table.as_str(),
            )
            .await?;
        if pk_fields.is_empty() {
            return Err(Error::UnknownTable {
                tablespace: entry.header.tablespace.as_str().to_string(),
                table: entry.header.table.as_str().to_string(),
            });
        }
        entry.partition(&pk_fields)
    }

    // === Test and inspection hooks ===

    /// Entry currently held for a key, if any.
    pub async fn get_entry(&self, tablespace: &str, table: &str, key: &PartitionKey) -> Option<Entry> {
        let tables = self.tables.lock().await;
        tables
            .get(&(tablespace.to_string(), table.to_string()))
            .and_then(|state| state.entries.get(key).cloned())
    }

    /// Number of entries held for a table.
    pub async fn entry_count(&self, tablespace: &str, table: &str) -> usize {
        let tables = self.tables.lock().await;
        tables
            .get(&(tablespace.to_string(), table.to_string()))
            .map(|state| state.entries.len())
            .unwrap_or(0)
    }
}
