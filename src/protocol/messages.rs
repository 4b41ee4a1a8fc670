//! Protocol message types
//!
//! One request/response pair per operation family. The sum types are the
//! unit the transport moves; the coordinator and the node service match
//! on them exhaustively.

use crate::codec::{AsciiString, BigIntBytes};
use crate::common::digest::ContentDigest;
use crate::protocol::entry::{Cheque, Entry, FieldType};
use crate::protocol::query::{FilterPredicate, Selector};

/// Declared consistency requirement for an operation, interpreted against
/// the table's replication factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyRequirement {
    /// At least `n` replicas must agree.
    Count(u32),
    /// At least this percentage of the replica set must agree.
    Percent(u8),
    /// A majority of the replica set must agree.
    Quorum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    Insert,
    Update,
    Delete,
}

impl ModificationKind {
    pub fn code(&self) -> u64 {
        match self {
            ModificationKind::Insert => 1,
            ModificationKind::Update => 2,
            ModificationKind::Delete => 3,
        }
    }

    pub fn from_code(code: u64) -> crate::common::Result<Self> {
        Ok(match code {
            1 => ModificationKind::Insert,
            2 => ModificationKind::Update,
            3 => ModificationKind::Delete,
            other => {
                return Err(crate::common::Error::MalformedElement(format!(
                    "unknown modification kind {}",
                    other
                )))
            }
        })
    }
}

impl std::fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModificationKind::Insert => write!(f, "insert"),
            ModificationKind::Update => write!(f, "update"),
            ModificationKind::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationRequest {
    pub kind: ModificationKind,
    pub consistency: ConsistencyRequirement,
    pub entry: Entry,
}

/// A replica's verdict on an apply attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStatus {
    Applied,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationResponse {
    /// Header hash of the entry the replica now holds for this key. When
    /// it differs from the request's, a newer write superseded this one.
    pub header_hash: ContentDigest,
    pub status: ApplyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecollectionRequest {
    pub consistency: ConsistencyRequirement,
    pub tablespace: AsciiString,
    pub table: AsciiString,
    /// Empty means disclose every field.
    pub retrieve: Vec<Selector>,
    pub filters: Vec<FilterPredicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecollectionResponse {
    pub entries: Vec<Entry>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealingRequest {
    /// Fully-valued entry to install; never carries cheques.
    pub entry: Entry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealingResponse {
    pub status: ApplyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRequest {
    pub tablespace: AsciiString,
    pub table: AsciiString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: AsciiString,
    pub field_type: FieldType,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaResponse {
    pub fields: Vec<FieldDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingLimits {
    /// Maximum number of cheques to return.
    pub count_limit: u64,
    /// Stop once the accumulated crop amount reaches this threshold.
    pub amount_threshold: BigIntBytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingRequest {
    pub tablespace: AsciiString,
    pub table: AsciiString,
    pub limits: BillingLimits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingResponse {
    pub cheques: Vec<Cheque>,
}

/// Every request a node can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRequest {
    Modification(ModificationRequest),
    Recollection(RecollectionRequest),
    Healing(HealingRequest),
    Schema(SchemaRequest),
    Billing(BillingRequest),
}

/// Every response a node can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeResponse {
    Modification(ModificationResponse),
    Recollection(RecollectionResponse),
    Healing(HealingResponse),
    Schema(SchemaResponse),
    Billing(BillingResponse),
}

impl NodeRequest {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeRequest::Modification(_) => "modification",
            NodeRequest::Recollection(_) => "recollection",
            NodeRequest::Healing(_) => "healing",
            NodeRequest::Schema(_) => "schema",
            NodeRequest::Billing(_) => "billing",
        }
    }
}

impl NodeResponse {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeResponse::Modification(_) => "modification",
            NodeResponse::Recollection(_) => "recollection",
            NodeResponse::Healing(_) => "healing",
            NodeResponse::Schema(_) => "schema",
            NodeResponse::Billing(_) => "billing",
        }
    }
}
