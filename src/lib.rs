//! # quorumdb
//!
//! A distributed, replicated data store node with:
//! - Quorum coordination: every operation fans out to the replica set
//!   owning its partition and a pluggable consistency policy (count /
//!   percent / quorum) decides the outcome
//! - Asynchronous read-repair healing of divergent replicas
//! - A self-describing nested binary wire format with content hashing
//!   and signature verification woven into the parse pass
//!
//! ## Architecture
//!
//! ```text
//!            client operation (insert/update/delete/select/heal)
//!                              │
//!                    ┌─────────▼─────────┐
//!                    │    Coordinator    │
//!                    │  pool + arbiter   │
//!                    └─┬───────┬───────┬─┘
//!                      │       │       │  wire protocol (TCP)
//!               ┌──────▼─┐ ┌───▼────┐ ┌▼───────┐
//!               │ Node A │ │ Node B │ │ Node C │
//!               │ store  │ │ store  │ │ store  │
//!               └────────┘ └────────┘ └────────┘
//!                      ▲
//!                      └── healing pass (async, never blocks clients)
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! quorumdb-node --config ./node.toml
//! ```
//!
//! Entries are signed, hash-linked records grouped into tablespaces and
//! tables; cheques ride along as opaque accounting instruments. The
//! schema/routing service and the transport are narrow traits with
//! shipped implementations (static registry, in-process loopback, TCP).

pub mod cluster;
pub mod codec;
pub mod common;
pub mod coordinator;
pub mod node;
pub mod protocol;

// Re-export commonly used types
pub use cluster::{Node, SchemaService, StaticSchema, Transport};
pub use common::{Config, Error, Result};
pub use coordinator::{Arbiter, Coordinator, HealingEngine, RequestPool};
pub use node::{LocalStore, NodeServer};
pub use protocol::{ConsistencyRequirement, Entry, EntryBuilder};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
