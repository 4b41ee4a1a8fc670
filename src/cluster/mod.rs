//! Cluster collaborators: node identity, schema/routing, transport
//!
//! The coordination engine only sees these narrow contracts. Shipped
//! implementations: a static schema registry, an in-process loopback
//! transport, and a TCP transport speaking the wire codec.

pub mod memory;
pub mod schema;
pub mod tcp;
pub mod transport;

pub use memory::{MemoryMesh, MemoryTransport};
pub use schema::{SchemaService, StaticSchema};
pub use tcp::TcpTransport;
pub use transport::{Completion, Transport, TransportClient};

use std::net::SocketAddr;

/// A peer store holding a copy of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
    pub id: String,
    pub addr: SocketAddr,
}

impl Node {
    pub fn new(id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
