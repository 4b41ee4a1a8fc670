//! Transport contracts
//!
//! A transport hands out per-node clients; a client takes a request and
//! a completion handle, and the eventual response (delivered later, from
//! whatever task the transport runs) resolves the handle. Routing
//! failures are scoped to the one node they concern.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::Node;
use crate::common::{Error, Result};
use crate::coordinator::pool::RequestPool;
use crate::protocol::{NodeRequest, NodeResponse};

/// Resolves one pool slot. Handed to a transport client together with
/// the request; whichever task receives the node's response calls
/// exactly one of these.
pub struct Completion {
    pool: RequestPool,
    id: u64,
}

impl Completion {
    pub fn new(pool: RequestPool, id: u64) -> Self {
        Self { pool, id }
    }

    /// The pool identifier; doubles as the wire message id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn complete(&self, response: NodeResponse) -> bool {
        self.pool.complete(self.id, response)
    }

    pub fn fail(&self, error: Error) -> bool {
        self.pool.fail(self.id, error)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// A client for one node. Fails with a routing error when no path to
    /// the node exists.
    async fn client(&self, node: &Node) -> Result<Arc<dyn TransportClient>>;
}

pub trait TransportClient: Send + Sync + std::fmt::Debug {
    /// Hand off a request. Must not block; the response resolves
    /// `completion` asynchronously.
    fn submit(&self, request: NodeRequest, completion: Completion);
}
