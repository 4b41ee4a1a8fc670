//! In-process loopback transport
//!
//! Routes requests to `LocalStore`s in the same process, but through the
//! full wire codec: every request and response is encoded, decoded, and
//! verified exactly as it would be on a socket. Nodes can be marked
//! unreachable (routing errors) or error-injecting (replica-side
//! rejections), which is how the tests produce divergent fan-outs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cluster::transport::{Completion, Transport, TransportClient};
use crate::cluster::Node;
use crate::codec::UnknownElements;
use crate::common::digest::SignatureScheme;
use crate::common::{Error, Result};
use crate::node::LocalStore;
use crate::protocol::{
    writer, ApplyStatus, HealingResponse, MessageReader, ModificationResponse, NodeRequest,
    NodeResponse, RecollectionResponse,
};

/// Shared in-process cluster state.
pub struct MemoryMesh {
    scheme: Arc<dyn SignatureScheme>,
    services: Mutex<HashMap<String, Arc<LocalStore>>>,
    unreachable: Mutex<HashSet<String>>,
    rejecting: Mutex<HashMap<String, String>>,
}

impl MemoryMesh {
    pub fn new(scheme: Arc<dyn SignatureScheme>) -> Arc<Self> {
        Arc::new(Self {
            scheme,
            services: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            rejecting: Mutex::new(HashMap::new()),
        })
    }

    pub fn add_node(&self, node_id: impl Into<String>, store: Arc<LocalStore>) {
        self.services.lock().unwrap().insert(node_id.into(), store);
    }

    pub fn store(&self, node_id: &str) -> Option<Arc<LocalStore>> {
        self.services.lock().unwrap().get(node_id).cloned()
    }

    /// Make routing to a node fail.
    pub fn set_unreachable(&self, node_id: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if unreachable {
            set.insert(node_id.to_string());
        } else {
            set.remove(node_id);
        }
    }

    /// Make a node reject every request with the given message.
    pub fn set_rejecting(&self, node_id: &str, message: Option<&str>) {
        let mut map = self.rejecting.lock().unwrap();
        match message {
            Some(message) => map.insert(node_id.to_string(), message.to_string()),
            None => map.remove(node_id),
        };
    }
}

pub struct MemoryTransport {
    mesh: Arc<MemoryMesh>,
}

impl MemoryTransport {
    pub fn new(mesh: Arc<MemoryMesh>) -> Arc<Self> {
        Arc::new(Self { mesh })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn client(&self, node: &Node) -> Result<Arc<dyn TransportClient>> {
        if self.mesh.unreachable.lock().unwrap().contains(&node.id) {
            return Err(Error::NoRoute(node.id.clone()));
        }
        let store = self
            .mesh
            .store(&node.id)
            .ok_or_else(|| Error::NoRoute(node.id.clone()))?;
        Ok(Arc::new(MemoryClient {
            mesh: Arc::clone(&self.mesh),
            node_id: node.id.clone(),
            store,
        }))
    }
}

struct MemoryClient {
    mesh: Arc<MemoryMesh>,
    node_id: String,
    store: Arc<LocalStore>,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl TransportClient for MemoryClient {
    fn submit(&self, request: NodeRequest, completion: Completion) {
        let mesh = Arc::clone(&self.mesh);
        let store = Arc::clone(&self.store);
        let node_id = self.node_id.clone();

        tokio::spawn(async move {
            let rejection = mesh.rejecting.lock().unwrap().get(&node_id).cloned();
            if let Some(message) = rejection {
                completion.complete(rejected_response(&request, message));
                return;
            }

            match round_trip(&mesh, store, completion.id(), request).await {
                Ok(response) => {
                    completion.complete(response);
                }
                Err(error) => {
                    completion.fail(error);
                }
            }
        });
    }
}

/// Encode, decode, execute, encode, decode — the same byte path a socket
/// transport takes.
async fn round_trip(
    mesh: &MemoryMesh,
    store: Arc<LocalStore>,
    message_id: u64,
    request: NodeRequest,
) -> Result<NodeResponse> {
    let reader = MessageReader::new(mesh.scheme.as_ref(), UnknownElements::Skip);

    let frame = writer::write_request(message_id, &request)?;
    let (decoded_id, decoded_request) = reader.read_request(&frame)?;

    let response = store.handle(decoded_request).await;

    let frame = writer::write_response(decoded_id, &response)?;
    let (_, decoded_response) = reader.read_response(&frame)?;
    Ok(decoded_response)
}

/// A kind-appropriate rejection for an injected error.
fn rejected_response(request: &NodeRequest, message: String) -> NodeResponse {
    match request {
        NodeRequest::Modification(r) => NodeResponse::Modification(ModificationResponse {
            header_hash: r.entry.header.content_hash,
            status: ApplyStatus::Rejected(message),
        }),
        NodeRequest::Healing(_) => NodeResponse::Healing(HealingResponse {
            status: ApplyStatus::Rejected(message),
        }),
        _ => NodeResponse::Recollection(RecollectionResponse {
            entries: Vec::new(),
            error: Some(message),
        }),
    }
}
