//! Node server
//!
//! Accepts wire-protocol connections, decodes request frames, executes
//! them against the local store, and writes framed responses. Requests
//! on one connection are handled concurrently; the message id keeps the
//! pairing.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::cluster::tcp::{read_frame, write_frame};
use crate::codec::UnknownElements;
use crate::common::digest::SignatureScheme;
use crate::common::Result;
use crate::node::LocalStore;
use crate::protocol::{writer, MessageReader};

pub struct NodeServer {
    bind_addr: SocketAddr,
    store: Arc<LocalStore>,
    scheme: Arc<dyn SignatureScheme>,
    policy: UnknownElements,
}

impl NodeServer {
    pub fn new(
        bind_addr: SocketAddr,
        store: Arc<LocalStore>,
        scheme: Arc<dyn SignatureScheme>,
        policy: UnknownElements,
    ) -> Self {
        Self {
            bind_addr,
            store,
            scheme,
            policy,
        }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting node server: {}", self.store.node_id());
        tracing::info!("  Wire protocol: {}", self.bind_addr);

        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already-bound listener (lets tests bind port 0).
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<()> {
        tracing::info!("✓ Node server ready");

        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "accepted connection");
            let store = Arc::clone(&self.store);
            let scheme = Arc::clone(&self.scheme);
            let policy = self.policy;
            tokio::spawn(async move {
                if let Err(error) = handle_connection(stream, store, scheme, policy).await {
                    tracing::warn!(%peer, "connection closed: {}", error);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    store: Arc<LocalStore>,
    scheme: Arc<dyn SignatureScheme>,
    policy: UnknownElements,
) -> Result<()> {
    let (mut read_half, write_half) = stream.into_split();
    let write_half = Arc::new(Mutex::new(write_half));

    while let Some(frame) = read_frame(&mut read_half).await? {
        let reader = MessageReader::new(scheme.as_ref(), policy);
        let (message_id, request) = match reader.read_request(&frame) {
            Ok(decoded) => decoded,
            Err(error) => {
                // Protocol decode errors are fatal to the message, not
                // retried; drop the connection so the peer resyncs.
                if error.is_integrity_failure() {
                    tracing::warn!("rejecting tampered request: {}", error);
                } else {
                    tracing::warn!("request decode failed: {}", error);
                }
                return Err(error);
            }
        };

        let store = Arc::clone(&store);
        let write_half = Arc::clone(&write_half);
        tokio::spawn(async move {
            let response = store.handle(request).await;
            match writer::write_response(message_id, &response) {
                Ok(frame) => {
                    let mut guard = write_half.lock().await;
                    if let Err(error) = write_frame(&mut *guard, &frame).await {
                        tracing::warn!("response write failed: {}", error);
                    }
                }
                Err(error) => tracing::warn!("response encode failed: {}", error),
            }
        });
    }
    Ok(())
}
