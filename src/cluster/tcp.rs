//! TCP transport
//!
//! Frame format: [MAGIC][LEN][PAYLOAD][CRC32], little-endian lengths,
//! CRC over the payload. One connection per peer node, reused across
//! operations; responses are matched to requests by message id, which is
//! the request pool identifier. A broken connection fails every request
//! still pending on it and evicts itself from the connection cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::cluster::transport::{Completion, Transport, TransportClient};
use crate::cluster::Node;
use crate::codec::UnknownElements;
use crate::common::digest::SignatureScheme;
use crate::common::{Error, Result};
use crate::protocol::{writer, MessageReader, NodeRequest};

pub(crate) const FRAME_MAGIC: [u8; 4] = [0x51, 0x44, 0x42, 0x31]; // "QDB1"

/// Upper bound on a single frame's payload.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Write one framed payload.
pub(crate) async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<()> {
    writer.write_all(&FRAME_MAGIC).await?;
    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer
        .write_all(&crc32fast::hash(payload).to_le_bytes())
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed payload; `None` on a clean end of stream.
pub(crate) async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
    let mut magic = [0u8; 4];
    match reader.read_exact(&mut magic).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if magic != FRAME_MAGIC {
        return Err(Error::FrameCorrupted("invalid frame magic".into()));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameCorrupted(format!("frame length {}", len)));
    }

    let mut payload = BytesMut::zeroed(len as usize);
    reader.read_exact(&mut payload).await?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes).await?;
    let stored_crc = u32::from_le_bytes(crc_bytes);
    if crc32fast::hash(&payload) != stored_crc {
        return Err(Error::FrameCorrupted("frame checksum mismatch".into()));
    }

    Ok(Some(payload.freeze()))
}

type ConnectionMap = Arc<Mutex<HashMap<Node, Arc<TcpClient>>>>;
type PendingMap = Arc<StdMutex<HashMap<u64, Completion>>>;

pub struct TcpTransport {
    scheme: Arc<dyn SignatureScheme>,
    policy: UnknownElements,
    connections: ConnectionMap,
}

impl TcpTransport {
    pub fn new(scheme: Arc<dyn SignatureScheme>, policy: UnknownElements) -> Arc<Self> {
        Arc::new(Self {
            scheme,
            policy,
            connections: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn connect(&self, node: &Node) -> Result<Arc<TcpClient>> {
        let stream = TcpStream::connect(node.addr)
            .await
            .map_err(|e| Error::NoRoute(format!("{}: {}", node.id, e)))?;
        let (read_half, write_half) = stream.into_split();

        let client = Arc::new(TcpClient {
            writer: Arc::new(Mutex::new(write_half)),
            pending: Arc::new(StdMutex::new(HashMap::new())),
        });

        tokio::spawn(run_reader(
            read_half,
            node.clone(),
            Arc::clone(&client.pending),
            Arc::clone(&self.scheme),
            self.policy,
            Arc::clone(&self.connections),
        ));

        Ok(client)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn client(&self, node: &Node) -> Result<Arc<dyn TransportClient>> {
        let mut connections = self.connections.lock().await;
        if let Some(client) = connections.get(node) {
            return Ok(Arc::clone(client) as Arc<dyn TransportClient>);
        }
        let client = self.connect(node).await?;
        connections.insert(node.clone(), Arc::clone(&client));
        Ok(client)
    }
}

/// Drain responses off one connection until it breaks, then fail every
/// request still pending on it.
async fn run_reader(
    mut read_half: OwnedReadHalf,
    node: Node,
    pending: PendingMap,
    scheme: Arc<dyn SignatureScheme>,
    policy: UnknownElements,
    connections: ConnectionMap,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(frame)) => {
                let reader = MessageReader::new(scheme.as_ref(), policy);
                match reader.read_response(&frame) {
                    Ok((id, response)) => {
                        let completion = pending.lock().unwrap().remove(&id);
                        match completion {
                            Some(completion) => {
                                completion.complete(response);
                            }
                            None => {
                                tracing::debug!(node = %node, "response for unknown request {}", id)
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!(node = %node, "dropping undecodable response: {}", error);
                    }
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(node = %node, "connection read failed: {}", error);
                break;
            }
        }
    }

    connections.lock().await.remove(&node);
    let leftovers: Vec<Completion> = pending
        .lock()
        .unwrap()
        .drain()
        .map(|(_, completion)| completion)
        .collect();
    for completion in leftovers {
        completion.fail(Error::ConnectionFailed(format!(
            "connection to {} closed",
            node
        )));
    }
}

struct TcpClient {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    pending: PendingMap,
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient").finish_non_exhaustive()
    }
}

impl TransportClient for TcpClient {
    fn submit(&self, request: NodeRequest, completion: Completion) {
        let id = completion.id();

        let frame = match writer::write_request(id, &request) {
            Ok(frame) => frame,
            Err(error) => {
                completion.fail(error);
                return;
            }
        };

        self.pending.lock().unwrap().insert(id, completion);
        let pending = Arc::clone(&self.pending);
        let writer = Arc::clone(&self.writer);
        tokio::spawn(async move {
            let mut guard = writer.lock().await;
            if let Err(error) = write_frame(&mut *guard, &frame).await {
                drop(guard);
                if let Some(completion) = pending.lock().unwrap().remove(&id) {
                    completion.fail(Error::ConnectionFailed(error.to_string()));
                }
            }
        });
    }
}
