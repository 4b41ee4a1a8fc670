//! Coordinated request pool
//!
//! Correlates asynchronous per-node responses back to the operation that
//! issued them. Each registration allocates a process-unique identifier
//! and a single-assignment slot; exactly one of complete/fail/cancel
//! resolves it (first resolver wins), and resolution removes the slot.
//!
//! The pool is a cheap-clone handle; clones share the same slot map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::common::{Error, Result};
use crate::protocol::NodeResponse;

/// How a coordinated result ended.
#[derive(Debug)]
pub enum Resolution {
    Completed(NodeResponse),
    Failed(Error),
    Cancelled,
}

/// Bounded retry budget for identifier collisions before the pool is
/// declared too crowded.
const MAX_REGISTER_ATTEMPTS: usize = 8;

struct PoolInner {
    slots: Mutex<HashMap<u64, oneshot::Sender<Resolution>>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct RequestPool {
    inner: Arc<PoolInner>,
}

impl RequestPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Allocate a fresh identifier and a pending slot for it.
    pub fn register(&self) -> Result<CoordinatedResult> {
        for _ in 0..MAX_REGISTER_ATTEMPTS {
            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            let mut slots = self.inner.slots.lock().unwrap();
            match slots.entry(id) {
                std::collections::hash_map::Entry::Occupied(_) => continue,
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(tx);
                    return Ok(CoordinatedResult {
                        id,
                        rx,
                        pool: self.clone(),
                    });
                }
            }
        }
        Err(Error::PoolExhausted)
    }

    /// Resolve a slot with a response. Returns whether resolution
    /// occurred (false on unknown or already-resolved ids).
    pub fn complete(&self, id: u64, response: NodeResponse) -> bool {
        self.resolve(id, Resolution::Completed(response))
    }

    /// Resolve a slot with a per-node error.
    pub fn fail(&self, id: u64, error: Error) -> bool {
        self.resolve(id, Resolution::Failed(error))
    }

    /// Cancel a slot, interrupting its waiter.
    pub fn cancel(&self, id: u64) -> bool {
        self.resolve(id, Resolution::Cancelled)
    }

    /// Unblock every outstanding waiter (shutdown path).
    pub fn cancel_all(&self) {
        let drained: Vec<(u64, oneshot::Sender<Resolution>)> =
            self.inner.slots.lock().unwrap().drain().collect();
        for (_, sender) in drained {
            let _ = sender.send(Resolution::Cancelled);
        }
    }

    /// Number of unresolved slots.
    pub fn pending(&self) -> usize {
        self.inner.slots.lock().unwrap().len()
    }

    fn resolve(&self, id: u64, resolution: Resolution) -> bool {
        let sender = self.inner.slots.lock().unwrap().remove(&id);
        match sender {
            Some(sender) => {
                // A send to a waiter that already gave up (timed out) is
                // still a resolution: the slot is gone either way.
                let _ = sender.send(resolution);
                true
            }
            None => false,
        }
    }
}

impl Default for RequestPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-assignment future for one node's contribution to an operation.
pub struct CoordinatedResult {
    id: u64,
    rx: oneshot::Receiver<Resolution>,
    pool: RequestPool,
}

impl CoordinatedResult {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block the calling task until resolution or timeout. A timeout
    /// removes the slot, so a late response resolves nothing.
    pub async fn get(self, timeout: Duration) -> Result<NodeResponse> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(Resolution::Completed(response))) => Ok(response),
            Ok(Ok(Resolution::Failed(error))) => Err(error),
            Ok(Ok(Resolution::Cancelled)) => Err(Error::Cancelled),
            Ok(Err(_)) => Err(Error::Internal("result slot dropped unresolved".into())),
            Err(_) => {
                self.pool.cancel(self.id);
                Err(Error::Timeout(format!(
                    "no response within {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ApplyStatus, HealingResponse};

    fn response() -> NodeResponse {
        NodeResponse::Healing(HealingResponse {
            status: ApplyStatus::Applied,
        })
    }

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let pool = RequestPool::new();
        let result = pool.register().unwrap();
        let id = result.id();

        assert!(pool.complete(id, response()));
        let got = result.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, response());
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_first_resolver_wins() {
        let pool = RequestPool::new();
        let result = pool.register().unwrap();
        let id = result.id();

        assert!(pool.fail(id, Error::Cancelled));
        assert!(!pool.complete(id, response()));
        assert!(!pool.fail(id, Error::Cancelled));
        assert!(!pool.cancel(id));

        assert!(result.get(Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_id_resolves_nothing() {
        let pool = RequestPool::new();
        assert!(!pool.complete(12345, response()));
        assert!(!pool.fail(12345, Error::Cancelled));
        assert!(!pool.cancel(12345));
    }

    #[tokio::test]
    async fn test_timeout_removes_slot() {
        let pool = RequestPool::new();
        let result = pool.register().unwrap();
        let id = result.id();

        let err = result.get(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(pool.pending(), 0);

        // A late response resolves nothing
        assert!(!pool.complete(id, response()));
    }

    #[tokio::test]
    async fn test_cancel_all_unblocks_waiters() {
        let pool = RequestPool::new();
        let results: Vec<_> = (0..8).map(|_| pool.register().unwrap()).collect();
        assert_eq!(pool.pending(), 8);

        pool.cancel_all();
        assert_eq!(pool.pending(), 0);

        for result in results {
            let err = result.get(Duration::from_secs(1)).await.unwrap_err();
            assert!(matches!(err, Error::Cancelled));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_yields_distinct_ids() {
        let pool = RequestPool::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                (0..64)
                    .map(|_| pool.register().unwrap().id())
                    .collect::<Vec<u64>>()
            }));
        }

        let mut all = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(all.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(all.len(), 16 * 64);
    }
}
