//! Quorum coordination: arbiter, request pool, fan-out engine, healing
//!
//! The coordinator fans each client operation out to the replica set
//! owning its partition, applies the consistency arbiter over the
//! per-node outcomes, and schedules asynchronous read-repair.

pub mod arbiter;
pub mod fanout;
pub mod healing;
pub mod pool;

pub use arbiter::Arbiter;
pub use fanout::{Coordinator, NodeOutcome, Recollection, ResultMap, REQUEST_TIMEOUT};
pub use healing::{HealContext, HealReport, HealingEngine};
pub use pool::{CoordinatedResult, RequestPool, Resolution};
