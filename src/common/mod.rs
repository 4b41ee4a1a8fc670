//! Shared infrastructure: errors, config, digests, partition hashing

pub mod config;
pub mod digest;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::{Config, FieldConfig, PeerConfig, TableConfig};
pub use digest::{Address, ContentDigest, DigestContext, Ed25519Scheme, Keypair, SignatureScheme};
pub use error::{Error, Result};
pub use hash::{partition_key, select_replicas, PartitionKey};
pub use utils::{display_list, timestamp_now_millis};
