//! Error types for quorumdb

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Protocol Decode Errors ===
    #[error("Malformed element: {0}")]
    MalformedElement(String),

    #[error("Unexpected element {tag:#06x} in {context}")]
    UnexpectedElement { tag: u32, context: &'static str },

    #[error("Element nesting violation: {0}")]
    NestingViolation(String),

    #[error("Entry fields hash mismatch: declared {declared}, computed {computed}")]
    FieldsHashMismatch { declared: String, computed: String },

    #[error("Header signature check failed for signer {0}")]
    SignatureCheckFailed(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("Multiple headers in one entry")]
    DuplicateHeader,

    #[error("Entry has no header")]
    MissingHeader,

    #[error("Frame corrupted: {0}")]
    FrameCorrupted(String),

    // === Routing Errors ===
    #[error("No route to node {0}")]
    NoRoute(String),

    #[error("No target nodes found for {tablespace}.{table}")]
    NoTargetNodes { tablespace: String, table: String },

    #[error("Unknown table: {tablespace}.{table}")]
    UnknownTable { tablespace: String, table: String },

    // === Coordination Errors ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request pool too crowded")]
    PoolExhausted,

    #[error("Write errors from replicas: {0}")]
    ReplicaErrors(String),

    #[error("Write missed for newer record")]
    WriteMissed,

    #[error("Write failed for nodes {0}")]
    WriteFailed(String),

    #[error("No results found")]
    NoResults,

    #[error("Read failed on all replicas: {0}")]
    ReadFailed(String),

    // === Connection Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this error scoped to a single node's contribution within a
    /// fan-out (as opposed to aborting the whole operation)?
    pub fn is_node_scoped(&self) -> bool {
        matches!(
            self,
            Error::NoRoute(_) | Error::Timeout(_) | Error::Cancelled | Error::ConnectionFailed(_)
        )
    }

    /// Is this a protocol-level integrity failure (hash or signature)?
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::FieldsHashMismatch { .. }
                | Error::SignatureCheckFailed(_)
                | Error::FrameCorrupted(_)
        )
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
