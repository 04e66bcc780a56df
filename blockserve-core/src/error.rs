//! Error types for blockserve
//!
//! Provides a unified error type for block access, decryption and catalog
//! lookups.

use thiserror::Error;

/// Result type alias for blockserve operations
pub type Result<T> = std::result::Result<T, BlockServeError>;

/// Unified error type for blockserve
#[derive(Error, Debug)]
pub enum BlockServeError {
    // ===== Block Errors =====
    #[error("Block not found: {store_id}:{block_id}")]
    BlockNotFound { store_id: String, block_id: String },

    #[error("Invalid block ID: {0}")]
    InvalidBlockId(String),

    #[error("Block read failed for {block_id}: {reason}")]
    BlockRead { block_id: String, reason: String },

    // ===== Manifest Errors =====
    #[error("Manifest error: {0}")]
    Manifest(String),

    // ===== Cryptography Errors =====
    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // ===== Storage Errors =====
    #[error("Storage error: {0}")]
    Storage(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BlockServeError {
    /// Whether the error means the requested object does not exist, as
    /// opposed to a failure while accessing it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockServeError::BlockNotFound { .. })
    }
}

impl From<bincode::Error> for BlockServeError {
    fn from(err: bincode::Error) -> Self {
        BlockServeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BlockServeError {
    fn from(err: serde_json::Error) -> Self {
        BlockServeError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for BlockServeError {
    fn from(err: hex::FromHexError) -> Self {
        BlockServeError::Decryption(format!("invalid hex key material: {}", err))
    }
}
