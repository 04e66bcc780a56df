//! blockserve core library
//!
//! Core abstractions for the blockserve data plane.
//! This crate provides:
//! - Content-addressed block identifiers and file manifests
//! - Per-block AES-CBC decryption (incremental, finalized per block)
//! - Single byte-range parsing
//! - The catalog collaborator interface (grants, repos, manifests, keys)
//! - Common error handling

pub mod block;
pub mod catalog;
pub mod crypto;
pub mod error;
pub mod range;

pub use block::{split_into_blocks, Block, BlockId, BlockMetadata, FileManifest, StoreRef};
pub use catalog::{Catalog, Grant, KeyMaterial, Operation, RepoInfo};
pub use crypto::{BlockDecryptor, CipherKey, CipherVersion, ContentHash};
pub use error::{BlockServeError, Result};
pub use range::{parse_range, ByteRange, RangeError};

/// Size of one streaming read: the most plaintext-equivalent bytes pulled
/// from storage per writable event
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// Default block size used when splitting files
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024 * 1024; // 8 MB
