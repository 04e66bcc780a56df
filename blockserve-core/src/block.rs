//! Block and manifest types
//!
//! Blocks are immutable, content-addressed byte sequences scoped to a store.
//! A file version is described by a [`FileManifest`]: its total size and the
//! ordered list of block IDs whose concatenation is the file content.

use crate::crypto::ContentHash;
use crate::error::{BlockServeError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a legacy SHA-1 block ID in hex characters
pub const SHA1_HEX_LEN: usize = 40;

/// Length of a Blake3 block ID in hex characters
pub const BLAKE3_HEX_LEN: usize = 64;

/// Content-addressed block identifier
///
/// Stored as lowercase hex. Both 40-character (SHA-1) and 64-character
/// (Blake3) digests are accepted so that older stores remain readable.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId(String);

impl BlockId {
    /// Parse and validate a hex block ID
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != SHA1_HEX_LEN && s.len() != BLAKE3_HEX_LEN {
            return Err(BlockServeError::InvalidBlockId(format!(
                "Invalid length: expected {} or {}, got {}",
                SHA1_HEX_LEN,
                BLAKE3_HEX_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlockServeError::InvalidBlockId(format!(
                "Non-hex character in {}",
                s
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Compute the block ID of some content
    pub fn for_content(data: &[u8]) -> Self {
        Self(ContentHash::compute(data).to_hex())
    }

    /// Hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fan-out prefix used by on-disk layouts
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    /// Remainder of the ID after [`BlockId::prefix`]
    pub fn suffix(&self) -> &str {
        &self.0[2..]
    }
}

impl TryFrom<String> for BlockId {
    type Error = BlockServeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", &self.0[..8])
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coordinates of the backing store a block belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreRef {
    /// Store (repository storage) identifier
    pub store_id: String,

    /// On-disk format version of the store
    pub version: u32,
}

impl StoreRef {
    pub fn new(store_id: impl Into<String>, version: u32) -> Self {
        Self {
            store_id: store_id.into(),
            version,
        }
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.store_id, self.version)
    }
}

/// Size-only view of a stored block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMetadata {
    /// Stored size in bytes (ciphertext size for encrypted stores)
    pub size: u64,
}

/// Ordered block list describing one file version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Plaintext size of the whole file
    pub file_size: u64,

    /// Block IDs in file order
    pub blocks: Vec<BlockId>,
}

impl FileManifest {
    pub fn new(file_size: u64, blocks: Vec<BlockId>) -> Self {
        Self { file_size, blocks }
    }

    /// Manifest of an empty file
    pub fn empty() -> Self {
        Self {
            file_size: 0,
            blocks: Vec::new(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether `id` is one of this file's blocks
    pub fn contains_block(&self, id: &BlockId) -> bool {
        self.blocks.iter().any(|b| b == id)
    }
}

/// A block's ID together with its stored bytes
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub data: Bytes,
}

impl Block {
    /// Content-address a block
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        Self {
            id: BlockId::for_content(&data),
            data,
        }
    }

    /// Verify the block's content still matches its ID
    pub fn verify(&self) -> bool {
        self.id.as_str().len() == BLAKE3_HEX_LEN && BlockId::for_content(&self.data) == self.id
    }
}

/// Split plaintext into fixed-size blocks and build the matching manifest
pub fn split_into_blocks(data: &[u8], block_size: usize) -> Result<(FileManifest, Vec<Block>)> {
    if block_size == 0 {
        return Err(BlockServeError::Manifest(
            "block size must be greater than zero".to_string(),
        ));
    }

    let blocks: Vec<Block> = data
        .chunks(block_size)
        .map(|chunk| Block::new(Bytes::copy_from_slice(chunk)))
        .collect();
    let manifest = FileManifest::new(
        data.len() as u64,
        blocks.iter().map(|b| b.id.clone()).collect(),
    );

    Ok((manifest, blocks))
}
