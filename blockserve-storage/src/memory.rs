//! In-memory block store
//!
//! Used for testing and development. Not persistent.

use crate::backend::{BlockHandle, BlockStore};
use blockserve_core::block::{split_into_blocks, BlockId, BlockMetadata, FileManifest, StoreRef};
use blockserve_core::error::{BlockServeError, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory block store
///
/// Blocks are keyed by store ID; the format version is not part of the key.
pub struct MemoryBlockStore {
    /// Block storage
    blocks: RwLock<HashMap<(String, BlockId), Bytes>>,

    /// Operation counters
    opens: AtomicU64,
    stats: AtomicU64,
}

impl MemoryBlockStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            opens: AtomicU64::new(0),
            stats: AtomicU64::new(0),
        }
    }

    /// Store a block under its content address
    pub fn put(&self, store: &StoreRef, data: impl Into<Bytes>) -> BlockId {
        let data: Bytes = data.into();
        let id = BlockId::for_content(&data);
        self.put_with_id(store, id.clone(), data);
        id
    }

    /// Store a block under an explicit ID (e.g. ciphertext addressed by its
    /// plaintext hash)
    pub fn put_with_id(&self, store: &StoreRef, id: BlockId, data: impl Into<Bytes>) {
        self.blocks
            .write()
            .insert((store.store_id.clone(), id), data.into());
    }

    /// Split a file into blocks, store them and return its manifest
    pub fn put_file(&self, store: &StoreRef, data: &[u8], block_size: usize) -> Result<FileManifest> {
        let (manifest, blocks) = split_into_blocks(data, block_size)?;
        let mut map = self.blocks.write();
        for block in blocks {
            map.insert((store.store_id.clone(), block.id), block.data);
        }
        Ok(manifest)
    }

    /// Number of `open_block` calls served
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Number of `stat_block` calls served
    pub fn stat_count(&self) -> u64 {
        self.stats.load(Ordering::Relaxed)
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    fn lookup(&self, store: &StoreRef, id: &BlockId) -> Result<Bytes> {
        self.blocks
            .read()
            .get(&(store.store_id.clone(), id.clone()))
            .cloned()
            .ok_or_else(|| BlockServeError::BlockNotFound {
                store_id: store.store_id.clone(),
                block_id: id.to_string(),
            })
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBlockStore {
    fn stat_block(&self, store: &StoreRef, id: &BlockId) -> Result<BlockMetadata> {
        self.stats.fetch_add(1, Ordering::Relaxed);
        let data = self.lookup(store, id)?;
        Ok(BlockMetadata {
            size: data.len() as u64,
        })
    }

    fn open_block(&self, store: &StoreRef, id: &BlockId) -> Result<Box<dyn BlockHandle>> {
        let data = self.lookup(store, id)?;
        self.opens.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryBlockHandle { data, pos: 0 }))
    }
}

/// Handle over a shared, immutable copy of the block bytes
struct MemoryBlockHandle {
    data: Bytes,
    pos: usize,
}

impl BlockHandle for MemoryBlockHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn metadata(&self) -> BlockMetadata {
        BlockMetadata {
            size: self.data.len() as u64,
        }
    }
}
