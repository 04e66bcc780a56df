//! Block store trait
//!
//! Defines the interface the streaming data plane reads blocks through.
//! Reads are synchronous: a session performs one bounded read per step and
//! never holds a lock on a block across steps, so independent sessions can
//! read the same block concurrently.

use blockserve_core::block::{BlockId, BlockMetadata, StoreRef};
use blockserve_core::error::Result;

/// Readable handle on one open block.
///
/// Dropping the handle closes it.
pub trait BlockHandle: Send {
    /// Read up to `buf.len()` bytes from the current position.
    ///
    /// Returns `Ok(0)` once the block is exhausted.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Size of the block being read
    fn metadata(&self) -> BlockMetadata;
}

/// Content-addressed, read-only block access
pub trait BlockStore: Send + Sync {
    /// Metadata-only lookup; never reads block content
    fn stat_block(&self, store: &StoreRef, id: &BlockId) -> Result<BlockMetadata>;

    /// Open a block for sequential reading
    fn open_block(&self, store: &StoreRef, id: &BlockId) -> Result<Box<dyn BlockHandle>>;

    /// Check if a block exists
    fn block_exists(&self, store: &StoreRef, id: &BlockId) -> Result<bool> {
        match self.stat_block(store, id) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<T: BlockStore + ?Sized> BlockStore for std::sync::Arc<T> {
    fn stat_block(&self, store: &StoreRef, id: &BlockId) -> Result<BlockMetadata> {
        (**self).stat_block(store, id)
    }

    fn open_block(&self, store: &StoreRef, id: &BlockId) -> Result<Box<dyn BlockHandle>> {
        (**self).open_block(store, id)
    }
}
