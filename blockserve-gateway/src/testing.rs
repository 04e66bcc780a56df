//! Test doubles shared by unit tests

use blockserve_core::block::{BlockId, BlockMetadata, StoreRef};
use blockserve_core::error::{BlockServeError, Result};
use blockserve_storage::{BlockHandle, BlockStore, MemoryBlockStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Block store that counts every call and every handle close, and can be
/// told to fail reads of one block part way through
#[derive(Default)]
pub struct CountingBlockStore {
    inner: MemoryBlockStore,
    opens: AtomicUsize,
    stats: AtomicUsize,
    closes: Arc<AtomicUsize>,
    fail_read: Mutex<Option<(BlockId, usize)>>,
}

impl CountingBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryBlockStore {
        &self.inner
    }

    /// Reads of `id` fail once `after` bytes have been returned
    pub fn fail_reads(&self, id: BlockId, after: usize) {
        *self.fail_read.lock() = Some((id, after));
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> usize {
        self.stats.load(Ordering::SeqCst)
    }

    pub fn assert_balanced(&self) {
        assert_eq!(self.opens(), self.closes(), "open/close imbalance");
    }
}

impl BlockStore for CountingBlockStore {
    fn stat_block(&self, store: &StoreRef, id: &BlockId) -> Result<BlockMetadata> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        self.inner.stat_block(store, id)
    }

    fn open_block(&self, store: &StoreRef, id: &BlockId) -> Result<Box<dyn BlockHandle>> {
        let inner = self.inner.open_block(store, id)?;
        self.opens.fetch_add(1, Ordering::SeqCst);

        let fail_after = match &*self.fail_read.lock() {
            Some((failing, after)) if failing == id => Some(*after),
            _ => None,
        };
        Ok(Box::new(CountingHandle {
            inner,
            id: id.clone(),
            closes: Arc::clone(&self.closes),
            fail_after,
            read: 0,
        }))
    }
}

struct CountingHandle {
    inner: Box<dyn BlockHandle>,
    id: BlockId,
    closes: Arc<AtomicUsize>,
    fail_after: Option<usize>,
    read: usize,
}

impl BlockHandle for CountingHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let buf = match self.fail_after {
            Some(after) if self.read >= after => {
                return Err(BlockServeError::BlockRead {
                    block_id: self.id.to_string(),
                    reason: "injected failure".to_string(),
                })
            }
            Some(after) => {
                let allowed = (after - self.read).min(buf.len());
                &mut buf[..allowed]
            }
            None => buf,
        };
        let n = self.inner.read(buf)?;
        self.read += n;
        Ok(n)
    }

    fn metadata(&self) -> BlockMetadata {
        self.inner.metadata()
    }
}

impl Drop for CountingHandle {
    fn drop(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
