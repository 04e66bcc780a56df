//! Filesystem block store
//!
//! Blocks live under `<root>/<store_id>/<id[0..2]>/<id[2..]>`, one file per
//! block. Files are opened per read session and closed when the handle is
//! dropped; no locks are taken, so any number of sessions may read the same
//! block at once.

use crate::backend::{BlockHandle, BlockStore};
use blockserve_core::block::{BlockId, BlockMetadata, StoreRef};
use blockserve_core::error::{BlockServeError, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Block store backed by a directory tree
pub struct FsBlockStore {
    root: PathBuf,
}

impl FsBlockStore {
    /// Open (creating if needed) a block directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!(path = ?root, "Opening filesystem block store");

        fs::create_dir_all(&root).map_err(|e| {
            BlockServeError::Storage(format!("Failed to create {}: {}", root.display(), e))
        })?;

        Ok(Self { root })
    }

    /// Root directory of the layout
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a block file
    pub fn block_path(&self, store: &StoreRef, id: &BlockId) -> PathBuf {
        self.root
            .join(&store.store_id)
            .join(id.prefix())
            .join(id.suffix())
    }

    /// Write a block (used by tooling and tests; the data plane never writes)
    pub fn put_block(&self, store: &StoreRef, id: &BlockId, data: &[u8]) -> Result<()> {
        let path = self.block_path(store, id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp name first so readers never see a partial block
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        debug!(store_id = %store.store_id, block_id = %id, size = data.len(), "Stored block");
        Ok(())
    }

    fn map_open_error(&self, store: &StoreRef, id: &BlockId, err: io::Error) -> BlockServeError {
        if err.kind() == io::ErrorKind::NotFound {
            BlockServeError::BlockNotFound {
                store_id: store.store_id.clone(),
                block_id: id.to_string(),
            }
        } else {
            BlockServeError::BlockRead {
                block_id: id.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

impl BlockStore for FsBlockStore {
    fn stat_block(&self, store: &StoreRef, id: &BlockId) -> Result<BlockMetadata> {
        let meta = fs::metadata(self.block_path(store, id))
            .map_err(|e| self.map_open_error(store, id, e))?;
        Ok(BlockMetadata { size: meta.len() })
    }

    fn open_block(&self, store: &StoreRef, id: &BlockId) -> Result<Box<dyn BlockHandle>> {
        let file = File::open(self.block_path(store, id))
            .map_err(|e| self.map_open_error(store, id, e))?;
        let size = file
            .metadata()
            .map_err(|e| self.map_open_error(store, id, e))?
            .len();

        Ok(Box::new(FsBlockHandle {
            file,
            block_id: id.clone(),
            size,
        }))
    }
}

struct FsBlockHandle {
    file: File,
    block_id: BlockId,
    size: u64,
}

impl BlockHandle for FsBlockHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(BlockServeError::BlockRead {
                        block_id: self.block_id.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    fn metadata(&self) -> BlockMetadata {
        BlockMetadata { size: self.size }
    }
}
