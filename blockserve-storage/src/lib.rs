//! blockserve storage
//!
//! Provides the Block Store Adapter and catalog implementations:
//! - `BlockStore` / `BlockHandle` traits for stat and sequential block reads
//! - `FsBlockStore` for blocks laid out on local disk
//! - `MemoryBlockStore` for testing
//! - `MemoryCatalog` and `SledCatalog` for grants, repos, manifests and keys

pub mod backend;
pub mod catalog;
pub mod fs;
pub mod memory;
pub mod sled_backend;

pub use backend::{BlockHandle, BlockStore};
pub use catalog::MemoryCatalog;
pub use fs::FsBlockStore;
pub use memory::MemoryBlockStore;
pub use sled_backend::SledCatalog;

use std::path::PathBuf;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory of the block layout
    pub blocks_dir: PathBuf,

    /// Path of the sled catalog database
    pub catalog_path: PathBuf,

    /// Keep everything in memory (nothing touches disk)
    pub memory_only: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blocks_dir: PathBuf::from("./blockserve_data/blocks"),
            catalog_path: PathBuf::from("./blockserve_data/catalog"),
            memory_only: false,
        }
    }
}

impl StorageConfig {
    /// Create a new storage config rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            blocks_dir: root.join("blocks"),
            catalog_path: root.join("catalog"),
            memory_only: false,
        }
    }

    /// Use an in-memory store and catalog
    pub fn in_memory() -> Self {
        Self {
            memory_only: true,
            ..Default::default()
        }
    }
}
