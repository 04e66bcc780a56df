//! Application state
//!
//! The explicit context every handler receives: collaborators, settings and
//! the session id counter. Nothing here is global.

use crate::archive::{ArchiveProvider, ArchiveRegistry};
use crate::composer::Composer;
use crate::config::GatewayConfig;
use crate::usage::{TracingUsageSink, UsageSink};
use blockserve_core::catalog::Catalog;
use blockserve_core::error::Result;
use blockserve_storage::{BlockStore, FsBlockStore, MemoryBlockStore, MemoryCatalog, SledCatalog};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Application state shared across all handlers
pub struct AppState {
    pub blocks: Arc<dyn BlockStore>,
    pub catalog: Arc<dyn Catalog>,
    pub usage: Arc<dyn UsageSink>,
    pub archives: Arc<dyn ArchiveProvider>,
    pub composer: Composer,
    pub config: GatewayConfig,
    next_session: AtomicU64,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        blocks: Arc<dyn BlockStore>,
        catalog: Arc<dyn Catalog>,
        usage: Arc<dyn UsageSink>,
        archives: Arc<dyn ArchiveProvider>,
    ) -> Self {
        Self {
            blocks,
            catalog,
            usage,
            archives,
            composer: Composer::new(&config.streaming),
            config,
            next_session: AtomicU64::new(1),
        }
    }

    /// Build the state described by the configuration: an on-disk block
    /// layout with a sled catalog, or everything in memory
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let archives = Arc::new(ArchiveRegistry::new(config.archive.dir.clone()));
        info!(dir = ?config.archive.dir, "Serving archives");
        let usage = Arc::new(TracingUsageSink);

        if config.storage.memory_only {
            info!("Using in-memory block store and catalog");
            return Ok(Self::new(
                config,
                Arc::new(MemoryBlockStore::new()),
                Arc::new(MemoryCatalog::new()),
                usage,
                archives,
            ));
        }

        let storage = config.storage.to_storage_config();
        let blocks = FsBlockStore::open(&storage.blocks_dir)?;
        let catalog = SledCatalog::open(&storage.catalog_path)?;
        info!(
            blocks_dir = ?storage.blocks_dir,
            catalog_path = ?storage.catalog_path,
            "Opened block store and catalog"
        );

        Ok(Self::new(
            config,
            Arc::new(blocks),
            Arc::new(catalog),
            usage,
            archives,
        ))
    }

    /// Streaming buffer size in bytes
    pub fn buffer_size(&self) -> usize {
        self.config.streaming.buffer_size
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}
