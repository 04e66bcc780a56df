//! Sled-based catalog
//!
//! Persists access grants, repository records, file manifests and unlocked
//! key material. Values are bincode-encoded, one sled tree per record kind.

use async_trait::async_trait;
use blockserve_core::block::{FileManifest, StoreRef};
use blockserve_core::catalog::{Catalog, Grant, KeyMaterial, RepoInfo};
use blockserve_core::error::{BlockServeError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{debug, info};

const TREE_GRANTS: &str = "grants";
const TREE_REPOS: &str = "repos";
const TREE_MANIFESTS: &str = "manifests";
const TREE_KEYS: &str = "decrypt_keys";

/// Sled-based catalog
pub struct SledCatalog {
    db: sled::Db,
}

impl SledCatalog {
    /// Open or create a catalog
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = ?path.as_ref(), "Opening Sled catalog");

        let db = sled::open(path.as_ref())
            .map_err(|e| BlockServeError::Storage(format!("Failed to open Sled: {}", e)))?;

        Ok(Self { db })
    }

    /// Open an in-memory catalog (for testing)
    pub fn open_temporary() -> Result<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| BlockServeError::Storage(format!("Failed to open Sled: {}", e)))?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(name)
            .map_err(|e| BlockServeError::Storage(e.to_string()))
    }

    fn put_value<K: AsRef<[u8]>, V: Serialize>(&self, tree: &str, key: K, value: &V) -> Result<()> {
        let encoded = bincode::serialize(value)?;
        self.tree(tree)?
            .insert(key, encoded)
            .map_err(|e| BlockServeError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get_value<K: AsRef<[u8]>, V: DeserializeOwned>(&self, tree: &str, key: K) -> Result<Option<V>> {
        match self
            .tree(tree)?
            .get(key)
            .map_err(|e| BlockServeError::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn manifest_key(store: &StoreRef, object_id: &str) -> String {
        format!("{}/{}/{}", store.store_id, store.version, object_id)
    }

    fn key_material_key(repo_id: &str, username: &str) -> String {
        format!("{}/{}", repo_id, username)
    }

    // ===== Writers (used by provisioning tools and tests) =====

    pub fn put_grant(&self, token: &str, grant: &Grant) -> Result<()> {
        self.put_value(TREE_GRANTS, token, grant)?;
        debug!(repo_id = %grant.repo_id, operation = %grant.operation, "Stored grant");
        Ok(())
    }

    pub fn put_repo(&self, repo: &RepoInfo) -> Result<()> {
        self.put_value(TREE_REPOS, &repo.repo_id, repo)
    }

    pub fn put_manifest(&self, store: &StoreRef, object_id: &str, manifest: &FileManifest) -> Result<()> {
        self.put_value(TREE_MANIFESTS, Self::manifest_key(store, object_id), manifest)?;
        debug!(%store, object_id, blocks = manifest.block_count(), "Stored manifest");
        Ok(())
    }

    pub fn put_decrypt_key(&self, repo_id: &str, username: &str, key: &KeyMaterial) -> Result<()> {
        self.put_value(TREE_KEYS, Self::key_material_key(repo_id, username), key)
    }

    /// Remove an access token
    pub fn revoke_grant(&self, token: &str) -> Result<bool> {
        let removed = self
            .tree(TREE_GRANTS)?
            .remove(token)
            .map_err(|e| BlockServeError::Storage(e.to_string()))?;
        Ok(removed.is_some())
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| BlockServeError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for SledCatalog {
    async fn resolve_grant(&self, token: &str) -> Result<Option<Grant>> {
        self.get_value(TREE_GRANTS, token)
    }

    async fn get_repo(&self, repo_id: &str) -> Result<Option<RepoInfo>> {
        self.get_value(TREE_REPOS, repo_id)
    }

    async fn get_manifest(&self, store: &StoreRef, object_id: &str) -> Result<Option<FileManifest>> {
        self.get_value(TREE_MANIFESTS, Self::manifest_key(store, object_id))
    }

    async fn get_decrypt_key(&self, repo_id: &str, username: &str) -> Result<Option<KeyMaterial>> {
        self.get_value(TREE_KEYS, Self::key_material_key(repo_id, username))
    }
}
