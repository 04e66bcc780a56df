//! In-memory catalog
//!
//! Used for testing and development. Not persistent.

use async_trait::async_trait;
use blockserve_core::block::{FileManifest, StoreRef};
use blockserve_core::catalog::{Catalog, Grant, KeyMaterial, RepoInfo};
use blockserve_core::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

type ManifestKey = (String, u32, String);

/// In-memory catalog
#[derive(Default)]
pub struct MemoryCatalog {
    grants: RwLock<HashMap<String, Grant>>,
    repos: RwLock<HashMap<String, RepoInfo>>,
    manifests: RwLock<HashMap<ManifestKey, FileManifest>>,
    keys: RwLock<HashMap<(String, String), KeyMaterial>>,
}

impl MemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an access token
    pub fn insert_grant(&self, token: impl Into<String>, grant: Grant) {
        self.grants.write().insert(token.into(), grant);
    }

    /// Forget an access token
    pub fn revoke_grant(&self, token: &str) -> bool {
        self.grants.write().remove(token).is_some()
    }

    pub fn insert_repo(&self, repo: RepoInfo) {
        self.repos.write().insert(repo.repo_id.clone(), repo);
    }

    /// Register a file version's manifest
    pub fn insert_manifest(&self, store: &StoreRef, object_id: impl Into<String>, manifest: FileManifest) {
        self.manifests.write().insert(
            (store.store_id.clone(), store.version, object_id.into()),
            manifest,
        );
    }

    /// Record the key a user unlocked for an encrypted repository
    pub fn set_decrypt_key(&self, repo_id: impl Into<String>, username: impl Into<String>, key: KeyMaterial) {
        self.keys
            .write()
            .insert((repo_id.into(), username.into()), key);
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn resolve_grant(&self, token: &str) -> Result<Option<Grant>> {
        Ok(self.grants.read().get(token).cloned())
    }

    async fn get_repo(&self, repo_id: &str) -> Result<Option<RepoInfo>> {
        Ok(self.repos.read().get(repo_id).cloned())
    }

    async fn get_manifest(&self, store: &StoreRef, object_id: &str) -> Result<Option<FileManifest>> {
        let key = (store.store_id.clone(), store.version, object_id.to_string());
        Ok(self.manifests.read().get(&key).cloned())
    }

    async fn get_decrypt_key(&self, repo_id: &str, username: &str) -> Result<Option<KeyMaterial>> {
        let key = (repo_id.to_string(), username.to_string());
        Ok(self.keys.read().get(&key).cloned())
    }
}
