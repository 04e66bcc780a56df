//! Catalog collaborator interface
//!
//! Access grants, repository records, file manifests and decrypt keys are
//! owned by services outside the data plane. The gateway only consumes them
//! through the [`Catalog`] trait.

use crate::block::{FileManifest, StoreRef};
use crate::crypto::CipherKey;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation an access grant was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    View,
    Download,
    DownloadLink,
    #[serde(rename = "downloadblks")]
    DownloadBlocks,
    DownloadDirLink,
    DownloadMultiLink,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::View => "view",
            Operation::Download => "download",
            Operation::DownloadLink => "download-link",
            Operation::DownloadBlocks => "downloadblks",
            Operation::DownloadDirLink => "download-dir-link",
            Operation::DownloadMultiLink => "download-multi-link",
        }
    }

    /// Parse the wire name of an operation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Operation::View),
            "download" => Some(Operation::Download),
            "download-link" => Some(Operation::DownloadLink),
            "downloadblks" => Some(Operation::DownloadBlocks),
            "download-dir-link" => Some(Operation::DownloadDirLink),
            "download-multi-link" => Some(Operation::DownloadMultiLink),
            _ => None,
        }
    }

    /// Operations that deliver a single file's content
    pub fn is_file_access(&self) -> bool {
        matches!(
            self,
            Operation::View | Operation::Download | Operation::DownloadLink
        )
    }

    /// Operations issued through a share link rather than a logged-in session
    pub fn is_link(&self) -> bool {
        matches!(
            self,
            Operation::DownloadLink | Operation::DownloadDirLink | Operation::DownloadMultiLink
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated, operation-scoped permission to fetch one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub repo_id: String,

    /// File ID for file and block access; a JSON archive description for
    /// archive access
    pub object_id: String,

    pub operation: Operation,

    pub username: String,
}

/// Repository record as needed by the data plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub repo_id: String,
    pub store_id: String,

    /// On-disk format version of the repository's store
    pub version: u32,

    pub encrypted: bool,

    /// Encryption scheme version (meaningful only when `encrypted`)
    pub enc_version: u32,
}

impl RepoInfo {
    pub fn store_ref(&self) -> StoreRef {
        StoreRef::new(self.store_id.clone(), self.version)
    }
}

/// Hex-encoded per-file key material handed out by the key manager
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub key_hex: String,
    pub iv_hex: String,
}

impl KeyMaterial {
    /// Decode into a cipher key for the repository's encryption version
    pub fn to_cipher_key(&self, enc_version: u32) -> Result<CipherKey> {
        CipherKey::from_hex(enc_version, &self.key_hex, &self.iv_hex)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED])")
    }
}

/// Lookups the data plane needs from the metadata services.
///
/// `Ok(None)` means the record does not exist; `Err` means the lookup itself
/// failed.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolve an access token into the grant it stands for
    async fn resolve_grant(&self, token: &str) -> Result<Option<Grant>>;

    /// Get a repository record
    async fn get_repo(&self, repo_id: &str) -> Result<Option<RepoInfo>>;

    /// Load the manifest of a file version
    async fn get_manifest(&self, store: &StoreRef, object_id: &str)
        -> Result<Option<FileManifest>>;

    /// Check whether a file version exists
    async fn object_exists(&self, store: &StoreRef, object_id: &str) -> Result<bool> {
        Ok(self.get_manifest(store, object_id).await?.is_some())
    }

    /// Get the decrypt key a user has unlocked for an encrypted repository
    async fn get_decrypt_key(&self, repo_id: &str, username: &str)
        -> Result<Option<KeyMaterial>>;
}
