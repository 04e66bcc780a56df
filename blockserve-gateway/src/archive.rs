//! Zip relay
//!
//! Archives are built elsewhere and left on local disk under a progress
//! token. The relay streams such a file sequentially and tells the archive
//! side to drop the token's progress record once the transfer is over,
//! whether it finished or not.

use crate::session::{Chunk, SessionError, TransferSource};
use bytes::Bytes;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const MULTI_DOWNLOAD_PREFIX: &str = "documents-export-";

/// Archive-building collaborator, seen from the data plane
pub trait ArchiveProvider: Send + Sync {
    /// Path of the finished archive for a progress token
    fn archive_path(&self, token: &str) -> Option<PathBuf>;

    /// Forget a token's progress record
    fn discard_progress(&self, token: &str);
}

/// Token-to-archive registry over a local directory.
///
/// The archive builder either registers a finished archive explicitly or
/// leaves it in the directory as `<token>.zip`. Discarding a token also
/// removes its archive file.
pub struct ArchiveRegistry {
    dir: PathBuf,
    archives: RwLock<HashMap<String, PathBuf>>,
}

impl ArchiveRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            archives: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a finished archive. Relative paths resolve against the
    /// registry directory.
    pub fn register(&self, token: impl Into<String>, path: impl AsRef<Path>) {
        let path = self.dir.join(path);
        self.archives.write().insert(token.into(), path);
    }

    pub fn contains(&self, token: &str) -> bool {
        self.archive_path(token).is_some()
    }

    /// `<dir>/<token>.zip`, if the token is a plain file name and the
    /// archive exists
    fn dropped_archive(&self, token: &str) -> Option<PathBuf> {
        let plain = !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !plain {
            return None;
        }
        let path = self.dir.join(format!("{}.zip", token));
        path.is_file().then_some(path)
    }
}

impl ArchiveProvider for ArchiveRegistry {
    fn archive_path(&self, token: &str) -> Option<PathBuf> {
        if let Some(path) = self.archives.read().get(token) {
            return Some(path.clone());
        }
        self.dropped_archive(token)
    }

    fn discard_progress(&self, token: &str) {
        let registered = self.archives.write().remove(token);
        let Some(path) = registered.or_else(|| self.dropped_archive(token)) else {
            return;
        };
        debug!(token, path = ?path, "Discarding archive progress");
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove archive");
            }
        }
    }
}

/// What an archive grant's object ID describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTarget {
    /// One directory, named after it
    Directory(String),
    /// A selection of files, named after the day of export
    FileList,
}

#[derive(Deserialize)]
struct ArchiveDescriptor {
    dir_name: Option<String>,
    file_list: Option<serde_json::Value>,
}

impl ArchiveTarget {
    /// Parse the JSON object ID of an archive grant
    pub fn parse(object_id: &str) -> Result<Self, serde_json::Error> {
        let descriptor: ArchiveDescriptor = serde_json::from_str(object_id)?;
        match (descriptor.dir_name, descriptor.file_list) {
            (Some(dir), _) => Ok(ArchiveTarget::Directory(dir)),
            (None, Some(_)) => Ok(ArchiveTarget::FileList),
            (None, None) => Err(serde::de::Error::custom(
                "neither dir_name nor file_list present",
            )),
        }
    }

    /// Download name without the `.zip` suffix
    pub fn archive_name(&self, today: NaiveDate) -> String {
        match self {
            ArchiveTarget::Directory(name) => name.clone(),
            ArchiveTarget::FileList => {
                format!("{}{}", MULTI_DOWNLOAD_PREFIX, today.format("%Y-%m-%d"))
            }
        }
    }
}

/// Sequential reader over one pre-built archive
pub struct ArchiveSource {
    file: Option<File>,
    size: u64,
    remaining: u64,
    token: String,
    provider: Arc<dyn ArchiveProvider>,
    discarded: bool,
    buf: Vec<u8>,
}

impl ArchiveSource {
    pub fn open(
        path: &Path,
        token: impl Into<String>,
        provider: Arc<dyn ArchiveProvider>,
        buffer_size: usize,
    ) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Some(file),
            size,
            remaining: size,
            token: token.into(),
            provider,
            discarded: false,
            buf: vec![0u8; buffer_size.max(1)],
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn read_some(&mut self, want: usize) -> Result<usize, SessionError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        loop {
            match file.read(&mut self.buf[..want]) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SessionError::Archive(e)),
            }
        }
    }
}

impl TransferSource for ArchiveSource {
    fn next_chunk(&mut self) -> Result<Chunk, SessionError> {
        if self.remaining == 0 {
            self.release();
            return Ok(Chunk::last(Bytes::new()));
        }

        let want = (self.remaining.min(self.buf.len() as u64)) as usize;
        let n = self.read_some(want)?;
        if n == 0 {
            return Err(SessionError::Truncated {
                missing: self.remaining,
            });
        }

        self.remaining -= n as u64;
        let data = Bytes::copy_from_slice(&self.buf[..n]);
        if self.remaining == 0 {
            self.release();
            return Ok(Chunk::last(data));
        }
        Ok(Chunk::more(data))
    }

    fn release(&mut self) {
        self.file = None;
        if !self.discarded {
            self.discarded = true;
            self.provider.discard_progress(&self.token);
        }
    }
}
