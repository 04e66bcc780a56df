//! Gateway configuration
//!
//! Loaded from an optional TOML file, then environment variables, then CLI
//! flags (highest priority).

use blockserve_core::STREAM_BUFFER_SIZE;
use blockserve_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub streaming: StreamingSettings,

    #[serde(default)]
    pub archive: ArchiveSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if one is given, otherwise start from defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.listen_addr.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "http.listen_addr cannot be empty".to_string(),
            ));
        }
        self.http.socket_addr()?;

        if self.streaming.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.buffer_size cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var("BLOCKSERVE_LISTEN_ADDR") {
            self.http.listen_addr = addr;
        }

        if let Ok(dir) = std::env::var("BLOCKSERVE_BLOCKS_DIR") {
            self.storage.blocks_dir = PathBuf::from(dir);
        }

        if let Ok(path) = std::env::var("BLOCKSERVE_CATALOG_PATH") {
            self.storage.catalog_path = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("BLOCKSERVE_ARCHIVE_DIR") {
            self.archive.dir = PathBuf::from(dir);
        }

        if let Ok(size) = std::env::var("BLOCKSERVE_BUFFER_SIZE") {
            if let Ok(size) = size.parse::<usize>() {
                self.streaming.buffer_size = size;
            }
        }

        self
    }

    /// Override config with CLI arguments
    pub fn with_overrides(
        mut self,
        listen_addr: Option<String>,
        blocks_dir: Option<PathBuf>,
        memory_only: bool,
        json_logs: bool,
    ) -> Self {
        if let Some(addr) = listen_addr {
            self.http.listen_addr = addr;
        }
        if let Some(dir) = blocks_dir {
            self.storage.blocks_dir = dir;
        }
        if memory_only {
            self.storage.memory_only = true;
        }
        if json_logs {
            self.logging.json = true;
        }
        self
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl HttpSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid listen address {:?}: {}",
                self.listen_addr, e
            ))
        })
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8082".to_string()
}

/// Block and catalog storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_blocks_dir")]
    pub blocks_dir: PathBuf,

    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Serve from in-memory stores (development only)
    #[serde(default)]
    pub memory_only: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            blocks_dir: default_blocks_dir(),
            catalog_path: default_catalog_path(),
            memory_only: false,
        }
    }
}

impl StorageSettings {
    /// Convert to blockserve_storage::StorageConfig
    pub fn to_storage_config(&self) -> StorageConfig {
        StorageConfig {
            blocks_dir: self.blocks_dir.clone(),
            catalog_path: self.catalog_path.clone(),
            memory_only: self.memory_only,
        }
    }
}

fn default_blocks_dir() -> PathBuf {
    PathBuf::from("./data/blocks")
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("./data/catalog")
}

/// Streaming and response settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingSettings {
    /// Most bytes read from storage per step
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// `Cache-Control: max-age` for freshly served content
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age_secs: u64,

    #[serde(default = "default_csp")]
    pub content_security_policy: String,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            cache_max_age_secs: default_cache_max_age(),
            content_security_policy: default_csp(),
        }
    }
}

fn default_buffer_size() -> usize {
    STREAM_BUFFER_SIZE
}

fn default_cache_max_age() -> u64 {
    3600
}

fn default_csp() -> String {
    "sandbox".to_string()
}

/// Pre-built archive location. Finished archives are looked up as
/// `<dir>/<token>.zip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    #[serde(default = "default_archive_dir")]
    pub dir: PathBuf,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            dir: default_archive_dir(),
        }
    }
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./data/zip")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
