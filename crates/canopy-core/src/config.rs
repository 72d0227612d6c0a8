//! Configuration system for Canopy.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CANOPY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/canopy/config.toml
//!   3. ~/.config/canopy/config.toml

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::MaxBlockSize;
use crate::wire::DataTag;

/// Everything a Canopy node reads from its config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanopyConfig {
    pub storage: StorageConfig,
    pub downloader: DownloaderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of the filesystem block store.
    pub block_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Largest physical block accepted or produced, in bytes.
    pub max_block_size: usize,
    /// Limits per payload kind. Kickoffs for unlisted tags are logged.
    pub tags: Vec<TagSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSettings {
    pub tag: DataTag,
    /// Largest payload accepted for this tag, in bytes.
    pub max_size: usize,
    /// Seconds a download may stay in flight before it is abandoned.
    pub download_timeout_secs: u64,
}

/// Runtime limits for one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagConfig {
    pub max_size: usize,
    pub download_timeout: Duration,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// 256 KiB blocks: 8191 links per interior block.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 262_144;

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            downloader: DownloaderConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            block_path: data_dir().join("blocks"),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            tags: vec![TagSettings {
                tag: DataTag::BlockBody,
                max_size: 64 * 1024 * 1024,
                download_timeout_secs: 300,
            }],
        }
    }
}

impl TagSettings {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("canopy")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("canopy")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid max block size {0}: need at least 39 bytes and (size - 2) % 32 >= 5")]
    InvalidMaxBlockSize(usize),
    #[error("tag {0} is configured more than once")]
    DuplicateTag(DataTag),
}

// ── Validation ────────────────────────────────────────────────────────────────

impl DownloaderConfig {
    /// The configured block size, if it can hold a blob.
    pub fn block_size(&self) -> Result<MaxBlockSize, ConfigError> {
        MaxBlockSize::new(self.max_block_size)
            .ok_or(ConfigError::InvalidMaxBlockSize(self.max_block_size))
    }

    /// Per-tag limits keyed by tag.
    pub fn tag_configs(&self) -> Result<HashMap<DataTag, TagConfig>, ConfigError> {
        let mut configs = HashMap::with_capacity(self.tags.len());
        for settings in &self.tags {
            let config = TagConfig {
                max_size: settings.max_size,
                download_timeout: settings.download_timeout(),
            };
            if configs.insert(settings.tag, config).is_some() {
                return Err(ConfigError::DuplicateTag(settings.tag));
            }
        }
        Ok(configs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.block_size()?;
        self.tag_configs()?;
        Ok(())
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CanopyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CanopyConfig::default()
        };
        config.apply_env_overrides();
        config.downloader.validate()?;
        Ok(config)
    }

    /// Where the config file is looked up.
    pub fn file_path() -> PathBuf {
        std::env::var("CANOPY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Create the config file with defaults unless it exists; returns its path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CanopyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CANOPY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CANOPY_STORAGE__BLOCK_PATH") {
            self.storage.block_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CANOPY_DOWNLOADER__MAX_BLOCK_SIZE") {
            if let Ok(n) = v.parse() {
                self.downloader.max_block_size = n;
            }
        }
    }
}
