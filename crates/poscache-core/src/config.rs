//! Cache configuration via a TOML file
//!
//! オプション名はエンジンのオプション表記（`UsePersistentStore` など）に合わせる。
//!
//! # Example
//!
//! ```toml
//! UsePersistentStore = true
//! StoreFilePath = "poscache.hsh"
//! StoreMinDepth = 24
//! StoreSizeMB = 32
//! CacheSizeMB = 64
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use crate::types::Depth;

pub const STORE_SIZE_MB_RANGE: RangeInclusive<usize> = 4..=1024;
pub const STORE_MIN_DEPTH_RANGE: RangeInclusive<Depth> = 10..=99;
pub const CACHE_SIZE_MB_RANGE: RangeInclusive<usize> = 1..=8192;

/// Validation failures for [`CacheConfig`]
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} = {value} is out of range {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{0} must not be empty")]
    EmptyPath(&'static str),

    #[error("unknown option: {0}")]
    UnknownOption(String),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Options controlling the in-memory table and the persistent store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CacheConfig {
    /// 永続ハッシュを使うか
    pub use_persistent_store: bool,
    pub store_file_path: PathBuf,
    pub store_merge_file_path: PathBuf,
    /// 刈り込み後の目標ファイルサイズ
    #[serde(rename = "StoreSizeMB")]
    pub store_size_mb: usize,
    /// この深さ未満の結果は永続化しない
    pub store_min_depth: Depth,
    /// 置換表サイズ
    #[serde(rename = "CacheSizeMB")]
    pub cache_size_mb: usize,
    /// ストアの上限サイズ（0 = 無制限）
    #[serde(rename = "StoreMapSizeMB")]
    pub store_map_size_mb: usize,
    /// 刈り込んだレコードを `<store>.pruned` に退避する
    pub archive_pruned: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_persistent_store: false,
            store_file_path: PathBuf::from("poscache.hsh"),
            store_merge_file_path: PathBuf::from("poscache_merge.hsh"),
            store_size_mb: 32,
            store_min_depth: 24,
            cache_size_mb: 32,
            store_map_size_mb: 0,
            archive_pruned: false,
        }
    }
}

impl CacheConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse and validate TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: CacheConfig = toml::from_str(text).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }

    /// Check every numeric option against its range
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "StoreSizeMB",
            self.store_size_mb as i64,
            *STORE_SIZE_MB_RANGE.start() as i64,
            *STORE_SIZE_MB_RANGE.end() as i64,
        )?;
        check_range(
            "StoreMinDepth",
            self.store_min_depth as i64,
            *STORE_MIN_DEPTH_RANGE.start() as i64,
            *STORE_MIN_DEPTH_RANGE.end() as i64,
        )?;
        check_range(
            "CacheSizeMB",
            self.cache_size_mb as i64,
            *CACHE_SIZE_MB_RANGE.start() as i64,
            *CACHE_SIZE_MB_RANGE.end() as i64,
        )?;
        if self.store_file_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("StoreFilePath"));
        }
        if self.store_merge_file_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("StoreMergeFilePath"));
        }
        Ok(())
    }

    /// Set one option by name, as received from an engine's option command
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let mut next = self.clone();
        match name {
            "UsePersistentStore" => next.use_persistent_store = parse_value("UsePersistentStore", value)?,
            "StoreFilePath" => next.store_file_path = PathBuf::from(value),
            "StoreMergeFilePath" => next.store_merge_file_path = PathBuf::from(value),
            "StoreSizeMB" => next.store_size_mb = parse_value("StoreSizeMB", value)?,
            "StoreMinDepth" => next.store_min_depth = parse_value("StoreMinDepth", value)?,
            "CacheSizeMB" => next.cache_size_mb = parse_value("CacheSizeMB", value)?,
            "StoreMapSizeMB" => next.store_map_size_mb = parse_value("StoreMapSizeMB", value)?,
            "ArchivePruned" => next.archive_pruned = parse_value("ArchivePruned", value)?,
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Capacity of a bounded store in bytes, `None` when unbounded
    pub fn store_capacity_bytes(&self) -> Option<u64> {
        (self.store_map_size_mb > 0).then(|| self.store_map_size_mb as u64 * 1024 * 1024)
    }
}

fn check_range(name: &'static str, value: i64, min: i64, max: i64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}
