//! Engine-side owner of the cache subsystems
//!
//! 置換表・ステージングテーブル・永続ハッシュ・探索状態をまとめて保持する。
//! グローバル変数は使わず、エンジンはこのコンテキストを1つ持つ。

use crate::bridge;
use crate::config::{CacheConfig, ConfigError};
use crate::phash::{Backend, HashFileBackend, ImportReport, PersistentHash, PhashSettings, SearchState};
use crate::tt::{StagingTable, TranspositionTable};
use std::sync::Arc;

pub struct CacheContext<B: Backend> {
    config: CacheConfig,
    tt: TranspositionTable,
    staging: Arc<StagingTable>,
    phash: PersistentHash<B>,
    search: SearchState,
}

impl CacheContext<HashFileBackend> {
    /// Context over the single-file store, bounded by `StoreMapSizeMB`
    pub fn with_file_store(config: CacheConfig) -> Self {
        let backend = HashFileBackend::with_capacity(config.store_capacity_bytes());
        Self::new(config, backend)
    }
}

impl<B: Backend> CacheContext<B> {
    /// Allocate the tables and initialize the persistent store
    pub fn new(config: CacheConfig, backend: B) -> Self {
        let search = SearchState::new();
        let staging = Arc::new(new_staging(&config));
        let mut tt = TranspositionTable::new(config.cache_size_mb);
        tt.attach_staging(Arc::clone(&staging));

        let mut phash = PersistentHash::new(backend, PhashSettings::from_config(&config), search.clone());
        phash.init();

        Self {
            config,
            tt,
            staging,
            phash,
            search,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn tt(&self) -> &TranspositionTable {
        &self.tt
    }

    pub fn staging(&self) -> &Arc<StagingTable> {
        &self.staging
    }

    pub fn phash(&self) -> &PersistentHash<B> {
        &self.phash
    }

    pub fn phash_mut(&mut self) -> &mut PersistentHash<B> {
        &mut self.phash
    }

    pub fn search_state(&self) -> &SearchState {
        &self.search
    }

    /// 探索開始: 世代を進め、メンテナンス要求を保留させる
    pub fn search_started(&self) {
        self.tt.new_generation();
        self.search.set_searching(true);
    }

    /// 探索終了: ステージングされた結果を永続化する
    pub fn search_finished(&mut self) -> ImportReport {
        self.search.set_searching(false);
        bridge::to_phash(&mut self.phash, &self.tt, &self.staging)
    }

    /// Load persisted records into the table
    pub fn load_persisted(&mut self) -> usize {
        bridge::from_phash(&mut self.phash, &self.tt)
    }

    /// Clear the in-memory tables
    pub fn clear_cache(&self) {
        self.tt.clear();
        self.staging.clear();
    }

    /// Apply a new configuration.
    ///
    /// 置換表サイズが変われば置換表とステージングを作り直し、
    /// 永続化の設定が変われば永続ハッシュを再初期化する。
    pub fn apply_config(&mut self, config: CacheConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if config == self.config {
            return Ok(());
        }

        if config.cache_size_mb != self.config.cache_size_mb {
            self.tt.resize(config.cache_size_mb);
            self.staging = Arc::new(new_staging(&config));
            self.tt.attach_staging(Arc::clone(&self.staging));
        } else {
            self.staging.configure(config.use_persistent_store, config.store_min_depth);
        }

        if config.store_map_size_mb != self.config.store_map_size_mb {
            self.phash.set_capacity(config.store_capacity_bytes());
        }

        let settings = PhashSettings::from_config(&config);
        let reinit = settings.enabled != self.phash.settings().enabled
            || settings.store_path != self.phash.settings().store_path
            || settings.merge_path != self.phash.settings().merge_path;
        self.phash.configure(settings);
        if reinit {
            self.phash.init();
        }

        self.config = config;
        Ok(())
    }

    /// Set one option by name and apply it
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let mut config = self.config.clone();
        config.set_option(name, value)?;
        self.apply_config(config)
    }

    /// Compact the store before exit
    pub fn shutdown(&mut self) {
        self.search.set_searching(false);
        self.phash.quit();
    }
}

fn new_staging(config: &CacheConfig) -> StagingTable {
    let staging = StagingTable::new(config.cache_size_mb);
    staging.configure(config.use_persistent_store, config.store_min_depth);
    staging
}
