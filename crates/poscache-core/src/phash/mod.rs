//! Persistent hash
//!
//! 置換表の EXACT な深い結果をプロセスを跨いで保持するストア。
//!
//! - トランザクション単位でバックエンドのファイルを開閉する
//! - 探索中に届いたメンテナンス要求はキューに積み、次のトランザクション開始時に実行する
//! - 公開APIはエラーを返さず、ログに出して既定値を返す（探索を止めない）
//!
//! バックエンドは型パラメータ `B: Backend` で差し替えられる。

pub mod backend;
pub mod hash_file;
pub mod maintenance;
pub mod merge;
pub mod migrate;
pub mod prune;
pub mod record;

pub use backend::{Backend, KeyCursor, OpenMode, Store};
pub use hash_file::{HashFileBackend, HashFileStore};
pub use maintenance::{MaintenanceQueue, MaintenanceRequest, SearchState};
pub use merge::MergeReport;
pub use migrate::MigrationOutcome;
pub use prune::PruneReport;
pub use record::{LegacyRecord, PersistedRecord};

use crate::config::CacheConfig;
use crate::error::{PhashError, PhashResult};
use crate::tt::{StagingTable, StoreParams, TTData, TranspositionTable};
use crate::types::{BoundFlags, Depth, Move};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use record::RECORD_LEN;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Depth written by `exercise` when random depths are off
const EXERCISE_FIXED_DEPTH: Depth = 25;
/// Spread of random depths written by `exercise`
const EXERCISE_DEPTH_SPREAD: Depth = 30;
const EXERCISE_SEED: u64 = 0x5048_5348_0000_0001;

/// Settings for the persistent store, derived from [`CacheConfig`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhashSettings {
    pub enabled: bool,
    pub store_path: PathBuf,
    pub merge_path: PathBuf,
    /// 刈り込みの目標サイズ
    pub target_size_bytes: u64,
    pub min_depth: Depth,
    pub archive_pruned: bool,
}

impl PhashSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.use_persistent_store,
            store_path: config.store_file_path.clone(),
            merge_path: config.store_merge_file_path.clone(),
            target_size_bytes: config.store_size_mb as u64 * 1024 * 1024,
            min_depth: config.store_min_depth,
            archive_pruned: config.archive_pruned,
        }
    }

    /// Side file receiving pruned records
    pub fn archive_path(&self) -> PathBuf {
        let mut name = OsString::from(self.store_path.as_os_str());
        name.push(".pruned");
        PathBuf::from(name)
    }
}

impl Default for PhashSettings {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Result of a probe; zero / NONE when the key is absent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhashProbe {
    pub depth: Depth,
    pub mv: Move,
    pub is_root: bool,
}

/// Outcome of copying staged entries into the store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub stored: usize,
    pub root: usize,
    pub examined: usize,
}

impl PersistedRecord {
    /// Build a record from table data
    pub fn from_tt(data: &TTData, flags: BoundFlags) -> Self {
        Self {
            value: data.value,
            flags,
            generation: data.generation,
            depth: data.depth,
            mv: data.mv,
            eval: data.eval,
            margin: data.margin,
        }
    }

    fn to_store_params(self) -> StoreParams {
        StoreParams {
            value: self.value,
            flags: self.flags,
            depth: self.depth,
            mv: self.mv,
            eval: self.eval,
            margin: self.margin,
        }
    }
}

struct Transaction<S> {
    store: S,
    mode: OpenMode,
}

/// Persistent store contract over a pluggable backend
pub struct PersistentHash<B: Backend> {
    backend: B,
    settings: PhashSettings,
    search: SearchState,
    queue: MaintenanceQueue,
    current: Option<Transaction<B::Store>>,
    /// 容量枯渇で永続化を停止した
    exhausted: bool,
}

impl<B: Backend> PersistentHash<B> {
    pub fn new(backend: B, settings: PhashSettings, search: SearchState) -> Self {
        Self {
            backend,
            settings,
            search,
            queue: MaintenanceQueue::new(),
            current: None,
            exhausted: false,
        }
    }

    pub fn settings(&self) -> &PhashSettings {
        &self.settings
    }

    /// Replace the settings; an open transaction is closed first
    pub fn configure(&mut self, settings: PhashSettings) {
        if settings != self.settings {
            self.end_transaction();
            self.settings = settings;
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Change the store's size bound; an open transaction is closed first
    pub fn set_capacity(&mut self, max_bytes: Option<u64>) {
        self.end_transaction();
        self.backend.set_capacity(max_bytes);
        log::debug!("Persistent Hash capacity set to {max_bytes:?} bytes");
    }

    pub fn search_state(&self) -> &SearchState {
        &self.search
    }

    /// Persistence is switched on and has not been shut off by exhaustion
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled && !self.exhausted
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn in_transaction(&self) -> bool {
        self.current.is_some()
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// 旧形式のファイルを変換し、保留中の要求を処理する
    pub fn init(&mut self) {
        if !self.is_enabled() {
            return;
        }
        for path in [self.settings.store_path.clone(), self.settings.merge_path.clone()] {
            if let Err(e) = migrate::migrate_file(&self.backend, &path) {
                log::warn!("Persistent Hash migration of {} failed: {e}", path.display());
            }
        }
        if self.begin_transaction(OpenMode::Read) {
            log::debug!("Persistent Hash opened with {} records", self.count());
            self.end_transaction();
        }
    }

    /// Final write transaction that compacts the store
    pub fn quit(&mut self) {
        if !self.begin_transaction(OpenMode::Write) {
            return;
        }
        if let Some(txn) = self.current.as_mut()
            && let Err(e) = txn.store.optimize()
        {
            log::warn!("Persistent Hash optimize failed: {e}");
        }
        self.end_transaction();
    }

    /// Open the store for one transaction.
    ///
    /// 既に開いている場合や無効な場合は何もしない。開く前に保留中の要求を処理する。
    /// 新たに開いた場合に `true` を返す。
    pub fn begin_transaction(&mut self, mode: OpenMode) -> bool {
        if self.current.is_some() || !self.is_enabled() {
            return false;
        }
        self.run_queued();

        match self.backend.open(&self.settings.store_path, mode) {
            Ok(Some(store)) => {
                self.current = Some(Transaction { store, mode });
                true
            }
            Ok(None) => {
                log::debug!(
                    "Persistent Hash {} not found; nothing to read",
                    self.settings.store_path.display()
                );
                false
            }
            Err(e) => {
                log::warn!(
                    "Persistent Hash {} could not be opened: {e}",
                    self.settings.store_path.display()
                );
                false
            }
        }
    }

    /// Commit (write) or release (read) and close the store
    pub fn end_transaction(&mut self) {
        if let Some(mut txn) = self.current.take()
            && txn.mode == OpenMode::Write
            && let Err(e) = txn.store.commit()
        {
            log::error!("Persistent Hash commit failed: {e}");
        }
    }

    /// Write a record; returns whether it was applied.
    ///
    /// 書き込みトランザクション中のみ有効。最小深さ未満、既存より浅い、
    /// ROOT を非ROOTで上書きする書き込みは拒否する。
    pub fn store(&mut self, key: u64, record: PersistedRecord) -> bool {
        if record.depth < self.settings.min_depth {
            return false;
        }
        let Some(txn) = self.current.as_mut() else {
            return false;
        };
        if txn.mode != OpenMode::Write {
            return false;
        }
        if let Some(existing) = read_record(&mut txn.store, key)
            && (record.depth < existing.depth
                || BoundFlags::blocks_overwrite(existing.flags, existing.depth, record.flags, record.depth))
        {
            return false;
        }

        if let Err(e) = self.apply_backpressure() {
            log::warn!("Persistent Hash backpressure failed: {e}");
        }
        let Some(txn) = self.current.as_mut() else {
            return false;
        };
        match txn.store.put(key, &record.encode()) {
            Ok(()) => true,
            Err(e @ PhashError::CapacityExhausted { .. }) => {
                self.shut_down_exhausted(&e);
                false
            }
            Err(e) => {
                log::warn!("Persistent Hash write of {key:#018x} failed: {e}");
                false
            }
        }
    }

    /// Depth, move and root flag stored for `key`
    pub fn probe(&mut self, key: u64) -> PhashProbe {
        self.get(key)
            .map(|record| PhashProbe {
                depth: record.depth,
                mv: record.mv,
                is_root: record.flags.is_root(),
            })
            .unwrap_or_default()
    }

    /// Full record for `key`
    pub fn get(&mut self, key: u64) -> Option<PersistedRecord> {
        let txn = self.current.as_mut()?;
        read_record(&mut txn.store, key)
    }

    pub fn request_clear(&mut self) {
        self.request(MaintenanceRequest::Clear);
    }

    pub fn request_prune(&mut self) {
        self.request(MaintenanceRequest::Prune);
    }

    /// Merge the store at `path` (the configured merge file when `None`)
    pub fn request_merge(&mut self, path: Option<PathBuf>) {
        let path = path.unwrap_or_else(|| self.settings.merge_path.clone());
        self.request(MaintenanceRequest::Merge(path));
    }

    fn request(&mut self, request: MaintenanceRequest) {
        if !self.is_enabled() {
            return;
        }
        if self.search.is_searching() || self.current.is_some() {
            log::debug!("Persistent Hash {request:?} deferred");
            self.queue.push(request);
        } else {
            self.run_request(&request);
        }
    }

    fn run_queued(&mut self) {
        for request in self.queue.drain_ordered() {
            if self.exhausted {
                break;
            }
            self.run_request(&request);
        }
    }

    /// Run one maintenance request in its own write transaction
    fn run_request(&mut self, request: &MaintenanceRequest) {
        let result = self.with_write_store(|this, store| match request {
            MaintenanceRequest::Clear => {
                store.clear()?;
                store.optimize()?;
                log::info!("Persistent Hash cleared.");
                Ok(())
            }
            MaintenanceRequest::Merge(path) => this.merge_from(store, path),
            MaintenanceRequest::Prune => {
                let mut archive = this.open_archive();
                prune::prune_to_size(
                    store,
                    this.settings.target_size_bytes,
                    this.settings.min_depth,
                    archive.as_mut(),
                )?;
                commit_archive(archive);
                Ok(())
            }
        });
        match result {
            Ok(()) => {}
            Err(e @ PhashError::CapacityExhausted { .. }) => self.shut_down_exhausted(&e),
            Err(e) => log::warn!("Persistent Hash {request:?} failed: {e}"),
        }
    }

    fn merge_from(&self, store: &mut B::Store, path: &Path) -> PhashResult<()> {
        let Some(mut source) = self.backend.open(path, OpenMode::Read)? else {
            log::info!("Persistent Hash merge file {} not found.", path.display());
            return Ok(());
        };
        let mut archive = self.open_archive();
        let merged = merge::merge_into(store, &mut source, self.settings.min_depth, archive.as_mut());
        commit_archive(archive);
        let report = merged?;
        log::info!(
            "Persistent Hash merged {} records (from {} total) from file {}.",
            report.merged,
            report.total,
            path.display()
        );
        Ok(())
    }

    fn with_write_store<F>(&self, f: F) -> PhashResult<()>
    where
        F: FnOnce(&Self, &mut B::Store) -> PhashResult<()>,
    {
        let Some(mut store) = self.backend.open(&self.settings.store_path, OpenMode::Write)? else {
            return Err(PhashError::Unavailable);
        };
        let result = f(self, &mut store);
        store.commit()?;
        result
    }

    fn open_archive(&self) -> Option<B::Store> {
        if !self.settings.archive_pruned {
            return None;
        }
        let path = self.settings.archive_path();
        match self.backend.open(&path, OpenMode::Write) {
            Ok(store) => store,
            Err(e) => {
                log::warn!("Persistent Hash archive {} unavailable: {e}", path.display());
                None
            }
        }
    }

    /// Prune a bounded store that is filling up
    fn apply_backpressure(&mut self) -> PhashResult<()> {
        let pressured = self
            .current
            .as_ref()
            .and_then(|txn| txn.store.utilization())
            .is_some_and(|u| u > prune::BACKPRESSURE_THRESHOLD);
        if !pressured {
            return Ok(());
        }
        let mut archive = self.open_archive();
        let min_depth = self.settings.min_depth;
        if let Some(txn) = self.current.as_mut() {
            prune::relieve_pressure(&mut txn.store, min_depth, archive.as_mut())?;
        }
        commit_archive(archive);
        Ok(())
    }

    fn shut_down_exhausted(&mut self, error: &PhashError) {
        log::error!("Persistent Hash disabled for the rest of this session: {error}");
        self.exhausted = true;
        self.queue = MaintenanceQueue::new();
        if let Some(mut txn) = self.current.take()
            && let Err(e) = txn.store.commit()
        {
            log::error!("Persistent Hash commit failed: {e}");
        }
    }

    /// Load every persisted record into `tt` (not re-staged); returns the count stored
    pub fn export_to_cache(&mut self, tt: &TranspositionTable) -> usize {
        let Some(txn) = self.current.as_mut() else {
            return 0;
        };
        let mut count = 0;
        for key in txn.store.cursor() {
            if let Some(record) = read_record(&mut txn.store, key)
                && tt.store(key, record.to_store_params(), false)
            {
                count += 1;
            }
        }
        count
    }

    /// Persist staged entries that still hold in `tt`, then clear `staging`.
    ///
    /// ステージングには完全なキーが残っているので、それで置換表を引き直し、
    /// EXACT かつ最小深さ以上であることを再確認してから書き込む。
    pub fn import_from_cache(&mut self, tt: &TranspositionTable, staging: &StagingTable) -> ImportReport {
        let mut report = ImportReport::default();
        let min_depth = self.settings.min_depth;
        for staged in staging.entries() {
            report.examined += 1;
            let Some(data) = tt.probe(staged.key) else {
                continue;
            };
            if !data.bound().is_exact() || data.depth < min_depth {
                continue;
            }
            if self.store(staged.key, PersistedRecord::from_tt(&data, staged.flags)) {
                report.stored += 1;
                if staged.flags.is_root() {
                    report.root += 1;
                }
            }
        }
        staging.clear();
        report
    }

    /// Records in the open store
    pub fn count(&self) -> usize {
        self.current.as_ref().map_or(0, |txn| txn.store.len())
    }

    /// Bytes used by the open store
    pub fn size_bytes(&self) -> u64 {
        self.current.as_ref().map_or(0, |txn| txn.store.size_bytes())
    }

    /// Stress writer: `iterations` records under random keys.
    ///
    /// 深さは `random_depth` なら最小深さから30の範囲でランダム、そうでなければ25。
    pub fn exercise(&mut self, iterations: usize, random_depth: bool) -> usize {
        let opened = self.begin_transaction(OpenMode::Write);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(EXERCISE_SEED);
        let min_depth = self.settings.min_depth;
        let mut written = 0;
        for _ in 0..iterations {
            let key: u64 = rng.random();
            let depth = if random_depth {
                min_depth + rng.random_range(0..EXERCISE_DEPTH_SPREAD)
            } else {
                EXERCISE_FIXED_DEPTH
            };
            let record = PersistedRecord {
                depth,
                ..Default::default()
            };
            if self.store(key, record) {
                written += 1;
            }
        }
        if opened {
            self.end_transaction();
        }
        log::info!("exercise done ({iterations} records, {written} written).");
        written
    }
}

impl<B: Backend> Drop for PersistentHash<B> {
    fn drop(&mut self) {
        self.end_transaction();
    }
}

fn read_record<S: Store>(store: &mut S, key: u64) -> Option<PersistedRecord> {
    let mut buf = [0u8; RECORD_LEN];
    match store.get(key, &mut buf) {
        Ok(Some(RECORD_LEN)) => PersistedRecord::decode(&buf),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Persistent Hash read of {key:#018x} failed: {e}");
            None
        }
    }
}

fn commit_archive<S: Store>(archive: Option<S>) {
    if let Some(mut archive) = archive
        && let Err(e) = archive.commit()
    {
        log::warn!("Persistent Hash archive commit failed: {e}");
    }
}

#[cfg(test)]
mod tests;
