//! Bulk transfer between the transposition table and the persistent store
//!
//! - 探索終了時: ステージングテーブルの候補を置換表で確認して永続化する（`to_phash`）
//! - 起動時・要求時: 永続化済みレコードを置換表へ読み込む（`from_phash`）

use crate::phash::{Backend, ImportReport, OpenMode, PersistentHash};
use crate::tt::{StagingTable, TranspositionTable};

/// Persist staged entries at the end of a search.
///
/// 永続化が無効でもステージングテーブルは空にする。
pub fn to_phash<B: Backend>(
    phash: &mut PersistentHash<B>,
    tt: &TranspositionTable,
    staging: &StagingTable,
) -> ImportReport {
    if !phash.is_enabled() {
        staging.clear();
        return ImportReport::default();
    }

    #[cfg(feature = "diagnostics")]
    let started = std::time::Instant::now();

    let opened = phash.begin_transaction(OpenMode::Write);
    let report = phash.import_from_cache(tt, staging);
    if opened {
        phash.end_transaction();
    }

    if report.examined > 0 {
        log::info!(
            "Persistent Hash stored {} record(s) ({} root) of {} examined.",
            report.stored,
            report.root,
            report.examined
        );
    }
    #[cfg(feature = "diagnostics")]
    log::debug!("to_phash took {:?}", started.elapsed());

    report
}

/// Load every persisted record into `tt`; returns the number loaded
pub fn from_phash<B: Backend>(phash: &mut PersistentHash<B>, tt: &TranspositionTable) -> usize {
    if !phash.is_enabled() {
        return 0;
    }
    let opened = phash.begin_transaction(OpenMode::Read);
    let loaded = phash.export_to_cache(tt);
    if opened {
        phash.end_transaction();
    }
    log::info!("Persistent Hash loaded {loaded} record(s) into the cache.");
    loaded
}
