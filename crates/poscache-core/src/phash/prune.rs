//! Pruning and backpressure
//!
//! 目標サイズを超えたストアから、浅いレコードを順に削除して縮める。
//! 最小深さから始めて1ずつ閾値を上げ、目標を下回った時点で止める。

use super::backend::Store;
use super::record::{PersistedRecord, RECORD_LEN};
use crate::error::PhashResult;
use crate::types::Depth;

/// Deepest threshold tried before giving up
pub const MAX_PRUNE_DEPTH: Depth = 99;

/// Utilization above which a bounded store is pruned before a write
pub const BACKPRESSURE_THRESHOLD: f64 = 0.80;

/// Summary of one pruning run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub archived: usize,
    /// Deepest threshold applied, `None` when optimizing alone was enough
    pub last_depth: Option<Depth>,
    pub size_before: u64,
    pub size_after: u64,
}

impl PruneReport {
    pub fn reached_target(&self, target_bytes: u64) -> bool {
        self.size_after < target_bytes
    }
}

/// Delete every record with `depth <= threshold`.
///
/// 深さは符号なしとして比較するため、負の深さのレコードは削除されない。
/// 幅の合わないレコードには触れない。削除したレコードは `archive` にも書き込む。
pub fn prune_below<S: Store, A: Store>(
    store: &mut S,
    threshold: Depth,
    mut archive: Option<&mut A>,
) -> PhashResult<(usize, usize)> {
    let mut buf = [0u8; RECORD_LEN];
    let mut doomed = Vec::new();

    for key in store.cursor() {
        if store.get(key, &mut buf)? != Some(RECORD_LEN) {
            continue;
        }
        let Some(record) = PersistedRecord::decode(&buf) else {
            continue;
        };
        if (record.depth as u16) <= threshold as u16 {
            doomed.push((key, buf));
        }
    }

    let mut archived = 0;
    for (key, bytes) in &doomed {
        if let Some(archive) = archive.as_deref_mut() {
            match archive.put(*key, bytes) {
                Ok(()) => archived += 1,
                Err(e) => log::warn!("failed to archive pruned record {key:#018x}: {e}"),
            }
        }
        store.remove(*key)?;
    }
    Ok((doomed.len(), archived))
}

/// Shrink `store` below `target_bytes`
pub fn prune_to_size<S: Store, A: Store>(
    store: &mut S,
    target_bytes: u64,
    min_depth: Depth,
    mut archive: Option<&mut A>,
) -> PhashResult<PruneReport> {
    let mut report = PruneReport {
        size_before: store.size_bytes(),
        ..Default::default()
    };

    store.optimize()?;
    report.size_after = store.size_bytes();
    if report.reached_target(target_bytes) {
        log::info!(
            "Persistent Hash optimized [no pruning necessary]. Previous size: {} bytes; new size: {} bytes.",
            report.size_before,
            report.size_after
        );
        return Ok(report);
    }

    for depth in min_depth..=MAX_PRUNE_DEPTH {
        let (removed, archived) = prune_below(store, depth, archive.as_deref_mut())?;
        report.last_depth = Some(depth);
        if removed > 0 {
            store.optimize()?;
            report.size_after = store.size_bytes();
            report.removed += removed;
            report.archived += archived;
        }
        if report.reached_target(target_bytes) {
            let range = if depth == min_depth {
                format!("at depth {min_depth}")
            } else {
                format!("between depths {min_depth} and {depth}")
            };
            log::info!(
                "Persistent Hash pruned {range} [{} record(s)]. Previous size: {} bytes; new size: {} bytes.",
                report.removed,
                report.size_before,
                report.size_after
            );
            return Ok(report);
        }
    }

    log::warn!(
        "Persistent Hash still {} bytes after pruning to depth {MAX_PRUNE_DEPTH} (target {target_bytes})",
        report.size_after
    );
    Ok(report)
}

/// Relieve a bounded store before a write.
///
/// 使用率が閾値を超えている間、最小深さから閾値を上げながら刈り込む。
/// 返り値は削除したレコード数。
pub fn relieve_pressure<S: Store, A: Store>(
    store: &mut S,
    min_depth: Depth,
    mut archive: Option<&mut A>,
) -> PhashResult<usize> {
    let mut removed = 0;
    let mut depth = min_depth;
    while store.utilization().is_some_and(|u| u > BACKPRESSURE_THRESHOLD) && depth <= MAX_PRUNE_DEPTH {
        let (n, _) = prune_below(store, depth, archive.as_deref_mut())?;
        if n > 0 {
            store.optimize()?;
            removed += n;
        }
        depth += 1;
    }
    if removed > 0 {
        log::info!(
            "Persistent Hash backpressure removed {removed} record(s) up to depth {}; utilization {:.2}",
            depth - 1,
            store.utilization().unwrap_or(0.0)
        );
    }
    Ok(removed)
}
