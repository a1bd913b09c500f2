//! Maintenance scheduling
//!
//! 探索中に届いたクリア・マージ・刈り込み要求はキューに積み、次のトランザクション開始時に
//! 優先順（クリア > マージ > 刈り込み）でまとめて実行する。

use smallvec::SmallVec;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether a search is running; shared between the engine and the store
#[derive(Clone, Debug, Default)]
pub struct SearchState {
    searching: Arc<AtomicBool>,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_searching(&self, searching: bool) {
        self.searching.store(searching, Ordering::Release);
    }

    #[inline]
    pub fn is_searching(&self) -> bool {
        self.searching.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaintenanceRequest {
    Clear,
    Merge(PathBuf),
    Prune,
}

impl MaintenanceRequest {
    fn priority(&self) -> u8 {
        match self {
            MaintenanceRequest::Clear => 0,
            MaintenanceRequest::Merge(_) => 1,
            MaintenanceRequest::Prune => 2,
        }
    }
}

/// Deferred requests; duplicates collapse
#[derive(Debug, Default)]
pub struct MaintenanceQueue {
    pending: SmallVec<[MaintenanceRequest; 4]>,
}

impl MaintenanceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: MaintenanceRequest) {
        if !self.pending.contains(&request) {
            self.pending.push(request);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Take every request, clear first, then merges in arrival order, then prune
    pub fn drain_ordered(&mut self) -> SmallVec<[MaintenanceRequest; 4]> {
        let mut requests = std::mem::take(&mut self.pending);
        // stable sort keeps merge arrival order
        requests.sort_by_key(MaintenanceRequest::priority);
        requests
    }
}
