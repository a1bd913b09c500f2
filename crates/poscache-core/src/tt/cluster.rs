//! Cluster layout and the replacement policy shared by both tables

use super::constants::{CACHE_LINE_SIZE, CLUSTER_SIZE};
use super::entry::TTEntry;
use crate::types::Depth;

/// クラスター構造（4エントリ = 64バイト = 1キャッシュライン）
#[repr(C, align(64))]
pub(crate) struct Cluster {
    pub(crate) entries: [TTEntry; CLUSTER_SIZE],
}

const _: () = assert!(std::mem::size_of::<Cluster>() == CACHE_LINE_SIZE);

impl Cluster {
    pub(crate) const fn new() -> Self {
        Self {
            entries: [TTEntry::new(), TTEntry::new(), TTEntry::new(), TTEntry::new()],
        }
    }

    pub(crate) fn clear(&self) {
        for entry in &self.entries {
            entry.clear();
        }
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate `count` zeroed clusters (Vec keeps the 64-byte alignment)
pub(crate) fn allocate<T: Default>(count: usize) -> Box<[T]> {
    (0..count).map(|_| T::default()).collect()
}

/// Largest power-of-two element count whose footprint fits `mb_size` MiB (min 1 MiB)
pub(crate) fn count_for_megabytes(mb_size: usize, element_bytes: usize) -> usize {
    let bytes = mb_size.max(1) * 1024 * 1024;
    prev_power_of_two((bytes / element_bytes).max(1))
}

/// Round down to a power of two (minimum 1)
pub(crate) fn prev_power_of_two(n: usize) -> usize {
    if n <= 1 { 1 } else { 1 << (usize::BITS - 1 - n.leading_zeros()) }
}

/// What the replacement policy needs to know about a slot
#[derive(Clone, Copy, Debug)]
pub(crate) struct ReplaceView {
    pub(crate) generation: u8,
    pub(crate) depth: Depth,
    pub(crate) exact: bool,
}

/// Whether `slot` is a better victim than the current `candidate`.
///
/// 現在の世代の候補は守られにくく、現在世代・EXACT のスロットは守られやすい。
/// 同条件なら浅い方を追い出す。
#[inline]
pub(crate) fn prefers_victim(candidate: ReplaceView, slot: ReplaceView, current: u8) -> bool {
    let c1 = if candidate.generation == current { 2 } else { 0 };
    let c2 = if slot.generation == current || slot.exact { -2 } else { 0 };
    let c3 = if slot.depth < candidate.depth { 1 } else { 0 };
    c1 + c2 + c3 > 0
}

/// Index of the slot to overwrite when nothing matches and nothing is empty
pub(crate) fn pick_victim(views: &[ReplaceView; CLUSTER_SIZE], current: u8) -> usize {
    let mut replace = 0;
    for (i, view) in views.iter().enumerate().skip(1) {
        if prefers_victim(views[replace], *view, current) {
            replace = i;
        }
    }
    replace
}
