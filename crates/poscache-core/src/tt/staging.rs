//! Staging table
//!
//! 永続化候補のエントリを完全な64bitキーで保持する置換表のミラー。
//! 置換表側は上位32bitしか持たないため、探索終了時に永続ハッシュへ
//! 書き出すにはここに残したフルキーが必要になる。
//! 書き出し（bridge）が終わるたびに一括でクリアされる。

use super::cluster::{ReplaceView, allocate, count_for_megabytes, pick_victim, prev_power_of_two};
use super::constants::*;
use crate::types::{BoundFlags, Depth, Move};
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU64, Ordering};

/// One staged entry: full key word (XOR-folded with data) + data word
#[derive(Default)]
#[repr(C)]
struct StagingSlot {
    key_word: AtomicU64,
    data: AtomicU64,
}

impl StagingSlot {
    #[inline]
    fn load(&self) -> StagedEntry {
        let key_word = self.key_word.load(Ordering::Acquire);
        let data = self.data.load(Ordering::Acquire);
        StagedEntry::decode(key_word ^ data, data)
    }

    #[inline]
    fn save(&self, entry: &StagedEntry) {
        let data = entry.encode();
        self.data.store(data, Ordering::Release);
        self.key_word.store(entry.key ^ data, Ordering::Release);
    }

    fn clear(&self) {
        self.key_word.store(0, Ordering::Relaxed);
        self.data.store(0, Ordering::Relaxed);
    }
}

#[repr(C, align(64))]
#[derive(Default)]
struct StagingCluster {
    slots: [StagingSlot; CLUSTER_SIZE],
}

const _: () = assert!(std::mem::size_of::<StagingCluster>() == CACHE_LINE_SIZE);

/// A staged entry as read back by the bridge
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StagedEntry {
    pub key: u64,
    pub flags: BoundFlags,
    pub depth: Depth,
    pub mv: Move,
    pub generation: u8,
}

impl StagedEntry {
    #[inline]
    fn encode(&self) -> u64 {
        (self.mv.to_u16() as u64)
            | ((self.flags.bits() as u64) << STAGING_FLAGS_SHIFT)
            | ((self.generation as u64) << STAGING_GEN_SHIFT)
            | (((self.depth as u16) as u64) << STAGING_DEPTH_SHIFT)
    }

    #[inline]
    fn decode(key: u64, data: u64) -> Self {
        Self {
            key,
            flags: BoundFlags::from_bits((data >> STAGING_FLAGS_SHIFT) as u8),
            depth: ((data >> STAGING_DEPTH_SHIFT) & HALF_MASK) as u16 as i16,
            mv: Move::from_u16((data & MOVE_MASK) as u16),
            generation: (data >> STAGING_GEN_SHIFT) as u8,
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.key == 0
    }

    #[inline]
    fn replace_view(&self) -> ReplaceView {
        ReplaceView {
            generation: self.generation,
            depth: self.depth,
            exact: self.flags.is_exact(),
        }
    }
}

/// Full-key mirror of persistence-worthy entries
pub struct StagingTable {
    clusters: Box<[StagingCluster]>,
    enabled: AtomicBool,
    min_depth: AtomicI16,
}

impl StagingTable {
    /// 新しいステージングテーブルを作成（サイズはMB単位、無効状態で開始）
    pub fn new(mb_size: usize) -> Self {
        Self::with_clusters(count_for_megabytes(mb_size, std::mem::size_of::<StagingCluster>()))
    }

    pub fn with_clusters(count: usize) -> Self {
        Self {
            clusters: allocate(prev_power_of_two(count)),
            enabled: AtomicBool::new(false),
            min_depth: AtomicI16::new(0),
        }
    }

    pub fn resize(&mut self, mb_size: usize) {
        self.resize_clusters(count_for_megabytes(mb_size, std::mem::size_of::<StagingCluster>()));
    }

    pub fn resize_clusters(&mut self, count: usize) {
        let count = prev_power_of_two(count);
        if count != self.clusters.len() {
            self.clusters = allocate(count);
        }
    }

    /// Persistence switch and depth threshold used by [`offer`](Self::offer)
    pub fn configure(&self, enabled: bool, min_depth: Depth) {
        self.min_depth.store(min_depth, Ordering::Relaxed);
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn min_depth(&self) -> Depth {
        self.min_depth.load(Ordering::Relaxed)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// 永続化の条件（EXACT・指し手あり・有効・深さ十分）を満たすか
    #[inline]
    pub fn qualifies(&self, flags: BoundFlags, depth: Depth, mv: Move) -> bool {
        flags.is_exact() && mv.is_some() && self.is_enabled() && depth >= self.min_depth()
    }

    /// Stage a key if it qualifies; returns whether it was staged
    pub fn offer(&self, key: u64, flags: BoundFlags, depth: Depth, mv: Move, generation: u8) -> bool {
        if key == 0 || !self.qualifies(flags, depth, mv) {
            return false;
        }
        let entry = StagedEntry {
            key,
            flags,
            depth,
            mv,
            generation,
        };
        let cluster = &self.clusters[key as usize & (self.clusters.len() - 1)];

        let mut views = [ReplaceView {
            generation: 0,
            depth: 0,
            exact: false,
        }; CLUSTER_SIZE];
        for (i, slot) in cluster.slots.iter().enumerate() {
            let current = slot.load();
            if current.key == key || current.is_empty() {
                slot.save(&entry);
                return true;
            }
            views[i] = current.replace_view();
        }
        cluster.slots[pick_victim(&views, generation)].save(&entry);
        true
    }

    /// Snapshot of every staged entry
    pub fn entries(&self) -> impl Iterator<Item = StagedEntry> + '_ {
        self.clusters
            .iter()
            .flat_map(|cluster| cluster.slots.iter())
            .map(StagingSlot::load)
            .filter(|entry| !entry.is_empty())
    }

    /// Number of staged entries
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    pub fn clear(&self) {
        for cluster in self.clusters.iter() {
            for slot in &cluster.slots {
                slot.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bound;

    fn exact() -> BoundFlags {
        BoundFlags::from(Bound::Exact)
    }

    fn enabled_table(clusters: usize, min_depth: Depth) -> StagingTable {
        let table = StagingTable::with_clusters(clusters);
        table.configure(true, min_depth);
        table
    }

    #[test]
    fn test_disabled_table_rejects() {
        let table = StagingTable::with_clusters(4);
        assert!(!table.offer(0xABCD, exact(), 30, Move::from_u16(1), 0));
        assert!(table.is_empty());
    }

    #[test]
    fn test_qualification() {
        let table = enabled_table(4, 10);
        assert!(!table.offer(1, BoundFlags::from(Bound::Lower), 20, Move::from_u16(1), 0));
        assert!(!table.offer(1, exact(), 20, Move::NONE, 0));
        assert!(!table.offer(1, exact(), 9, Move::from_u16(1), 0));
        assert!(!table.offer(0, exact(), 20, Move::from_u16(1), 0));
        assert!(table.offer(1, exact(), 10, Move::from_u16(1), 0));
        assert!(table.offer(2, BoundFlags::new(Bound::Exact, true), 10, Move::from_u16(1), 0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_full_key_preserved() {
        let table = enabled_table(4, 10);
        let key = 0xFEDC_BA98_7654_3210;
        table.offer(key, BoundFlags::new(Bound::Exact, true), 33, Move::from_u16(0x77), 3);

        let staged: Vec<_> = table.entries().collect();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].key, key);
        assert_eq!(staged[0].depth, 33);
        assert!(staged[0].flags.is_root());
        assert_eq!(staged[0].mv, Move::from_u16(0x77));
        assert_eq!(staged[0].generation, 3);
    }

    #[test]
    fn test_same_key_updates_in_place() {
        let table = enabled_table(4, 10);
        table.offer(0x10_0000_0001, exact(), 12, Move::from_u16(1), 0);
        table.offer(0x10_0000_0001, exact(), 15, Move::from_u16(2), 0);
        let staged: Vec<_> = table.entries().collect();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].depth, 15);
    }

    #[test]
    fn test_full_cluster_evicts() {
        let table = enabled_table(1, 10);
        for i in 1..=5u64 {
            assert!(table.offer(i << 32, exact(), 10 + i as Depth, Move::from_u16(1), 0));
        }
        assert_eq!(table.len(), CLUSTER_SIZE);
    }

    #[test]
    fn test_clear() {
        let table = enabled_table(4, 10);
        table.offer(7, exact(), 12, Move::from_u16(1), 0);
        table.clear();
        assert!(table.is_empty());
    }
}
