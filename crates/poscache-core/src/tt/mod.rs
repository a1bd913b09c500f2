//! Transposition table
//!
//! - Lock-free probe/store over 64-byte clusters of four entries
//! - Key fragment (high 32 bits) verified against an XOR fold of the data word,
//!   so a torn entry reads as a miss
//! - Generation-aware replacement
//! - Optional staging table that mirrors entries worth persisting
//!
//! クラスターインデックスはキーの下位ビット、クラスター内の照合は上位32bitで行う。

mod cluster;
pub mod constants;
mod entry;
mod staging;


pub use entry::{StoreParams, TTData};
pub use staging::{StagedEntry, StagingTable};

use cluster::{Cluster, ReplaceView, allocate, count_for_megabytes, pick_victim, prev_power_of_two};
use constants::{CLUSTER_SIZE, GENERATION_DELTA, HASHFULL_SAMPLE_CLUSTERS};
use entry::{EntrySnapshot, key_fragment};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// 置換表
pub struct TranspositionTable {
    /// クラスターの配列（要素数は2の冪）
    clusters: Box<[Cluster]>,
    /// 世代カウンター
    generation8: AtomicU8,
    /// 永続化候補のミラー
    staging: Option<Arc<StagingTable>>,
}

/// An occupied entry as seen by [`TranspositionTable::entries`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TTEntryView {
    pub cluster: usize,
    pub fragment: u32,
    pub data: TTData,
}

impl TranspositionTable {
    /// 新しい置換表を作成（サイズはMB単位）
    pub fn new(mb_size: usize) -> Self {
        let count = count_for_megabytes(mb_size, std::mem::size_of::<Cluster>());
        log::info!("TT init: size_mb={} clusters={}", mb_size.max(1), count);
        Self::with_clusters(count)
    }

    /// Table with an explicit cluster count (rounded down to a power of two)
    pub fn with_clusters(count: usize) -> Self {
        Self {
            clusters: allocate(prev_power_of_two(count)),
            generation8: AtomicU8::new(0),
            staging: None,
        }
    }

    /// サイズを変更（クラスター数が変わらなければ何もしない）
    pub fn resize(&mut self, mb_size: usize) {
        let count = count_for_megabytes(mb_size, std::mem::size_of::<Cluster>());
        if count != self.clusters.len() {
            log::info!("TT resize: size_mb={} clusters={}", mb_size.max(1), count);
        }
        self.resize_clusters(count);
    }

    pub fn resize_clusters(&mut self, count: usize) {
        let count = prev_power_of_two(count);
        if count != self.clusters.len() {
            self.clusters = allocate(count);
        }
    }

    /// クリア（世代もリセット）
    pub fn clear(&self) {
        self.generation8.store(0, Ordering::Relaxed);
        for cluster in self.clusters.iter() {
            cluster.clear();
        }
    }

    /// 新しい探索を開始（世代を進める）
    pub fn new_generation(&self) {
        self.generation8.fetch_add(GENERATION_DELTA, Ordering::Relaxed);
    }

    /// Alias of [`new_generation`](Self::new_generation)
    #[inline]
    pub fn new_search(&self) {
        self.new_generation();
    }

    /// 現在の世代を取得
    #[inline]
    pub fn generation(&self) -> u8 {
        self.generation8.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.clusters.len() * std::mem::size_of::<Cluster>()
    }

    /// Mirror persistence-worthy stores into `staging`
    pub fn attach_staging(&mut self, staging: Arc<StagingTable>) {
        self.staging = Some(staging);
    }

    pub fn detach_staging(&mut self) -> Option<Arc<StagingTable>> {
        self.staging.take()
    }

    pub fn staging(&self) -> Option<&Arc<StagingTable>> {
        self.staging.as_ref()
    }

    #[inline]
    fn cluster_index(&self, key: u64) -> usize {
        key as usize & (self.clusters.len() - 1)
    }

    #[inline]
    fn cluster(&self, key: u64) -> &Cluster {
        &self.clusters[self.cluster_index(key)]
    }

    /// 置換表を検索
    ///
    /// ヒットしたスロットの世代を現在の世代に更新する（CAS、失敗は無視）。
    pub fn probe(&self, key: u64) -> Option<TTData> {
        let fragment = key_fragment(key);
        let generation = self.generation();

        for entry in &self.cluster(key).entries {
            let snap = entry.load();
            if snap.fragment() == fragment {
                entry.refresh_generation(&snap, generation);
                let mut data = snap.to_data();
                data.generation = generation;
                return Some(data);
            }
        }
        None
    }

    /// エントリを書き込む
    ///
    /// 同じフラグメントのスロットを優先し、次に空きスロット、最後に置換候補を使う。
    /// 同じフラグメントのスロットは、浅い書き込みや ROOT を上書きする非ROOT書き込みでは
    /// 変更しない。実際に書き込んだ場合に `true` を返す。
    pub fn store(&self, key: u64, params: StoreParams, interested: bool) -> bool {
        let fragment = key_fragment(key);
        let generation = self.generation();
        let cluster = self.cluster(key);

        let mut params = params;
        let mut empty = None;
        let mut views = [ReplaceView {
            generation: 0,
            depth: 0,
            exact: false,
        }; CLUSTER_SIZE];

        for (i, entry) in cluster.entries.iter().enumerate() {
            let snap = entry.load();
            if snap.fragment() == fragment {
                if !accepts_update(&snap, &params) {
                    return false;
                }
                // Preserve any existing move
                if params.mv.is_none() {
                    params.mv = snap.mv();
                }
                return self.write_slot(key, i, fragment, &params, generation, interested);
            }
            if snap.is_empty() {
                empty.get_or_insert(i);
            }
            views[i] = ReplaceView {
                generation: snap.generation(),
                depth: snap.depth(),
                exact: snap.flags().is_exact(),
            };
        }

        let slot = empty.unwrap_or_else(|| pick_victim(&views, generation));
        self.write_slot(key, slot, fragment, &params, generation, interested)
    }

    fn write_slot(
        &self,
        key: u64,
        slot: usize,
        fragment: u32,
        params: &StoreParams,
        generation: u8,
        interested: bool,
    ) -> bool {
        let cluster = self.cluster(key);
        cluster.entries[slot].save(fragment, params, generation);

        #[cfg(feature = "diagnostics")]
        log::trace!(
            "TT store key={key:016x} cluster={} slot={slot} depth={} flags={:?} mv={:?}",
            self.cluster_index(key),
            params.depth,
            params.flags,
            params.mv
        );

        if interested && let Some(staging) = &self.staging {
            staging.offer(key, params.flags, params.depth, params.mv, generation);
        }
        true
    }

    /// 置換表の使用率を1000分率で返す（現在の世代のみ）
    pub fn hashfull(&self) -> u16 {
        let generation = self.generation();
        let sample = HASHFULL_SAMPLE_CLUSTERS.min(self.clusters.len());
        let occupied = self.clusters[..sample]
            .iter()
            .flat_map(|cluster| cluster.entries.iter())
            .map(|entry| entry.load())
            .filter(|snap| !snap.is_empty() && snap.generation() == generation)
            .count();
        (occupied * 1000 / (sample * CLUSTER_SIZE)) as u16
    }

    /// Iterate occupied entries (statistics and tests)
    pub fn entries(&self) -> impl Iterator<Item = TTEntryView> + '_ {
        self.clusters.iter().enumerate().flat_map(|(index, cluster)| {
            cluster.entries.iter().filter_map(move |entry| {
                let snap: EntrySnapshot = entry.load();
                (!snap.is_empty()).then(|| TTEntryView {
                    cluster: index,
                    fragment: snap.fragment(),
                    data: snap.to_data(),
                })
            })
        })
    }
}

/// Whether a store may overwrite the slot already holding its fragment
#[inline]
fn accepts_update(existing: &EntrySnapshot, params: &StoreParams) -> bool {
    let depth = existing.depth();
    params.depth >= depth
        && !crate::types::BoundFlags::blocks_overwrite(existing.flags(), depth, params.flags, params.depth)
}
