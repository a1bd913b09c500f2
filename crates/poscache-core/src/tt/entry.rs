//! Transposition table entry types and bit layout

use super::constants::*;
use crate::types::{Bound, BoundFlags, Depth, Move, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Values written by [`TranspositionTable::store`](super::TranspositionTable::store)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreParams {
    pub value: Value,
    pub flags: BoundFlags,
    pub depth: Depth,
    pub mv: Move,
    pub eval: Value,
    pub margin: Value,
}

impl StoreParams {
    pub fn new(value: Value, bound: Bound, depth: Depth, mv: Move) -> Self {
        Self {
            value,
            flags: BoundFlags::from(bound),
            depth,
            mv,
            eval: 0,
            margin: 0,
        }
    }

    /// Mark the store as a root result
    pub fn root(mut self) -> Self {
        self.flags = BoundFlags::new(self.flags.bound(), true);
        self
    }

    pub fn with_flags(mut self, flags: BoundFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_eval(mut self, eval: Value, margin: Value) -> Self {
        self.eval = eval;
        self.margin = margin;
        self
    }
}

/// 読み出したエントリのコピー
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TTData {
    pub value: Value,
    pub depth: Depth,
    pub mv: Move,
    pub flags: BoundFlags,
    pub eval: Value,
    pub margin: Value,
    pub generation: u8,
}

impl TTData {
    #[inline]
    pub fn bound(&self) -> Bound {
        self.flags.bound()
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.flags.is_root()
    }
}

/// High 32 bits of the key identify the entry inside its cluster.
///
/// 0 は空きスロットを意味するため、上位32bitが0のキーは1として扱う。
#[inline]
pub(crate) fn key_fragment(key: u64) -> u32 {
    match (key >> FRAGMENT_SHIFT) as u32 {
        0 => 1,
        fragment => fragment,
    }
}

/// XOR fold of the data word, mixed into the stored fragment
#[inline]
fn fold(data: u64) -> u32 {
    (data as u32) ^ ((data >> 32) as u32)
}

/// In-memory entry: two atomic words (16 bytes)
#[derive(Default)]
#[repr(C)]
pub(crate) struct TTEntry {
    key_word: AtomicU64,
    data: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<TTEntry>() == 16);

impl TTEntry {
    pub(crate) const fn new() -> Self {
        Self {
            key_word: AtomicU64::new(0),
            data: AtomicU64::new(0),
        }
    }

    /// Key word first (Acquire), then data
    #[inline]
    pub(crate) fn load(&self) -> EntrySnapshot {
        let key_word = self.key_word.load(Ordering::Acquire);
        let data = self.data.load(Ordering::Acquire);
        EntrySnapshot { key_word, data }
    }

    /// Data first, then the key word that publishes it
    #[inline]
    pub(crate) fn save(&self, fragment: u32, params: &StoreParams, generation: u8) {
        let data = pack_data(params);
        let verified = (fragment ^ fold(data)) as u64;
        let key_word = (verified << FRAGMENT_SHIFT)
            | ((params.mv.to_u16() as u64) << MOVE_SHIFT)
            | ((params.flags.bits() as u64) << FLAGS_SHIFT)
            | generation as u64;

        self.data.store(data, Ordering::Release);
        self.key_word.store(key_word, Ordering::Release);
    }

    /// 世代だけを更新する（失敗しても問題ない）
    #[inline]
    pub(crate) fn refresh_generation(&self, seen: &EntrySnapshot, generation: u8) -> bool {
        if seen.generation() == generation {
            return true;
        }
        let refreshed = (seen.key_word & !GEN_MASK) | generation as u64;
        self.key_word
            .compare_exchange(seen.key_word, refreshed, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn clear(&self) {
        self.key_word.store(0, Ordering::Relaxed);
        self.data.store(0, Ordering::Relaxed);
    }
}

#[inline]
fn pack_data(params: &StoreParams) -> u64 {
    (((params.value as u16) as u64) << VALUE_SHIFT)
        | (((params.depth as u16) as u64) << DEPTH_SHIFT)
        | (((params.eval as u16) as u64) << EVAL_SHIFT)
        | (((params.margin as u16) as u64) << MARGIN_SHIFT)
}

#[inline]
fn half(data: u64, shift: u32) -> i16 {
    ((data >> shift) & HALF_MASK) as u16 as i16
}

/// Plain copy of both words
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct EntrySnapshot {
    pub(crate) key_word: u64,
    pub(crate) data: u64,
}

impl EntrySnapshot {
    /// Fragment after undoing the XOR fold; a torn pair decodes to garbage
    #[inline]
    pub(crate) fn fragment(&self) -> u32 {
        ((self.key_word >> FRAGMENT_SHIFT) as u32) ^ fold(self.data)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.fragment() == 0
    }

    #[inline]
    pub(crate) fn generation(&self) -> u8 {
        (self.key_word & GEN_MASK) as u8
    }

    #[inline]
    pub(crate) fn flags(&self) -> BoundFlags {
        BoundFlags::from_bits(((self.key_word >> FLAGS_SHIFT) & FLAGS_MASK) as u8)
    }

    #[inline]
    pub(crate) fn mv(&self) -> Move {
        Move::from_u16(((self.key_word >> MOVE_SHIFT) & MOVE_MASK) as u16)
    }

    #[inline]
    pub(crate) fn depth(&self) -> Depth {
        half(self.data, DEPTH_SHIFT)
    }

    pub(crate) fn to_data(self) -> TTData {
        TTData {
            value: half(self.data, VALUE_SHIFT),
            depth: self.depth(),
            mv: self.mv(),
            flags: self.flags(),
            eval: half(self.data, EVAL_SHIFT),
            margin: half(self.data, MARGIN_SHIFT),
            generation: self.generation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_pack_unpack() {
        let entry = TTEntry::new();
        let params = StoreParams::new(-1234, Bound::Exact, 27, Move::from_u16(0x1abc))
            .root()
            .with_eval(-50, 7);
        entry.save(0xDEAD_BEEF, &params, 9);

        let snap = entry.load();
        assert_eq!(snap.fragment(), 0xDEAD_BEEF);
        let data = snap.to_data();
        assert_eq!(data.value, -1234);
        assert_eq!(data.depth, 27);
        assert_eq!(data.mv, Move::from_u16(0x1abc));
        assert_eq!(data.bound(), Bound::Exact);
        assert!(data.is_root());
        assert_eq!(data.eval, -50);
        assert_eq!(data.margin, 7);
        assert_eq!(data.generation, 9);
    }

    #[test]
    fn test_empty_entry() {
        let entry = TTEntry::new();
        assert!(entry.load().is_empty());
    }

    #[test]
    fn test_torn_pair_does_not_verify() {
        let a = TTEntry::new();
        let b = TTEntry::new();
        a.save(0x1111_1111, &StoreParams::new(10, Bound::Lower, 5, Move::NONE), 0);
        b.save(0x1111_1111, &StoreParams::new(-99, Bound::Upper, 12, Move::NONE), 0);

        // key word from one write, data from another
        let torn = EntrySnapshot {
            key_word: a.load().key_word,
            data: b.load().data,
        };
        assert_ne!(torn.fragment(), 0x1111_1111);
    }

    #[test]
    fn test_key_fragment_never_zero() {
        assert_eq!(key_fragment(0x0000_0000_FFFF_FFFF), 1);
        assert_eq!(key_fragment(0x1234_5678_0000_0000), 0x1234_5678);
    }

    #[test]
    fn test_refresh_generation() {
        let entry = TTEntry::new();
        entry.save(42, &StoreParams::new(1, Bound::Exact, 3, Move::NONE), 1);
        let snap = entry.load();
        assert!(entry.refresh_generation(&snap, 2));

        let after = entry.load();
        assert_eq!(after.generation(), 2);
        assert_eq!(after.fragment(), 42);
        assert_eq!(after.depth(), 3);

        // stale snapshot loses the CAS
        assert!(!entry.refresh_generation(&snap, 3));
    }
}
