//! Storage backend abstraction
//!
//! 永続ハッシュはキー（u64）→ バイト列の単純なKVSとしてバックエンドを使う。
//! バックエンドの選択は `PersistentHash<B>` の型パラメータで行う。

use crate::error::PhashResult;
use std::path::Path;

/// How a store is opened for one transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// 読み取り専用（ファイルが無ければ開かない）
    Read,
    /// 読み書き（ファイルが無ければ作成）
    Write,
}

/// Factory for stores
pub trait Backend {
    type Store: Store;

    /// Open the store at `path`; `Ok(None)` when the file is missing in read mode
    fn open(&self, path: &Path, mode: OpenMode) -> PhashResult<Option<Self::Store>>;

    /// Size bound for stores opened from now on; unbounded backends ignore it
    fn set_capacity(&mut self, _max_bytes: Option<u64>) {}
}

/// An open key/value store
pub trait Store {
    /// Copy the payload for `key` into `buf` (truncated to `buf.len()`);
    /// returns the full stored length
    fn get(&mut self, key: u64, buf: &mut [u8]) -> PhashResult<Option<usize>>;

    fn put(&mut self, key: u64, bytes: &[u8]) -> PhashResult<()>;

    /// Returns whether the key existed
    fn remove(&mut self, key: u64) -> PhashResult<bool>;

    /// Snapshot of the live keys in file order
    fn cursor(&self) -> KeyCursor;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes used on disk
    fn size_bytes(&self) -> u64;

    /// Compact the store, dropping dead space
    fn optimize(&mut self) -> PhashResult<()>;

    fn clear(&mut self) -> PhashResult<()>;

    /// Fill ratio of a bounded store, `None` when unbounded
    fn utilization(&self) -> Option<f64>;

    /// Make all writes durable
    fn commit(&mut self) -> PhashResult<()>;
}

/// Forward iterator over a key snapshot
#[derive(Debug)]
pub struct KeyCursor {
    keys: std::vec::IntoIter<u64>,
}

impl KeyCursor {
    pub fn new(keys: Vec<u64>) -> Self {
        Self {
            keys: keys.into_iter(),
        }
    }
}

impl Iterator for KeyCursor {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        self.keys.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

impl ExactSizeIterator for KeyCursor {}
