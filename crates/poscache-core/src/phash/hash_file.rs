//! Single-file hash store
//!
//! File layout (little endian):
//!
//! ```text
//! header : "PHSH" | version u32
//! record : live u8 | key u64 | len u16 | payload[len]
//! ```
//!
//! 索引はオープン時にファイル全体を走査して再構築する。同じ長さの上書きはその場で、
//! 長さが変わる上書きは末尾に追記してから旧レコードを削除済みにする。
//! 削除済みレコードの領域は `optimize` で回収する。
//! 未知のマーカーを持つレコードは長さフィールドに従って読み飛ばし、削除済みとして扱う。
//! 切り詰めるのは末尾の不完全なレコードだけ。

use super::backend::{Backend, KeyCursor, OpenMode, Store};
use crate::error::{PhashError, PhashResult};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8; 4] = b"PHSH";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: u64 = 8;

const RECORD_HEADER_LEN: u64 = 1 + 8 + 2;
const LIVE: u8 = 1;
const DEAD: u8 = 0;

/// Backend producing [`HashFileStore`]s, optionally bounded to `max_bytes`
#[derive(Clone, Debug, Default)]
pub struct HashFileBackend {
    max_bytes: Option<u64>,
}

impl HashFileBackend {
    /// Unbounded store
    pub fn new() -> Self {
        Self { max_bytes: None }
    }

    /// Store that refuses to grow past `max_bytes`
    pub fn bounded(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
        }
    }

    pub fn with_capacity(max_bytes: Option<u64>) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }
}

impl Backend for HashFileBackend {
    type Store = HashFileStore;

    fn open(&self, path: &Path, mode: OpenMode) -> PhashResult<Option<HashFileStore>> {
        let file = match mode {
            OpenMode::Read => match File::open(path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            },
            OpenMode::Write => {
                OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?
            }
        };
        HashFileStore::load(file, path, mode, self.max_bytes).map(Some)
    }

    fn set_capacity(&mut self, max_bytes: Option<u64>) {
        self.max_bytes = max_bytes;
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: u64,
    len: u16,
}

/// An open single-file store
pub struct HashFileStore {
    file: File,
    path: PathBuf,
    mode: OpenMode,
    index: HashMap<u64, Slot>,
    /// End of the last complete record
    end: u64,
    max_bytes: Option<u64>,
}

impl HashFileStore {
    fn load(mut file: File, path: &Path, mode: OpenMode, max_bytes: Option<u64>) -> PhashResult<Self> {
        let file_len = file.metadata()?.len();
        let mut store = Self {
            file: file.try_clone()?,
            path: path.to_path_buf(),
            mode,
            index: HashMap::new(),
            end: 0,
            max_bytes,
        };

        if file_len == 0 {
            if mode == OpenMode::Write {
                store.write_header()?;
                store.end = HEADER_LEN;
            }
            return Ok(store);
        }

        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);
        store.read_header(&mut reader, file_len)?;
        store.end = store.scan(&mut reader)?;

        if store.end < file_len {
            log::warn!(
                "{}: ignoring {} trailing byte(s) after the last complete record",
                path.display(),
                file_len - store.end
            );
            if mode == OpenMode::Write {
                store.file.set_len(store.end)?;
            }
        }
        Ok(store)
    }

    fn read_header(&self, reader: &mut impl Read, file_len: u64) -> PhashResult<()> {
        if file_len < HEADER_LEN {
            return Err(self.bad_header("truncated header"));
        }
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(self.bad_header("bad magic"));
        }
        let mut u32b = [0u8; 4];
        reader.read_exact(&mut u32b)?;
        let version = u32::from_le_bytes(u32b);
        if version != FORMAT_VERSION {
            return Err(self.bad_header(&format!("unsupported version {version}")));
        }
        Ok(())
    }

    /// Rebuild the index; returns the offset just past the last complete record
    fn scan(&mut self, reader: &mut impl Read) -> PhashResult<u64> {
        let mut offset = HEADER_LEN;
        let mut head = [0u8; RECORD_HEADER_LEN as usize];
        let mut payload = Vec::new();

        loop {
            match read_full(reader, &mut head)? {
                0 => break,
                n if n < head.len() => break,
                _ => {}
            }
            let live = head[0];
            let key = u64::from_le_bytes([
                head[1], head[2], head[3], head[4], head[5], head[6], head[7], head[8],
            ]);
            let len = u16::from_le_bytes([head[9], head[10]]);

            payload.resize(len as usize, 0);
            if read_full(reader, &mut payload)? < payload.len() {
                break;
            }
            match live {
                LIVE => {
                    // a later copy supersedes an earlier one left by an interrupted rewrite
                    self.index.insert(key, Slot { offset, len });
                }
                DEAD => {}
                other => {
                    log::warn!(
                        "{}: unknown record marker {other:#04x} at offset {offset}; skipping record",
                        self.path.display()
                    );
                }
            }
            offset += RECORD_HEADER_LEN + len as u64;
        }
        Ok(offset)
    }

    fn bad_header(&self, reason: &str) -> PhashError {
        PhashError::BadHeader {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn write_header(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(MAGIC)?;
        self.file.write_all(&FORMAT_VERSION.to_le_bytes())
    }

    fn ensure_writable(&self) -> PhashResult<()> {
        match self.mode {
            OpenMode::Write => Ok(()),
            OpenMode::Read => Err(PhashError::ReadOnly(self.path.clone())),
        }
    }

    fn read_payload(&mut self, slot: Slot, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(slot.offset + RECORD_HEADER_LEN))?;
        self.file.read_exact(buf)
    }

    fn mark_dead(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&[DEAD])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Live keys ordered by file offset
    fn keys_in_file_order(&self) -> Vec<(u64, Slot)> {
        let mut slots: Vec<(u64, Slot)> = self.index.iter().map(|(k, s)| (*k, *s)).collect();
        slots.sort_unstable_by_key(|(_, slot)| slot.offset);
        slots
    }
}

impl Store for HashFileStore {
    fn get(&mut self, key: u64, buf: &mut [u8]) -> PhashResult<Option<usize>> {
        let Some(slot) = self.index.get(&key).copied() else {
            return Ok(None);
        };
        let n = buf.len().min(slot.len as usize);
        self.read_payload(slot, &mut buf[..n])?;
        Ok(Some(slot.len as usize))
    }

    fn put(&mut self, key: u64, bytes: &[u8]) -> PhashResult<()> {
        self.ensure_writable()?;
        let len = u16::try_from(bytes.len())
            .map_err(|_| PhashError::CorruptRecord { key, len: bytes.len() })?;

        let existing = self.index.get(&key).copied();
        if let Some(slot) = existing
            && slot.len == len
        {
            self.file.seek(SeekFrom::Start(slot.offset + RECORD_HEADER_LEN))?;
            self.file.write_all(bytes)?;
            return Ok(());
        }

        let needed = RECORD_HEADER_LEN + len as u64;
        if let Some(capacity) = self.max_bytes
            && self.end + needed > capacity
        {
            return Err(PhashError::CapacityExhausted {
                used: self.end,
                capacity,
            });
        }

        let mut record = Vec::with_capacity(needed as usize);
        record.push(LIVE);
        record.extend_from_slice(&key.to_le_bytes());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(bytes);

        let offset = self.end;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&record)?;
        self.end += needed;
        self.index.insert(key, Slot { offset, len });

        if let Some(old) = existing {
            self.mark_dead(old.offset)?;
        }
        Ok(())
    }

    fn remove(&mut self, key: u64) -> PhashResult<bool> {
        self.ensure_writable()?;
        match self.index.remove(&key) {
            Some(slot) => {
                self.mark_dead(slot.offset)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn cursor(&self) -> KeyCursor {
        KeyCursor::new(self.keys_in_file_order().into_iter().map(|(key, _)| key).collect())
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn size_bytes(&self) -> u64 {
        self.end
    }

    fn optimize(&mut self) -> PhashResult<()> {
        self.ensure_writable()?;
        let mut tmp_name = OsString::from(self.path.as_os_str());
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let tmp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(tmp_file.try_clone()?);
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;

        let mut new_index = HashMap::with_capacity(self.index.len());
        let mut offset = HEADER_LEN;
        let mut payload = Vec::new();
        for (key, slot) in self.keys_in_file_order() {
            payload.resize(slot.len as usize, 0);
            self.read_payload(slot, &mut payload)?;
            writer.write_all(&[LIVE])?;
            writer.write_all(&key.to_le_bytes())?;
            writer.write_all(&slot.len.to_le_bytes())?;
            writer.write_all(&payload)?;
            new_index.insert(key, Slot { offset, len: slot.len });
            offset += RECORD_HEADER_LEN + slot.len as u64;
        }
        writer.flush()?;
        drop(writer);
        tmp_file.sync_all()?;

        std::fs::rename(&tmp_path, &self.path)?;
        log::debug!(
            "{}: optimized {} -> {} bytes ({} records)",
            self.path.display(),
            self.end,
            offset,
            new_index.len()
        );
        self.file = tmp_file;
        self.index = new_index;
        self.end = offset;
        Ok(())
    }

    fn clear(&mut self) -> PhashResult<()> {
        self.ensure_writable()?;
        self.file.set_len(0)?;
        self.write_header()?;
        self.index.clear();
        self.end = HEADER_LEN;
        Ok(())
    }

    fn utilization(&self) -> Option<f64> {
        self.max_bytes.map(|capacity| self.end as f64 / capacity.max(1) as f64)
    }

    fn commit(&mut self) -> PhashResult<()> {
        if self.mode == OpenMode::Write {
            self.file.flush()?;
            self.file.sync_all()?;
        }
        Ok(())
    }
}

/// Read until `buf` is full or EOF; returns the bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
