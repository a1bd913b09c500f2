//! Format migration
//!
//! 旧レイアウト（24バイト）のレコードを持つファイルを現行レイアウトへ変換する。
//! 変換前に全レコードの幅を検査し、不明な幅が1つでもあればファイルには触れない。
//! 元のファイルは `<file>.old`（既に存在すれば `<file>_<16進UNIX時刻>.old`）に退避する。

use super::backend::{Backend, OpenMode, Store};
use super::record::{LEGACY_RECORD_LEN, LegacyRecord, PersistedRecord, RECORD_LEN};
use crate::error::{PhashError, PhashResult};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No file at the path
    Missing,
    /// Already in the current layout (or empty)
    Current,
    /// Converted; the original was moved to `backup`
    Converted { records: usize, backup: PathBuf },
}

/// Backup name for `path`: `<file>.old`, or a timestamped variant if taken
pub fn backup_path(path: &Path) -> PathBuf {
    let plain = with_suffix(path, ".old");
    if !plain.exists() {
        return plain;
    }
    let stamp = format!("_{:x}.old", chrono::Utc::now().timestamp());
    with_suffix(path, &stamp)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Convert the store at `path` to the current layout if needed
pub fn migrate_file<B: Backend>(backend: &B, path: &Path) -> PhashResult<MigrationOutcome> {
    let Some(mut source) = backend.open(path, OpenMode::Read)? else {
        return Ok(MigrationOutcome::Missing);
    };

    let mut buf = [0u8; LEGACY_RECORD_LEN];
    let mut cursor = source.cursor();
    let Some(first) = cursor.next() else {
        return Ok(MigrationOutcome::Current);
    };
    if source.get(first, &mut buf)? == Some(RECORD_LEN) {
        return Ok(MigrationOutcome::Current);
    }

    // 全件検査してから変換する
    for key in source.cursor() {
        match source.get(key, &mut buf)? {
            Some(RECORD_LEN) | Some(LEGACY_RECORD_LEN) => {}
            Some(len) => {
                log::warn!(
                    "Persistent Hash {}: error converting (records incorrectly sized)",
                    path.display()
                );
                return Err(PhashError::CorruptRecord { key, len });
            }
            None => {}
        }
    }
    drop(source);

    let backup = backup_path(path);
    std::fs::rename(path, &backup)?;

    let Some(mut old) = backend.open(&backup, OpenMode::Read)? else {
        return Err(PhashError::Unavailable);
    };
    let Some(mut fresh) = backend.open(path, OpenMode::Write)? else {
        return Err(PhashError::Unavailable);
    };

    let mut records = 0;
    for key in old.cursor() {
        let converted = match old.get(key, &mut buf)? {
            Some(LEGACY_RECORD_LEN) => LegacyRecord::decode(&buf).map(|legacy| legacy.to_current()),
            Some(RECORD_LEN) => PersistedRecord::decode(&buf[..RECORD_LEN]),
            _ => None,
        };
        if let Some(record) = converted {
            fresh.put(key, &record.encode())?;
            records += 1;
        }
    }
    fresh.commit()?;

    log::info!(
        "Persistent Hash {}: updated {records} records to new format (backup {})",
        path.display(),
        backup.display()
    );
    Ok(MigrationOutcome::Converted { records, backup })
}
