//! Merge another store into the open one

use super::backend::Store;
use super::prune;
use super::record::{PersistedRecord, RECORD_LEN};
use crate::error::PhashResult;
use crate::types::{BoundFlags, Depth};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: usize,
    pub total: usize,
}

/// Copy qualifying records from `src` into `dst`.
///
/// 現行幅かつ `depth >= min_depth` のレコードのうち、既存より深く、
/// ROOT レコードを非ROOTで上書きしないものだけを書き込む。
/// 容量制限のある `dst` は書き込みごとに [`prune::relieve_pressure`] を通す。
pub fn merge_into<D: Store, S: Store, A: Store>(
    dst: &mut D,
    src: &mut S,
    min_depth: Depth,
    mut archive: Option<&mut A>,
) -> PhashResult<MergeReport> {
    let mut report = MergeReport::default();
    let mut src_buf = [0u8; RECORD_LEN];
    let mut dst_buf = [0u8; RECORD_LEN];

    for key in src.cursor() {
        report.total += 1;
        if src.get(key, &mut src_buf)? != Some(RECORD_LEN) {
            continue;
        }
        let Some(incoming) = PersistedRecord::decode(&src_buf) else {
            continue;
        };
        if incoming.depth < min_depth {
            continue;
        }

        let existing = match dst.get(key, &mut dst_buf)? {
            Some(RECORD_LEN) => PersistedRecord::decode(&dst_buf),
            _ => None,
        };
        let accepted = match existing {
            Some(existing) => {
                incoming.depth > existing.depth
                    && !BoundFlags::blocks_overwrite(existing.flags, existing.depth, incoming.flags, incoming.depth)
            }
            None => true,
        };
        if accepted {
            prune::relieve_pressure(dst, min_depth, archive.as_deref_mut())?;
            dst.put(key, &src_buf)?;
            report.merged += 1;
        }
    }
    Ok(report)
}
