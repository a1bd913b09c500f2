//! On-disk record layouts
//!
//! 現行レイアウト（12バイト、LE）:
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 2    | value (i16)      |
//! | 2      | 1    | bound + root     |
//! | 3      | 1    | generation       |
//! | 4      | 2    | depth (i16)      |
//! | 6      | 2    | move (u16)       |
//! | 8      | 2    | static eval (i16)|
//! | 10     | 2    | eval margin (i16)|
//!
//! 旧レイアウト（24バイト）は同じ項目を i32 × 6 で持ち、世代を持たない。

use crate::types::{BoundFlags, Depth, Move, Value};

pub const RECORD_LEN: usize = 12;
pub const LEGACY_RECORD_LEN: usize = 24;

/// Current persisted record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistedRecord {
    pub value: Value,
    pub flags: BoundFlags,
    pub generation: u8,
    pub depth: Depth,
    pub mv: Move,
    pub eval: Value,
    pub margin: Value,
}

impl PersistedRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..2].copy_from_slice(&self.value.to_le_bytes());
        buf[2] = self.flags.bits();
        buf[3] = self.generation;
        buf[4..6].copy_from_slice(&self.depth.to_le_bytes());
        buf[6..8].copy_from_slice(&self.mv.to_u16().to_le_bytes());
        buf[8..10].copy_from_slice(&self.eval.to_le_bytes());
        buf[10..12].copy_from_slice(&self.margin.to_le_bytes());
        buf
    }

    /// `None` unless `bytes` is exactly one current-width record
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; RECORD_LEN] = bytes.try_into().ok()?;
        Some(Self {
            value: i16::from_le_bytes([bytes[0], bytes[1]]),
            flags: BoundFlags::from_bits(bytes[2]),
            generation: bytes[3],
            depth: i16::from_le_bytes([bytes[4], bytes[5]]),
            mv: Move::from_u16(u16::from_le_bytes([bytes[6], bytes[7]])),
            eval: i16::from_le_bytes([bytes[8], bytes[9]]),
            margin: i16::from_le_bytes([bytes[10], bytes[11]]),
        })
    }
}

/// Historic 24-byte record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LegacyRecord {
    pub value: i32,
    pub bound: i32,
    pub depth: i32,
    pub mv: i32,
    pub eval: i32,
    pub margin: i32,
}

impl LegacyRecord {
    pub fn encode(&self) -> [u8; LEGACY_RECORD_LEN] {
        let mut buf = [0u8; LEGACY_RECORD_LEN];
        let fields = [self.value, self.bound, self.depth, self.mv, self.eval, self.margin];
        for (chunk, field) in buf.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != LEGACY_RECORD_LEN {
            return None;
        }
        let mut fields = [0i32; 6];
        for (field, chunk) in fields.iter_mut().zip(bytes.chunks_exact(4)) {
            *field = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let [value, bound, depth, mv, eval, margin] = fields;
        Some(Self {
            value,
            bound,
            depth,
            mv,
            eval,
            margin,
        })
    }

    /// Convert to the current layout; wide fields are clamped, generation is 0
    pub fn to_current(&self) -> PersistedRecord {
        PersistedRecord {
            value: clamp_i16(self.value),
            flags: BoundFlags::from_bits(self.bound as u8),
            generation: 0,
            depth: clamp_i16(self.depth),
            mv: Move::from_u16(self.mv as u16),
            eval: clamp_i16(self.eval),
            margin: clamp_i16(self.margin),
        }
    }
}

#[inline]
fn clamp_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
