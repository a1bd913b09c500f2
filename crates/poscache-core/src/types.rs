//! Scalar types shared by the in-memory table and the persistent store

use std::fmt;

/// Search score / static evaluation (16-bit, as stored in every layout)
pub type Value = i16;

/// Search depth in plies
pub type Depth = i16;

/// 指し手ID（16bit）
///
/// 盤面の解釈は呼び出し側の責務。キャッシュは不透明な16bit値として扱う。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Move(u16);

impl Move {
    /// 指し手なし
    pub const NONE: Move = Move(0);

    #[inline]
    pub const fn from_u16(raw: u16) -> Self {
        Move(raw)
    }

    #[inline]
    pub const fn to_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "Move::NONE")
        } else {
            write!(f, "Move({:#06x})", self.0)
        }
    }
}

/// Bound classification of a search score
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Bound {
    #[default]
    None = 0,
    Upper = 1,
    Lower = 2,
    Exact = 3,
}

impl Bound {
    /// Decode from the low two bits
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & BoundFlags::BOUND_MASK {
            1 => Bound::Upper,
            2 => Bound::Lower,
            3 => Bound::Exact,
            _ => Bound::None,
        }
    }

    #[inline]
    pub const fn is_exact(self) -> bool {
        matches!(self, Bound::Exact)
    }
}

/// Bound + ROOT flag packed into one byte
///
/// bits 0-1: [`Bound`], bit 2: ROOT。ROOT 付きのレコードは
/// 同じ深さ以下の非ROOT書き込みで上書きされない。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BoundFlags(u8);

impl BoundFlags {
    pub const BOUND_MASK: u8 = 0b011;
    pub const ROOT: u8 = 0b100;
    const VALID_MASK: u8 = Self::BOUND_MASK | Self::ROOT;

    #[inline]
    pub const fn new(bound: Bound, root: bool) -> Self {
        let root_bit = if root { Self::ROOT } else { 0 };
        BoundFlags(bound as u8 | root_bit)
    }

    /// Decode a packed byte; unknown high bits are dropped
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        BoundFlags(bits & Self::VALID_MASK)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn bound(self) -> Bound {
        Bound::from_bits(self.0)
    }

    #[inline]
    pub const fn is_root(self) -> bool {
        self.0 & Self::ROOT != 0
    }

    #[inline]
    pub const fn is_exact(self) -> bool {
        self.bound().is_exact()
    }

    /// 非ROOTの書き込みが ROOT レコードを上書きしようとしているか
    ///
    /// `existing` が ROOT で、新しい書き込みが非ROOTかつ深さが既存以下なら拒否する。
    #[inline]
    pub const fn blocks_overwrite(
        existing: BoundFlags,
        existing_depth: Depth,
        incoming: BoundFlags,
        incoming_depth: Depth,
    ) -> bool {
        existing.is_root() && !incoming.is_root() && incoming_depth <= existing_depth
    }
}

impl From<Bound> for BoundFlags {
    fn from(bound: Bound) -> Self {
        BoundFlags::new(bound, false)
    }
}

impl fmt::Debug for BoundFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "{:?}|ROOT", self.bound())
        } else {
            write!(f, "{:?}", self.bound())
        }
    }
}
