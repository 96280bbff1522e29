//! Position bitmasks
//!
//! Every per-position bitmap in the crate (error board bitmaps, outstanding
//! error sets, region membership) is a [`PositionMask`]: a u16-backed bitset
//! over drive positions 0..16. The named accessors replace the raw shifting
//! and masking that otherwise leaks into every caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Not};

/// Maximum number of drive positions in a strip
pub const MAX_POSITIONS: usize = 16;

// =============================================================================
// PositionMask
// =============================================================================

/// A set of drive positions within a strip
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionMask(u16);

impl PositionMask {
    /// The empty set
    pub const EMPTY: PositionMask = PositionMask(0);

    /// Build a mask from its raw bit representation
    pub const fn from_bits(bits: u16) -> Self {
        PositionMask(bits)
    }

    /// Mask holding exactly one position
    ///
    /// Positions at or beyond [`MAX_POSITIONS`] yield the empty mask.
    pub const fn from_position(position: usize) -> Self {
        if position < MAX_POSITIONS {
            PositionMask(1 << position)
        } else {
            PositionMask(0)
        }
    }

    /// Raw bit representation
    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if the given position is in the set
    pub const fn contains(self, position: usize) -> bool {
        position < MAX_POSITIONS && self.0 & (1 << position) != 0
    }

    /// True if the two sets share any position
    pub const fn intersects(self, other: PositionMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Number of positions in the set
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn insert(&mut self, other: PositionMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PositionMask) {
        self.0 &= !other.0;
    }

    /// Iterate the positions in the set, ascending
    pub fn positions(self) -> impl Iterator<Item = usize> {
        (0..MAX_POSITIONS).filter(move |&p| self.contains(p))
    }
}

impl fmt::Display for PositionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl BitOr for PositionMask {
    type Output = PositionMask;
    fn bitor(self, rhs: PositionMask) -> PositionMask {
        PositionMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for PositionMask {
    fn bitor_assign(&mut self, rhs: PositionMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PositionMask {
    type Output = PositionMask;
    fn bitand(self, rhs: PositionMask) -> PositionMask {
        PositionMask(self.0 & rhs.0)
    }
}

impl BitAndAssign for PositionMask {
    fn bitand_assign(&mut self, rhs: PositionMask) {
        self.0 &= rhs.0;
    }
}

impl BitXor for PositionMask {
    type Output = PositionMask;
    fn bitxor(self, rhs: PositionMask) -> PositionMask {
        PositionMask(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for PositionMask {
    fn bitxor_assign(&mut self, rhs: PositionMask) {
        self.0 ^= rhs.0;
    }
}

impl Not for PositionMask {
    type Output = PositionMask;
    fn not(self) -> PositionMask {
        PositionMask(!self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
