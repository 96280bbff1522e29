//! Composite error values
//!
//! Every recorded error is a base kind (what went wrong) plus a set of
//! qualifier flags (how it was found and whether it was repaired). The
//! numeric layout is load-bearing: packed values travel into event logs and
//! persisted error reports, so kinds keep their historical discriminants and
//! flags their historical bit positions.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Error Kind
// =============================================================================

/// Base classification of a sector error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorKind {
    /// Sentinel for an empty position mask; never recorded
    None = 0x00,
    SoftMediaErr = 0x01,
    HardMediaErr = 0x02,
    RndMediaErr = 0x03,
    /// Generic checksum mismatch with no more specific reason
    Crc = 0x04,
    KlondikeCrc = 0x05,
    DhCrc = 0x06,
    /// Checksum pattern written by RAID verify when it gave up on a sector
    RaidCrc = 0x07,
    /// Deliberate corrupt-checksum test pattern
    CorruptCrc = 0x08,
    WriteStamp = 0x09,
    TimeStamp = 0x0a,
    ShedStamp = 0x0b,
    /// Plain parity/data coherency mismatch
    Coherency = 0x16,
    /// Deliberate corrupt-data test pattern
    CorruptData = 0x17,
    /// N-way parity-of-checksum coherency mismatch
    NPocCoherency = 0x18,
    /// Parity-of-checksum coherency mismatch
    PocCoherency = 0x19,
    /// Coherency error that could not be attributed to any position
    CoherencyUnknown = 0x1a,
    /// Rebuild could not produce valid data for the position
    RebuildFailed = 0x1b,
    LbaStamp = 0x1c,
    SingleBitCrc = 0x1d,
    MultiBitCrc = 0x1e,
    RawMirrorBadMagic = 0x22,
    RawMirrorBadSeq = 0x23,
    /// Sector carries the client/verify invalidation pattern
    Invalidated = 0x25,
    CopyCrc = 0x29,
    PvdMetadata = 0x2a,
    /// Sentinel upper bound; a defect if it ever reaches the recorder
    Unknown = 0x2b,
}

impl ErrorKind {
    pub fn from_code(code: u8) -> Option<ErrorKind> {
        use ErrorKind::*;
        Some(match code {
            0x00 => None,
            0x01 => SoftMediaErr,
            0x02 => HardMediaErr,
            0x03 => RndMediaErr,
            0x04 => Crc,
            0x05 => KlondikeCrc,
            0x06 => DhCrc,
            0x07 => RaidCrc,
            0x08 => CorruptCrc,
            0x09 => WriteStamp,
            0x0a => TimeStamp,
            0x0b => ShedStamp,
            0x16 => Coherency,
            0x17 => CorruptData,
            0x18 => NPocCoherency,
            0x19 => PocCoherency,
            0x1a => CoherencyUnknown,
            0x1b => RebuildFailed,
            0x1c => LbaStamp,
            0x1d => SingleBitCrc,
            0x1e => MultiBitCrc,
            0x22 => RawMirrorBadMagic,
            0x23 => RawMirrorBadSeq,
            0x25 => Invalidated,
            0x29 => CopyCrc,
            0x2a => PvdMetadata,
            0x2b => Unknown,
            _ => return Option::None,
        })
    }

    /// Kinds strictly between the two sentinels may be recorded
    pub fn is_recordable(self) -> bool {
        self > ErrorKind::None && self < ErrorKind::Unknown
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::None => "none",
            ErrorKind::SoftMediaErr => "soft media error",
            ErrorKind::HardMediaErr => "hard media error",
            ErrorKind::RndMediaErr => "random media error",
            ErrorKind::Crc => "checksum error",
            ErrorKind::KlondikeCrc => "klondike checksum error",
            ErrorKind::DhCrc => "dh checksum error",
            ErrorKind::RaidCrc => "raid-invalidated checksum",
            ErrorKind::CorruptCrc => "corrupt-checksum pattern",
            ErrorKind::WriteStamp => "write stamp error",
            ErrorKind::TimeStamp => "time stamp error",
            ErrorKind::ShedStamp => "shed stamp error",
            ErrorKind::Coherency => "coherency error",
            ErrorKind::CorruptData => "corrupt-data pattern",
            ErrorKind::NPocCoherency => "n-way poc coherency error",
            ErrorKind::PocCoherency => "poc coherency error",
            ErrorKind::CoherencyUnknown => "unattributable coherency error",
            ErrorKind::RebuildFailed => "rebuild failed",
            ErrorKind::LbaStamp => "lba stamp error",
            ErrorKind::SingleBitCrc => "single-bit checksum error",
            ErrorKind::MultiBitCrc => "multi-bit checksum error",
            ErrorKind::RawMirrorBadMagic => "raw mirror bad magic",
            ErrorKind::RawMirrorBadSeq => "raw mirror bad sequence",
            ErrorKind::Invalidated => "invalidated sector",
            ErrorKind::CopyCrc => "copy checksum error",
            ErrorKind::PvdMetadata => "pvd metadata error",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Error Flags
// =============================================================================

/// Qualifier flags carried alongside an [`ErrorKind`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorFlags(u16);

impl ErrorFlags {
    pub const EMPTY: ErrorFlags = ErrorFlags(0);
    /// Another position in the strip carried an invalidation pattern
    pub const OTHERS_INVALIDATED: ErrorFlags = ErrorFlags(0x0100);
    pub const UNMATCHED: ErrorFlags = ErrorFlags(0x0200);
    /// Position was rebuilt from data someone had invalidated
    pub const RB_INV_DATA: ErrorFlags = ErrorFlags(0x1000);
    /// Time stamp error caused by the initial (never-written) stamp
    pub const INITIAL_TS: ErrorFlags = ErrorFlags(0x2000);
    /// Position sat inside a zeroed extent
    pub const ZEROED: ErrorFlags = ErrorFlags(0x4000);
    /// Error was not repaired
    pub const UNCORRECTABLE: ErrorFlags = ErrorFlags(0x8000);

    /// Union of every defined flag bit
    pub const ALL: ErrorFlags = ErrorFlags(0xf300);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: ErrorFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ErrorFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for ErrorFlags {
    type Output = ErrorFlags;
    fn bitor(self, rhs: ErrorFlags) -> ErrorFlags {
        ErrorFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ErrorFlags {
    fn bitor_assign(&mut self, rhs: ErrorFlags) {
        self.0 |= rhs.0;
    }
}

// =============================================================================
// Composite Error
// =============================================================================

/// Base kind plus qualifier flags, the unit the recorder stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeError {
    pub kind: ErrorKind,
    pub flags: ErrorFlags,
}

impl CompositeError {
    pub const NONE: CompositeError = CompositeError {
        kind: ErrorKind::None,
        flags: ErrorFlags::EMPTY,
    };

    pub const fn new(kind: ErrorKind) -> Self {
        CompositeError {
            kind,
            flags: ErrorFlags::EMPTY,
        }
    }

    pub const fn with_flags(kind: ErrorKind, flags: ErrorFlags) -> Self {
        CompositeError { kind, flags }
    }

    /// Swap the base kind, keeping every flag
    pub fn rekind(self, kind: ErrorKind) -> Self {
        CompositeError { kind, flags: self.flags }
    }

    pub fn is_uncorrectable(self) -> bool {
        self.flags.contains(ErrorFlags::UNCORRECTABLE)
    }

    /// Packed wire value: kind in the low byte, flags in the high bits
    pub fn packed(self) -> u32 {
        self.kind as u32 | self.flags.bits() as u32
    }

    pub fn from_packed(value: u32) -> Option<CompositeError> {
        let kind = ErrorKind::from_code((value & 0xff) as u8)?;
        let flag_bits = (value as u16) & ErrorFlags::ALL.bits();
        // Bits outside the kind byte and the defined flags mean a mangled value.
        if value & !(0xff | ErrorFlags::ALL.bits() as u32) != 0 {
            return None;
        }
        Some(CompositeError {
            kind,
            flags: ErrorFlags(flag_bits),
        })
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flags.contains(ErrorFlags::UNCORRECTABLE) {
            write!(f, "uncorrectable {}", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
