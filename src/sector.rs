//! Sector model and checksum arithmetic
//!
//! A sector is the unit every algorithm in this crate operates on: 512 bytes
//! of payload viewed as 16 symbol rows of 8 u32 words, followed by four u16
//! metadata words (checksum, LBA stamp, write stamp, time stamp). The
//! EVENODD geometry adds a 17th, imaginary, all-zero symbol row that never
//! exists on disk.
//!
//! Parity sectors reuse the LBA stamp slot to hold the parity of the data
//! sectors' checksums (POC), which is what lets a reconstruction attempt
//! cross-check its candidate without touching the dead drive.

use crate::error::{Error, Result};

// =============================================================================
// Geometry Constants
// =============================================================================

/// EVENODD prime modulus
pub const EVENODD_M: usize = 17;

/// Symbol rows physically present in a sector
pub const SYMBOLS_PER_SECTOR: usize = EVENODD_M - 1;

/// u32 words per symbol row
pub const WORDS_PER_SYMBOL: usize = 8;

/// u32 payload words per sector
pub const WORDS_PER_SECTOR: usize = SYMBOLS_PER_SECTOR * WORDS_PER_SYMBOL;

/// Salt folded into every cooked checksum so an all-zero sector does not
/// cook to zero
const CHECKSUM_SALT: u16 = 0x5eed;

/// First payload word of an invalidated sector
const INVALID_MAGIC: u32 = 0x5ec7_0bad;

// =============================================================================
// Sector
// =============================================================================

/// One 520-byte sector: 512 payload bytes plus four metadata words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    /// Payload, 16 symbol rows of 8 words each
    pub data: [u32; WORDS_PER_SECTOR],
    /// Cooked checksum of the payload
    pub crc: u16,
    /// LBA stamp on data sectors; parity of checksums on parity sectors
    pub lba_stamp: u16,
    pub write_stamp: u16,
    pub time_stamp: u16,
}

impl Default for Sector {
    fn default() -> Self {
        Sector {
            data: [0; WORDS_PER_SECTOR],
            crc: 0,
            lba_stamp: 0,
            write_stamp: 0,
            time_stamp: 0,
        }
    }
}

impl Sector {
    /// Copy out one symbol row
    pub fn symbol(&self, row: usize) -> [u32; WORDS_PER_SYMBOL] {
        let base = row * WORDS_PER_SYMBOL;
        let mut out = [0u32; WORDS_PER_SYMBOL];
        out.copy_from_slice(&self.data[base..base + WORDS_PER_SYMBOL]);
        out
    }

    /// Raw 32-bit XOR fold of the payload
    pub fn calc_raw_checksum(&self) -> u32 {
        calc_raw_checksum(&self.data)
    }

    /// Stamp the payload with the invalidation pattern and a deliberately
    /// wrong checksum
    pub fn invalidate(&mut self, reason: InvalidReason, seed: u64) {
        self.data = [0; WORDS_PER_SECTOR];
        self.data[0] = INVALID_MAGIC;
        self.data[1] = reason as u32;
        self.data[2] = seed as u32;
        self.data[3] = (seed >> 32) as u32;
        self.crc = !cook_checksum(self.calc_raw_checksum(), seed);
    }

    /// Recognise the invalidation pattern, if present
    pub fn invalidation(&self, seed: u64) -> Option<InvalidReason> {
        if self.data[0] != INVALID_MAGIC {
            return None;
        }
        if self.data[2] != seed as u32 || self.data[3] != (seed >> 32) as u32 {
            return None;
        }
        InvalidReason::from_code(self.data[1])
    }
}

/// Who invalidated a sector, recovered from the on-disk pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// A client asked for the sector to be invalidated
    Client = 1,
    /// RAID verify gave up on the sector
    Verify = 2,
    /// Test pattern: checksum deliberately corrupted
    CorruptCrc = 3,
    /// Test pattern: payload deliberately corrupted
    CorruptData = 4,
}

impl InvalidReason {
    fn from_code(code: u32) -> Option<InvalidReason> {
        match code {
            1 => Some(InvalidReason::Client),
            2 => Some(InvalidReason::Verify),
            3 => Some(InvalidReason::CorruptCrc),
            4 => Some(InvalidReason::CorruptData),
            _ => None,
        }
    }
}

// =============================================================================
// Checksum Pipeline
// =============================================================================

/// XOR-fold a payload into its raw 32-bit checksum
pub fn calc_raw_checksum(words: &[u32; WORDS_PER_SECTOR]) -> u32 {
    words.iter().fold(0, |acc, &w| acc ^ w)
}

/// Fold a raw checksum down to 16 bits
pub fn fold_checksum(raw: u32) -> u16 {
    ((raw >> 16) ^ raw) as u16
}

fn fold_seed(seed: u64) -> u16 {
    (seed ^ (seed >> 16) ^ (seed >> 32) ^ (seed >> 48)) as u16
}

/// Cook a raw checksum against its sector's LBA seed
///
/// XOR involution: cooking the same raw value with the same seed twice
/// yields zero, which is the identity every syndrome comparison in the
/// resolver depends on.
pub fn cook_checksum(raw: u32, seed: u64) -> u16 {
    fold_checksum(raw) ^ fold_seed(seed) ^ CHECKSUM_SALT
}

/// Checked variant for callers holding a position for diagnostics
pub fn verify_checksum(sector: &Sector, seed: u64, position: usize) -> Result<()> {
    let cooked = cook_checksum(sector.calc_raw_checksum(), seed);
    if cooked == sector.crc {
        Ok(())
    } else {
        Err(Error::ReconstructionChecksumMismatch {
            position,
            checksum: cooked,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
