//! Forward parity generation
//!
//! Row parity is the plain XOR of the data columns. Diagonal parity follows
//! the EVENODD construction over the prime modulus M = 17: the symbol at row
//! r of data column c lands on diagonal (r + c) mod 17, diagonal 16 is the
//! imaginary row, and the column's cell on that imaginary diagonal (its
//! S-component) is broadcast into every diagonal slot instead. The parity of
//! checksums (POC) applies the identical permutation to the 16 checksum bits,
//! one bit per symbol row.
//!
//! The diagonal fold is shared with the reconstruction accumulator, which
//! runs the same map shifted into the rebuild position's frame.

use crate::error::{Error, Result};
use crate::sector::{
    cook_checksum, Sector, EVENODD_M, SYMBOLS_PER_SECTOR, WORDS_PER_SECTOR, WORDS_PER_SYMBOL,
};

// =============================================================================
// Diagonal Fold
// =============================================================================

/// The zero S-component, used by column 0 and by parity position 0
pub(crate) const ZERO_SYMBOL: [u32; WORDS_PER_SYMBOL] = [0; WORDS_PER_SYMBOL];

/// Fold one sector's symbols into a diagonal buffer
///
/// Row r targets slot (r + offset) mod 17. The slot with no physical cell
/// (the one the imaginary row redirects to, offset - 1 mod 17) receives only
/// the S-component; every other slot receives its cell XOR the S-component.
/// Returns how often the imaginary diagonal was crossed: zero when offset is
/// zero, otherwise exactly once.
pub(crate) fn fold_diagonal(
    dest: &mut [u32; WORDS_PER_SECTOR],
    payload: &[u32; WORDS_PER_SECTOR],
    s_component: &[u32; WORDS_PER_SYMBOL],
    offset: usize,
    assign: bool,
) -> u32 {
    let mut crossings = 0;
    for row in 0..SYMBOLS_PER_SECTOR {
        let target = (row + offset) % EVENODD_M;
        if target == EVENODD_M - 1 {
            crossings += 1;
            let redirect = (offset + EVENODD_M - 1) % EVENODD_M;
            let base = redirect * WORDS_PER_SYMBOL;
            for word in 0..WORDS_PER_SYMBOL {
                if assign {
                    dest[base + word] = s_component[word];
                } else {
                    dest[base + word] ^= s_component[word];
                }
            }
        } else {
            let base = target * WORDS_PER_SYMBOL;
            let src = row * WORDS_PER_SYMBOL;
            for word in 0..WORDS_PER_SYMBOL {
                let value = payload[src + word] ^ s_component[word];
                if assign {
                    dest[base + word] = value;
                } else {
                    dest[base + word] ^= value;
                }
            }
        }
    }
    crossings
}

/// Apply the diagonal permutation to the 16 checksum bits
///
/// Bit (15 - r) of the checksum moves to bit (15 - d) of the result, d being
/// row r's diagonal slot. The bit mapping to the imaginary diagonal is
/// dropped here; its information travels as the broadcast S-value instead.
pub(crate) fn mangle_checksum(csum: u16, offset: usize) -> u16 {
    let mut out = 0u16;
    for row in 0..SYMBOLS_PER_SECTOR {
        let target = (row + offset) % EVENODD_M;
        if target == EVENODD_M - 1 {
            continue;
        }
        if csum & (1 << (15 - row)) != 0 {
            out ^= 1 << (15 - target);
        }
    }
    out
}

/// 0xFFFF when the checksum's S-component bit is set, zero otherwise
pub(crate) fn checksum_s_value(csum: u16, s_row: usize) -> u16 {
    if csum & (1 << (15 - s_row)) != 0 {
        0xffff
    } else {
        0
    }
}

fn check_column(column: usize) -> Result<()> {
    if column >= SYMBOLS_PER_SECTOR {
        return Err(Error::PositionOutOfRange {
            position: column,
            width: SYMBOLS_PER_SECTOR,
        });
    }
    Ok(())
}

// =============================================================================
// Parity Generation
// =============================================================================

/// Start a parity pair from the first data column of a strip
///
/// Overwrites both parity payloads and POC slots. Returns the raw checksum
/// of the data payload, which callers fold into the sector's cooked crc.
pub fn init_parity(data: &Sector, column: usize, row: &mut Sector, diag: &mut Sector) -> Result<u32> {
    apply_parity(data, column, row, diag, true)
}

/// Fold a further data column into an existing parity pair
pub fn update_parity(
    data: &Sector,
    column: usize,
    row: &mut Sector,
    diag: &mut Sector,
) -> Result<u32> {
    apply_parity(data, column, row, diag, false)
}

fn apply_parity(
    data: &Sector,
    column: usize,
    row: &mut Sector,
    diag: &mut Sector,
    assign: bool,
) -> Result<u32> {
    check_column(column)?;

    // Row parity and the raw checksum in one pass.
    let mut checksum = 0u32;
    for i in 0..WORDS_PER_SECTOR {
        checksum ^= data.data[i];
        if assign {
            row.data[i] = data.data[i];
        } else {
            row.data[i] ^= data.data[i];
        }
    }

    // Diagonal parity. Column 0 has no S-component.
    let s_component = if column == 0 {
        ZERO_SYMBOL
    } else {
        data.symbol(SYMBOLS_PER_SECTOR - column)
    };
    fold_diagonal(&mut diag.data, &data.data, &s_component, column, assign);

    // Parity of checksums, stored in the parity sectors' lba_stamp slot.
    let s_value = if column == 0 {
        0
    } else {
        checksum_s_value(data.crc, SYMBOLS_PER_SECTOR - column)
    };
    let mangled = mangle_checksum(data.crc, column) ^ s_value;
    if assign {
        row.lba_stamp = data.crc;
        diag.lba_stamp = mangled;
    } else {
        row.lba_stamp ^= data.crc;
        diag.lba_stamp ^= mangled;
    }

    Ok(checksum)
}

/// Stamp a finished parity sector with its own cooked checksum
pub fn seal_parity(parity: &mut Sector, seed: u64) {
    parity.crc = cook_checksum(parity.calc_raw_checksum(), seed);
}

// =============================================================================
// Tests
// =============================================================================
