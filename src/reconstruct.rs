//! Single-position reconstruction
//!
//! Rebuilds one lost position of a dual-parity strip by running two
//! independent recoveries at once: a row candidate (plain XOR of the
//! survivors and row parity) and a diagonal candidate (the EVENODD fold
//! shifted into the rebuild position's frame). Each candidate also carries a
//! checksum reconstructed from the parity of checksums, giving the resolver
//! four independent agreement signals:
//!
//! - do the two candidate payloads match,
//! - does the row candidate match its reconstructed checksum,
//! - does the diagonal candidate match its reconstructed checksum,
//! - do the two reconstructed checksums match each other.
//!
//! Those four bits, plus one bit per dead parity drive, form the case code
//! the resolver switches on. Agreement means the rebuilt sector is trusted;
//! partial agreement pins the blame on one parity drive, which is sacrificed
//! and rebuilt next; full disagreement leaves the position uncorrectable with
//! the evidence filed on the error board.

use crate::bitmask::PositionMask;
use crate::eboard::Eboard;
use crate::encode::{checksum_s_value, fold_diagonal, mangle_checksum, ZERO_SYMBOL};
use crate::error::{Error, Result};
use crate::sector::{
    calc_raw_checksum, cook_checksum, Sector, EVENODD_M, SYMBOLS_PER_SECTOR, WORDS_PER_SECTOR,
};
use tracing::debug;

/// Callers give up after this many passes over a strip
pub const MAX_RECONSTRUCT_PASSES: usize = 3;

// Agreement bits forming the resolver's case code.
const DATA_MATCHES: u16 = 0x8;
const RCSUM_MATCHES: u16 = 0x4;
const DCSUM_MATCHES: u16 = 0x2;
const CSUMS_MATCH: u16 = 0x1;
const DPARITY_DEAD: u16 = 0x10;
const RPARITY_DEAD: u16 = 0x20;

/// Which parity sector is being fed to the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParityKind {
    Row,
    Diagonal,
}

/// Where a reconstruction attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchState {
    /// Survivors are still being folded in
    Accumulating,
    /// Data was recovered but one parity must be regenerated
    ReconstructParity,
    Done,
}

/// Outcome of [`Scratch::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The row candidate now holds good data for the rebuild position
    Reconstructed,
    /// The position cannot be recovered; the error board says why
    Unrecoverable,
}

// =============================================================================
// Scratch
// =============================================================================

/// Working state for one reconstruction attempt
///
/// A `ReconstructParity` outcome sends the caller around again: reset the
/// candidates, rebuild the sacrificed parity, and resolve once more.
/// Callers bound that loop with [`MAX_RECONSTRUCT_PASSES`].
#[derive(Debug, Clone)]
pub struct Scratch {
    /// Row-recovery candidate; holds the final sector on success
    pub row_candidate: Sector,
    /// Diagonal-recovery candidate
    pub diag_candidate: Sector,
    row_poc: u16,
    diag_poc: u16,
    seed: u64,
    initialized: bool,
    state: ScratchState,
    fatal_mask: PositionMask,
}

impl Scratch {
    pub fn new(seed: u64) -> Self {
        Scratch {
            row_candidate: Sector::default(),
            diag_candidate: Sector::default(),
            row_poc: 0,
            diag_poc: 0,
            seed,
            initialized: false,
            state: ScratchState::Accumulating,
            fatal_mask: PositionMask::EMPTY,
        }
    }

    /// Clear the candidates for another pass, keeping the outstanding set
    pub fn reset(&mut self) {
        self.row_candidate = Sector::default();
        self.diag_candidate = Sector::default();
        self.row_poc = 0;
        self.diag_poc = 0;
        self.initialized = false;
        self.state = ScratchState::Accumulating;
    }

    pub fn state(&self) -> ScratchState {
        self.state
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Positions still carrying an unresolved fatal error
    pub fn fatal_mask(&self) -> PositionMask {
        self.fatal_mask
    }

    pub fn fatal_count(&self) -> u32 {
        self.fatal_mask.count()
    }

    pub fn add_error(&mut self, mask: PositionMask) {
        self.fatal_mask.insert(mask);
    }

    /// Retire a resolved error; refusing masks that were never outstanding
    /// catches drive-position mixups in the caller
    pub fn remove_error(&mut self, mask: PositionMask) -> Result<()> {
        if !self.fatal_mask.intersects(mask) {
            return Err(Error::NotOutstanding { mask: mask.bits() });
        }
        self.fatal_mask.remove(mask);
        Ok(())
    }

    // =========================================================================
    // Accumulation
    // =========================================================================

    /// Fold one surviving data column into both candidates
    ///
    /// `column` and `rebuild_pos` are logical EVENODD columns. Returns the
    /// raw checksum of the contributed payload so the caller can cross-check
    /// the survivor itself.
    pub fn accumulate_data(
        &mut self,
        data: &Sector,
        column: usize,
        rebuild_pos: usize,
    ) -> Result<u32> {
        check_column(column)?;
        check_column(rebuild_pos)?;
        if column == rebuild_pos {
            return Err(Error::ColumnIsRebuildTarget { column });
        }

        let assign = !self.initialized;
        let offset = (column + EVENODD_M - rebuild_pos) % EVENODD_M;
        let s_row = (rebuild_pos + EVENODD_M - column - 1) % EVENODD_M;
        let s_component = data.symbol(s_row);

        // Row candidate and the survivor's raw checksum in one pass.
        let mut checksum = 0u32;
        for i in 0..WORDS_PER_SECTOR {
            let word = data.data[i];
            checksum ^= word;
            if assign {
                self.row_candidate.data[i] = word;
            } else {
                self.row_candidate.data[i] ^= word;
            }
        }

        // Diagonal candidate. The imaginary diagonal must be crossed exactly
        // once per column; anything else means broken geometry.
        let crossings = fold_diagonal(
            &mut self.diag_candidate.data,
            &data.data,
            &s_component,
            offset,
            assign,
        );
        if crossings != 1 {
            return Err(Error::ImaginaryRowMiscount {
                column,
                count: crossings,
            });
        }

        // Checksum syndromes, running the same permutation over the crc bits.
        let s_value = checksum_s_value(data.crc, s_row);
        let mangled = mangle_checksum(data.crc, offset) ^ s_value;
        if assign {
            self.row_poc = data.crc;
            self.diag_poc = mangled;
        } else {
            self.row_poc ^= data.crc;
            self.diag_poc ^= mangled;
        }

        self.initialized = true;
        Ok(checksum)
    }

    /// Fold one parity sector into its candidate
    pub fn accumulate_parity(
        &mut self,
        parity: &Sector,
        kind: ParityKind,
        rebuild_pos: usize,
    ) -> Result<u32> {
        check_column(rebuild_pos)?;
        let assign = !self.initialized;
        let checksum = calc_raw_checksum(&parity.data);

        match kind {
            ParityKind::Row => {
                for i in 0..WORDS_PER_SECTOR {
                    if assign {
                        self.row_candidate.data[i] = parity.data[i];
                    } else {
                        self.row_candidate.data[i] ^= parity.data[i];
                    }
                }
                if assign {
                    self.row_poc = parity.lba_stamp;
                } else {
                    self.row_poc ^= parity.lba_stamp;
                }
            }
            ParityKind::Diagonal => {
                // Rebuild position 0 never crosses the imaginary diagonal and
                // has no S-component.
                let offset = (EVENODD_M - rebuild_pos) % EVENODD_M;
                let s_component = if rebuild_pos == 0 {
                    ZERO_SYMBOL
                } else {
                    parity.symbol(rebuild_pos - 1)
                };
                let crossings = fold_diagonal(
                    &mut self.diag_candidate.data,
                    &parity.data,
                    &s_component,
                    offset,
                    assign,
                );
                let expected = u32::from(rebuild_pos != 0);
                if crossings != expected {
                    return Err(Error::ImaginaryRowMiscount {
                        column: rebuild_pos,
                        count: crossings,
                    });
                }

                let s_value = if rebuild_pos == 0 {
                    0
                } else {
                    checksum_s_value(parity.lba_stamp, rebuild_pos - 1)
                };
                let mangled = mangle_checksum(parity.lba_stamp, offset) ^ s_value;
                if assign {
                    self.diag_poc = mangled;
                } else {
                    self.diag_poc ^= mangled;
                }
            }
        }

        self.initialized = true;
        Ok(checksum)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Judge the finished candidates and settle the attempt
    ///
    /// On `Reconstructed` the row candidate holds the recovered sector; the
    /// state says whether a sacrificed parity drive still needs regeneration.
    /// On `Unrecoverable` the error board carries the diagnosis.
    pub fn resolve(
        &mut self,
        eboard: &mut Eboard,
        rebuild_pos: usize,
        row_parity_pos: usize,
        diag_parity_pos: usize,
    ) -> Result<Resolution> {
        let rebuild_bit = PositionMask::from_position(rebuild_pos);
        let row_bit = PositionMask::from_position(row_parity_pos);
        let diag_bit = PositionMask::from_position(diag_parity_pos);

        let row_cooked = cook_checksum(calc_raw_checksum(&self.row_candidate.data), self.seed);
        let diag_cooked = cook_checksum(calc_raw_checksum(&self.diag_candidate.data), self.seed);

        let mut code = 0u16;
        if self.row_candidate.data == self.diag_candidate.data {
            code |= DATA_MATCHES;
        }
        if self.row_poc == row_cooked {
            code |= RCSUM_MATCHES;
        }
        if self.diag_poc == diag_cooked {
            code |= DCSUM_MATCHES;
        }
        if self.row_poc == self.diag_poc {
            code |= CSUMS_MATCH;
        }
        if self.fatal_mask.contains(row_parity_pos) {
            code |= RPARITY_DEAD;
        }
        if self.fatal_mask.contains(diag_parity_pos) {
            code |= DPARITY_DEAD;
        }

        // Stamp the reconstructed checksums so a probe of either candidate
        // sees the sector as it would land on disk.
        self.row_candidate.crc = self.row_poc;
        self.diag_candidate.crc = self.diag_poc;

        debug!(
            code,
            rebuild_pos,
            seed = self.seed,
            "resolving reconstruction attempt"
        );

        let resolution = match code {
            // Everything agrees.
            15 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, false)?;
                self.state = ScratchState::Done;
                Resolution::Reconstructed
            }

            // Candidates agree, row checksum agrees; the diagonal parity's
            // checksum record is the odd one out.
            12 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, false)?;
                self.sacrifice_parity(diag_bit);
                eboard.u_poc_coh.insert(diag_bit);
                Resolution::Reconstructed
            }

            // Mirror of 12 on the row side.
            10 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, true)?;
                self.sacrifice_parity(row_bit);
                eboard.u_poc_coh.insert(row_bit);
                Resolution::Reconstructed
            }

            // Candidates agree and both checksum records agree with each
            // other, but not with the data. One probe suffices.
            9 => {
                if probe_invalidated(eboard, &self.row_candidate, rebuild_bit, self.seed) {
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                } else {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.u_n_poc_coh.insert(rebuild_bit);
                }
                self.state = ScratchState::Done;
                Resolution::Unrecoverable
            }

            // Candidates agree but nothing else does.
            8 => {
                if probe_invalidated(eboard, &self.row_candidate, rebuild_bit, self.seed) {
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                    eboard.c_poc_coh.insert(diag_bit);
                } else if probe_invalidated(eboard, &self.diag_candidate, rebuild_bit, self.seed) {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                    eboard.c_poc_coh.insert(row_bit);
                } else {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.u_n_poc_coh.insert(rebuild_bit);
                }
                self.state = ScratchState::Done;
                Resolution::Unrecoverable
            }

            // Nothing agrees at all.
            0 => {
                if probe_invalidated(eboard, &self.row_candidate, rebuild_bit, self.seed) {
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                    eboard.c_coh.insert(diag_bit);
                } else if probe_invalidated(eboard, &self.diag_candidate, rebuild_bit, self.seed) {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                    eboard.c_coh.insert(row_bit);
                } else {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.u_coh.insert(rebuild_bit);
                }
                self.state = ScratchState::Done;
                Resolution::Unrecoverable
            }

            // The candidates disagree while both checksum comparisons say the
            // data should be fine; contradictory, so the position is lost.
            7 | 6 => {
                eboard.u_coh.insert(rebuild_bit);
                self.state = ScratchState::Done;
                Resolution::Unrecoverable
            }

            // Only the two reconstructed checksums agree with each other.
            1 => {
                if probe_invalidated(eboard, &self.row_candidate, rebuild_bit, self.seed) {
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                    eboard.c_coh.insert(diag_bit);
                } else if probe_invalidated(eboard, &self.diag_candidate, rebuild_bit, self.seed) {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                    eboard.c_coh.insert(row_bit);
                } else {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.u_coh.insert(rebuild_bit);
                }
                self.state = ScratchState::Done;
                Resolution::Unrecoverable
            }

            // Row candidate checks out against its own checksum; the
            // diagonal parity payload must be stale.
            5 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, false)?;
                self.sacrifice_parity(diag_bit);
                eboard.u_coh.insert(diag_bit);
                Resolution::Reconstructed
            }

            // As case 5, but the checksum records also disagree, so the
            // diagonal parity's checksum record is suspect too.
            4 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, false)?;
                self.sacrifice_parity(diag_bit);
                eboard.u_n_poc_coh.insert(diag_bit);
                eboard.u_poc_coh.insert(diag_bit);
                Resolution::Reconstructed
            }

            // Mirrors of 5 and 4 on the diagonal side.
            3 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, true)?;
                self.sacrifice_parity(row_bit);
                eboard.u_coh.insert(row_bit);
                Resolution::Reconstructed
            }
            2 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, true)?;
                self.sacrifice_parity(row_bit);
                eboard.u_n_poc_coh.insert(row_bit);
                eboard.u_poc_coh.insert(row_bit);
                Resolution::Reconstructed
            }

            // Row parity is dead and the diagonal candidate checks out: use
            // it and regenerate row parity. The parity's errors stay on the
            // board; it is still broken until rebuilt.
            34 | 35 | 38 | 39 | 42 | 43 | 46 | 47 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, true)?;
                self.state = ScratchState::ReconstructParity;
                Resolution::Reconstructed
            }

            // Row parity is dead and the diagonal candidate is bad.
            32 | 33 | 36 | 37 | 40 | 41 | 44 | 45 => {
                if probe_invalidated(eboard, &self.diag_candidate, rebuild_bit, self.seed) {
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                } else {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.u_coh.insert(rebuild_bit);
                }
                self.state = ScratchState::Done;
                Resolution::Unrecoverable
            }

            // Diagonal parity is dead and the row candidate checks out.
            20 | 21 | 22 | 23 | 28 | 29 | 30 | 31 => {
                self.accept(eboard, rebuild_bit, rebuild_pos, false)?;
                self.state = ScratchState::ReconstructParity;
                Resolution::Reconstructed
            }

            // Diagonal parity is dead and the row candidate is bad.
            16 | 17 | 18 | 19 | 24 | 25 | 26 | 27 => {
                if probe_invalidated(eboard, &self.row_candidate, rebuild_bit, self.seed) {
                    eboard.correct_all_non_crc_one_pos(rebuild_bit);
                    eboard.u_crc.insert(rebuild_bit);
                } else {
                    clear_probe_residue(eboard, rebuild_bit);
                    eboard.u_coh.insert(rebuild_bit);
                }
                self.state = ScratchState::Done;
                Resolution::Unrecoverable
            }

            // Unreachable with a well-formed code; never a silent success.
            _ => {
                eboard.u_coh_unk.insert(rebuild_bit);
                self.state = ScratchState::Done;
                Resolution::Unrecoverable
            }
        };

        Ok(resolution)
    }

    /// Commit the winning candidate into the row buffer and retire the error
    fn accept(
        &mut self,
        eboard: &mut Eboard,
        rebuild_bit: PositionMask,
        rebuild_pos: usize,
        use_diag: bool,
    ) -> Result<()> {
        if use_diag {
            self.row_candidate.data = self.diag_candidate.data;
        }
        let winner = if use_diag { self.diag_poc } else { self.row_poc };

        let cooked = cook_checksum(calc_raw_checksum(&self.row_candidate.data), self.seed);
        if cooked != winner {
            return Err(Error::ReconstructionChecksumMismatch {
                position: rebuild_pos,
                checksum: winner,
            });
        }
        self.row_candidate.crc = winner;

        eboard.correct_all_one_pos(rebuild_bit);
        self.remove_error(rebuild_bit)?;
        eboard.modified.insert(rebuild_bit);
        Ok(())
    }

    fn sacrifice_parity(&mut self, parity_bit: PositionMask) {
        self.state = ScratchState::ReconstructParity;
        self.add_error(parity_bit);
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

/// Probe a candidate for the invalidation pattern, leaving the checksum
/// reason bitmaps updated
fn probe_invalidated(
    eboard: &mut Eboard,
    sector: &Sector,
    bit: PositionMask,
    seed: u64,
) -> bool {
    eboard.determine_csum_error(sector, bit, seed);
    eboard.invalidated_mask().intersects(bit)
}

/// Drop the speculative single/multi-bit classification a probe left behind
fn clear_probe_residue(eboard: &mut Eboard, bit: PositionMask) {
    eboard.crc_single.remove(bit);
    eboard.crc_multi.remove(bit);
}

// =============================================================================
// Tests
// =============================================================================
