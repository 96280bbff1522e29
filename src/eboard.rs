//! Error board
//!
//! The error board is the per-strip scoreboard the reconstruction and verify
//! paths write into: one correctable/uncorrectable bitmap pair per error
//! family, a set of reason bitmaps refining checksum errors, and bookkeeping
//! bitmaps (zeroed extents, modified positions, media errors). The recorder
//! reads the board back out to build the error-region report, and the
//! classifier here turns a bitmap intersection into a [`CompositeError`].

use crate::bitmask::PositionMask;
use crate::errtype::{CompositeError, ErrorFlags, ErrorKind};
use crate::error::{Error, Result};
use crate::sector::{cook_checksum, InvalidReason, Sector};
use tracing::debug;

// =============================================================================
// Eboard
// =============================================================================

/// Per-strip error scoreboard
///
/// `u_*` bitmaps hold positions whose error is (still) uncorrectable, `c_*`
/// the positions whose error was repaired. A successful reconstruction moves
/// bits from `u_*` to `c_*` via [`Eboard::correct_all_one_pos`].
#[derive(Debug, Default, Clone)]
pub struct Eboard {
    pub u_crc: PositionMask,
    pub c_crc: PositionMask,
    pub u_coh: PositionMask,
    pub c_coh: PositionMask,
    pub u_ts: PositionMask,
    pub c_ts: PositionMask,
    pub u_ws: PositionMask,
    pub c_ws: PositionMask,
    pub u_ss: PositionMask,
    pub c_ss: PositionMask,
    pub u_n_poc_coh: PositionMask,
    pub c_n_poc_coh: PositionMask,
    pub u_poc_coh: PositionMask,
    pub c_poc_coh: PositionMask,
    pub u_coh_unk: PositionMask,
    pub c_coh_unk: PositionMask,
    pub u_rm_magic: PositionMask,
    pub c_rm_magic: PositionMask,
    pub c_rm_seq: PositionMask,

    // Reason bitmaps refining checksum errors
    pub crc_invalid: PositionMask,
    pub crc_raid: PositionMask,
    pub crc_dh: PositionMask,
    pub crc_klondike: PositionMask,
    pub crc_lba_stamp: PositionMask,
    pub crc_single: PositionMask,
    pub crc_multi: PositionMask,
    pub crc_copy: PositionMask,
    pub crc_pvd_metadata: PositionMask,
    pub corrupt_crc: PositionMask,
    pub corrupt_data: PositionMask,

    // Media and bookkeeping bitmaps
    pub media_err: PositionMask,
    pub zeroed: PositionMask,
    pub modified: PositionMask,

    /// Set by stamp verification when a time stamp error came from the
    /// initial, never-written stamp
    pub initial_ts: bool,
}

impl Eboard {
    pub fn new() -> Self {
        Eboard::default()
    }

    /// Union the recorder uses to decide whether there is anything to report
    pub fn total_errors_mask(&self) -> PositionMask {
        self.u_crc
            | self.c_crc
            | self.u_coh
            | self.c_coh
            | self.u_ts
            | self.c_ts
            | self.u_ws
            | self.c_ws
            | self.u_ss
            | self.c_ss
            | self.u_rm_magic
            | self.c_rm_magic
            | self.c_rm_seq
    }

    /// Move every error family's bits for the given positions from
    /// uncorrectable to correctable
    pub fn correct_all_one_pos(&mut self, mask: PositionMask) {
        Self::correct_pair(&mut self.u_crc, &mut self.c_crc, mask);
        Self::correct_pair(&mut self.u_coh, &mut self.c_coh, mask);
        Self::correct_pair(&mut self.u_ts, &mut self.c_ts, mask);
        Self::correct_pair(&mut self.u_ws, &mut self.c_ws, mask);
        Self::correct_pair(&mut self.u_ss, &mut self.c_ss, mask);
        Self::correct_pair(&mut self.u_poc_coh, &mut self.c_poc_coh, mask);
        Self::correct_pair(&mut self.u_n_poc_coh, &mut self.c_n_poc_coh, mask);
        Self::correct_pair(&mut self.u_coh_unk, &mut self.c_coh_unk, mask);
    }

    /// Move only the stamp families (time, write, shed) for the given
    /// positions; used when the data itself was an invalidation pattern and
    /// the checksum bit must stay uncorrectable
    pub fn correct_all_non_crc_one_pos(&mut self, mask: PositionMask) {
        Self::correct_pair(&mut self.u_ts, &mut self.c_ts, mask);
        Self::correct_pair(&mut self.u_ws, &mut self.c_ws, mask);
        Self::correct_pair(&mut self.u_ss, &mut self.c_ss, mask);
    }

    /// Move every family for every position; a full strip was rewritten
    pub fn correct_all(&mut self) {
        self.correct_all_one_pos(!PositionMask::EMPTY);
    }

    fn correct_pair(u: &mut PositionMask, c: &mut PositionMask, mask: PositionMask) {
        c.insert(*u & mask);
        u.remove(mask);
    }

    // =========================================================================
    // Checksum Error Probing
    // =========================================================================

    /// Work out why a sector's checksum did not match and set the matching
    /// reason bitmap
    ///
    /// Recognises the invalidation pattern first; anything else is split by
    /// the popcount of the checksum delta into single-bit and multi-bit
    /// checksum errors.
    pub fn determine_csum_error(&mut self, sector: &Sector, mask: PositionMask, seed: u64) {
        match sector.invalidation(seed) {
            Some(InvalidReason::Client) => self.crc_invalid.insert(mask),
            Some(InvalidReason::Verify) => self.crc_raid.insert(mask),
            Some(InvalidReason::CorruptCrc) => self.corrupt_crc.insert(mask),
            Some(InvalidReason::CorruptData) => self.corrupt_data.insert(mask),
            None => {
                let expected = cook_checksum(sector.calc_raw_checksum(), seed);
                let delta = expected ^ sector.crc;
                debug!(mask = %mask, delta = format_args!("{delta:#06x}"), "checksum probe");
                if delta.count_ones() == 1 {
                    self.crc_single.insert(mask);
                } else {
                    self.crc_multi.insert(mask);
                }
            }
        }
    }

    /// True if any of the probed positions carried an invalidation pattern
    pub fn invalidated_mask(&self) -> PositionMask {
        self.crc_invalid | self.crc_raid | self.corrupt_crc
    }

    // =========================================================================
    // Classifier
    // =========================================================================

    /// Classify the positions in `mask` into a composite error value
    ///
    /// `correctable` reflects which bitmap side the mask was taken from.
    /// `parity_drives` selects the others-invalidated rule: single-parity
    /// units treat any foreign invalidation pattern as tainting, dual-parity
    /// units only the corrupt-data test pattern.
    pub fn classify(
        &self,
        mask: PositionMask,
        kind: ErrorKind,
        correctable: bool,
        parity_drives: usize,
    ) -> Result<CompositeError> {
        if mask.is_empty() {
            return Ok(CompositeError::NONE);
        }

        let mut err = CompositeError::new(kind);
        if !correctable {
            err.flags.insert(ErrorFlags::UNCORRECTABLE);
        }
        if self.zeroed.intersects(mask) {
            err.flags.insert(ErrorFlags::ZEROED);
        }

        let others = !mask;
        match parity_drives {
            1 => {
                let tainting = self.crc_invalid | self.crc_raid | self.corrupt_crc | self.corrupt_data;
                let kind_is_pattern = matches!(
                    kind,
                    ErrorKind::Invalidated
                        | ErrorKind::RaidCrc
                        | ErrorKind::CorruptCrc
                        | ErrorKind::CorruptData
                );
                if !kind_is_pattern && others.intersects(tainting) {
                    err.flags.insert(ErrorFlags::OTHERS_INVALIDATED);
                }
            }
            2 => {
                if kind != ErrorKind::CorruptData && others.intersects(self.corrupt_data) {
                    err.flags.insert(ErrorFlags::OTHERS_INVALIDATED);
                }
            }
            _ => {}
        }

        if err.kind == ErrorKind::Unknown && err.flags.is_empty() {
            return Err(Error::UnknownBoardError { mask: mask.bits() });
        }
        Ok(err)
    }
}

// =============================================================================
// Tests
// =============================================================================
