//! Error-region recorder
//!
//! Condenses per-strip error boards into a bounded table of error regions: a
//! starting LBA, a block count, the positions involved, and one composite
//! error value. Adjacent strips with the same error coalesce into a single
//! region, so a long scrub over a damaged area produces one entry instead of
//! thousands. When the table is full, the position with the most entries
//! donates its most recent one for replacement; in validation mode the table
//! freezes instead, because downstream checking relies on the logical order
//! of the recorded errors.

use crate::bitmask::{PositionMask, MAX_POSITIONS};
use crate::eboard::Eboard;
use crate::errtype::{CompositeError, ErrorFlags, ErrorKind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound on recorded regions, one per possible drive position
pub const MAX_REGIONS: usize = 16;

// =============================================================================
// Error Region
// =============================================================================

/// One contiguous run of identically-classified errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRegion {
    /// First LBA of the run
    pub lba: u64,
    /// Length of the run in blocks
    pub blocks: u32,
    /// Positions the error was seen on
    pub positions: PositionMask,
    /// Classification shared by every block in the run
    pub error: CompositeError,
}

/// Strip geometry the recorder needs for classification and eviction
#[derive(Debug, Clone, Copy)]
pub struct StripLayout {
    /// Number of drive positions in the strip
    pub width: usize,
    /// Position of the parity drive eviction treats specially
    pub parity_pos: usize,
    /// Parity drive count, selects the classifier's tainting rule
    pub parity_drives: usize,
}

// =============================================================================
// Error Regions Table
// =============================================================================

/// Bounded, coalescing table of [`ErrorRegion`] entries
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorRegions {
    regions: Vec<ErrorRegion>,
    /// When set, a full table drops new entries instead of evicting; error
    /// validation replays the table and must never see reordered history
    validation_mode: bool,
}

impl ErrorRegions {
    pub fn new() -> Self {
        ErrorRegions::default()
    }

    pub fn with_validation_mode(validation_mode: bool) -> Self {
        ErrorRegions {
            regions: Vec::new(),
            validation_mode,
        }
    }

    pub fn regions(&self) -> &[ErrorRegion] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }

    // =========================================================================
    // Region Creation
    // =========================================================================

    /// Record a one-block error, coalescing with neighbours where possible
    ///
    /// An empty position mask is a silent no-op; an unrecordable kind is a
    /// defect in the caller.
    pub fn create_region(
        &mut self,
        error: CompositeError,
        positions: PositionMask,
        lba: u64,
        layout: &StripLayout,
    ) -> Result<()> {
        if layout.width > MAX_POSITIONS {
            return Err(Error::PositionOutOfRange {
                position: layout.width,
                width: MAX_POSITIONS,
            });
        }
        if positions.is_empty() {
            return Ok(());
        }
        if !error.kind.is_recordable() {
            return Err(Error::ErrorValueOutOfRange {
                value: error.packed(),
            });
        }

        if self.coalesce(error, positions, lba) {
            return Ok(());
        }

        let entry = ErrorRegion {
            lba,
            blocks: 1,
            positions,
            error,
        };

        if self.regions.len() < MAX_REGIONS {
            self.regions.push(entry);
            return Ok(());
        }

        if let Some(index) = self.find_replacement_slot(positions, layout) {
            debug!(
                index,
                lba,
                positions = %positions,
                "error region table full, replacing entry"
            );
            self.regions[index] = entry;
        }
        Ok(())
    }

    /// Try to merge the new block into an existing region; identical error
    /// and positions are required in every branch
    fn coalesce(&mut self, error: CompositeError, positions: PositionMask, lba: u64) -> bool {
        for region in &mut self.regions {
            if region.error != error || region.positions != positions {
                continue;
            }
            if region.lba + u64::from(region.blocks) == lba {
                // Immediately after the region: extend forward.
                region.blocks += 1;
                return true;
            }
            if region.lba != 0 && region.lba - 1 == lba {
                // Immediately before the region: extend backward.
                region.lba = lba;
                region.blocks += 1;
                return true;
            }
            if lba >= region.lba && lba < region.lba + u64::from(region.blocks) {
                // Already covered.
                return true;
            }
        }
        false
    }

    /// Pick the entry to overwrite when the table is full
    ///
    /// Counts entries per drive position; a parity-position entry counts
    /// only while its error is still correctable. The position with the
    /// most entries loses its most recent one, ties going to the larger
    /// entry index. Returns `None` when the incoming error is already
    /// represented on one of its data positions, or in validation mode.
    fn find_replacement_slot(
        &self,
        positions: PositionMask,
        layout: &StripLayout,
    ) -> Option<usize> {
        let mut counts = [0u32; MAX_POSITIONS];
        let mut latest = [0usize; MAX_POSITIONS];

        for (index, region) in self.regions.iter().enumerate() {
            let mut error_on_parity = false;
            let mut data_positions = PositionMask::EMPTY;
            for pos in 0..layout.width {
                if !region.positions.contains(pos) {
                    continue;
                }
                if pos == layout.parity_pos {
                    error_on_parity = !region.error.is_uncorrectable();
                } else {
                    data_positions.insert(PositionMask::from_position(pos));
                }
            }

            if positions.intersects(region.positions)
                && !error_on_parity
                && positions.intersects(data_positions)
            {
                // This error is already on record for one of its data
                // positions; dropping it loses nothing.
                return None;
            }

            for pos in 0..layout.width {
                if !region.positions.contains(pos) {
                    continue;
                }
                if pos == layout.parity_pos && !error_on_parity {
                    continue;
                }
                counts[pos] += 1;
                latest[pos] = index;
            }
        }

        let mut busiest = 0;
        for pos in 1..layout.width {
            if counts[pos] > counts[busiest]
                || (counts[pos] == counts[busiest] && latest[pos] > latest[busiest])
            {
                busiest = pos;
            }
        }

        if self.validation_mode {
            debug!(busiest, "error region table full, validation mode keeps history");
            return None;
        }
        Some(latest[busiest])
    }

    // =========================================================================
    // Board Snapshots
    // =========================================================================

    /// Record one checksum reason bitmap from the board
    ///
    /// The reason mask is narrowed to the requested correctability side,
    /// classified, marked with the rebuilt-from-invalidated flag when the
    /// position also carried an invalidation pattern, and a generic checksum
    /// kind is refined into single-bit or multi-bit.
    pub fn save_crc_error_region(
        &mut self,
        eboard: &Eboard,
        lba: u64,
        reason_mask: PositionMask,
        kind: ErrorKind,
        correctable: bool,
        layout: &StripLayout,
    ) -> Result<()> {
        let side = if correctable {
            eboard.c_crc
        } else {
            eboard.u_crc
        };
        let mask = reason_mask & side;

        let mut error = eboard.classify(mask, kind, correctable, layout.parity_drives)?;

        let pattern_kind = matches!(
            error.kind,
            ErrorKind::Invalidated | ErrorKind::RaidCrc | ErrorKind::CorruptCrc
        );
        if !pattern_kind && mask.intersects(eboard.invalidated_mask()) {
            // The position took an invalidation pattern on top of whatever
            // this reason bitmap recorded.
            error.flags.insert(ErrorFlags::RB_INV_DATA);
        }

        if error.kind == ErrorKind::Crc {
            let refined = if reason_mask.intersects(eboard.crc_multi) {
                ErrorKind::MultiBitCrc
            } else {
                ErrorKind::SingleBitCrc
            };
            error = error.rekind(refined);
        }

        self.create_region(error, mask, lba, layout)
    }

    /// Snapshot every error family on the board into the table
    ///
    /// A clean board is a no-op, as is a board whose only purpose is retry
    /// bookkeeping: unless the caller is invalidating, boards without media
    /// errors are skipped because the same strip will come through again
    /// once retries are exhausted.
    pub fn save_error_region(
        &mut self,
        eboard: &Eboard,
        invalidating: bool,
        lba: u64,
        layout: &StripLayout,
    ) -> Result<()> {
        if eboard.total_errors_mask().is_empty()
            || (!invalidating && eboard.media_err.is_empty())
        {
            return Ok(());
        }

        // Each checksum reason bitmap, correctable and uncorrectable.
        let reasons: [(PositionMask, ErrorKind); 10] = [
            (eboard.crc_invalid, ErrorKind::Invalidated),
            (eboard.crc_raid, ErrorKind::RaidCrc),
            (eboard.crc_dh, ErrorKind::DhCrc),
            (eboard.crc_klondike, ErrorKind::KlondikeCrc),
            (eboard.media_err, ErrorKind::HardMediaErr),
            (eboard.corrupt_crc, ErrorKind::CorruptCrc),
            (eboard.corrupt_data, ErrorKind::CorruptData),
            (eboard.crc_lba_stamp, ErrorKind::LbaStamp),
            (eboard.crc_single, ErrorKind::SingleBitCrc),
            (eboard.crc_multi, ErrorKind::MultiBitCrc),
        ];
        for (mask, kind) in reasons {
            self.save_crc_error_region(eboard, lba, mask, kind, true, layout)?;
            self.save_crc_error_region(eboard, lba, mask, kind, false, layout)?;
        }
        self.save_crc_error_region(eboard, lba, eboard.crc_copy, ErrorKind::CopyCrc, true, layout)?;
        self.save_crc_error_region(eboard, lba, eboard.crc_copy, ErrorKind::CopyCrc, false, layout)?;
        self.save_crc_error_region(
            eboard,
            lba,
            eboard.crc_pvd_metadata,
            ErrorKind::PvdMetadata,
            true,
            layout,
        )?;
        self.save_crc_error_region(
            eboard,
            lba,
            eboard.crc_pvd_metadata,
            ErrorKind::PvdMetadata,
            false,
            layout,
        )?;

        // Checksum errors none of the reason bitmaps claim: correctable ones
        // are plain checksum errors, uncorrectable ones mark a failed
        // rebuild position.
        let reason_union = eboard.crc_invalid
            | eboard.crc_raid
            | eboard.crc_dh
            | eboard.crc_klondike
            | eboard.media_err
            | eboard.corrupt_crc
            | eboard.corrupt_data
            | eboard.crc_single
            | eboard.crc_multi
            | eboard.crc_lba_stamp
            | eboard.crc_copy;
        let leftover = (eboard.u_crc | eboard.c_crc) & !reason_union;
        self.save_crc_error_region(
            eboard,
            lba,
            leftover & eboard.c_crc,
            ErrorKind::Crc,
            true,
            layout,
        )?;
        self.save_crc_error_region(
            eboard,
            lba,
            leftover & eboard.u_crc,
            ErrorKind::RebuildFailed,
            false,
            layout,
        )?;

        // Coherency and stamp families.
        let ts_kind = ErrorKind::TimeStamp;
        let ts_flags = if eboard.initial_ts {
            ErrorFlags::INITIAL_TS
        } else {
            ErrorFlags::EMPTY
        };
        let families: [(PositionMask, PositionMask, ErrorKind, ErrorFlags); 7] = [
            (eboard.c_coh, eboard.u_coh, ErrorKind::Coherency, ErrorFlags::EMPTY),
            (eboard.c_ts, eboard.u_ts, ts_kind, ts_flags),
            (eboard.c_ws, eboard.u_ws, ErrorKind::WriteStamp, ErrorFlags::EMPTY),
            (eboard.c_ss, eboard.u_ss, ErrorKind::ShedStamp, ErrorFlags::EMPTY),
            (
                eboard.c_n_poc_coh,
                eboard.u_n_poc_coh,
                ErrorKind::NPocCoherency,
                ErrorFlags::EMPTY,
            ),
            (
                eboard.c_poc_coh,
                eboard.u_poc_coh,
                ErrorKind::PocCoherency,
                ErrorFlags::EMPTY,
            ),
            (
                eboard.c_coh_unk,
                eboard.u_coh_unk,
                ErrorKind::CoherencyUnknown,
                ErrorFlags::EMPTY,
            ),
        ];
        for (c_mask, u_mask, kind, extra) in families {
            self.save_board_family(eboard, lba, c_mask, kind, extra, true, layout)?;
            self.save_board_family(eboard, lba, u_mask, kind, extra, false, layout)?;
        }

        self.save_raw_mirror_error_region(eboard, lba, layout)
    }

    fn save_board_family(
        &mut self,
        eboard: &Eboard,
        lba: u64,
        mask: PositionMask,
        kind: ErrorKind,
        extra: ErrorFlags,
        correctable: bool,
        layout: &StripLayout,
    ) -> Result<()> {
        let mut error = eboard.classify(mask, kind, correctable, layout.parity_drives)?;
        error.flags.insert(extra);
        self.create_region(error, mask, lba, layout)
    }

    /// Raw-mirror magic and sequence errors; sequence mismatches are only
    /// ever recorded as correctable
    fn save_raw_mirror_error_region(
        &mut self,
        eboard: &Eboard,
        lba: u64,
        layout: &StripLayout,
    ) -> Result<()> {
        self.save_board_family(
            eboard,
            lba,
            eboard.c_rm_magic,
            ErrorKind::RawMirrorBadMagic,
            ErrorFlags::EMPTY,
            true,
            layout,
        )?;
        self.save_board_family(
            eboard,
            lba,
            eboard.u_rm_magic,
            ErrorKind::RawMirrorBadMagic,
            ErrorFlags::EMPTY,
            false,
            layout,
        )?;
        self.save_board_family(
            eboard,
            lba,
            eboard.c_rm_seq,
            ErrorKind::RawMirrorBadSeq,
            ErrorFlags::EMPTY,
            true,
            layout,
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
