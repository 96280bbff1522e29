//! Property-Based Tests for Reconstruction
//!
//! Uses proptest to verify the parity pipeline across a wide range of strip
//! shapes, payloads, and seeds.
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: encode(strip) → reconstruct(lost) = lost sector
//! 2. **Order Independence**: parity folding commutes over column order
//! 3. **Checksum Soundness**: cooked checksums verify, invalidation survives
//! 4. **Bounded Recording**: the region table never exceeds its capacity

#![cfg(test)]

use proptest::prelude::*;

use crate::bitmask::PositionMask;
use crate::eboard::Eboard;
use crate::encode::{init_parity, seal_parity, update_parity};
use crate::errtype::{CompositeError, ErrorKind};
use crate::reconstruct::{ParityKind, Resolution, Scratch, ScratchState};
use crate::regions::{ErrorRegions, StripLayout, MAX_REGIONS};
use crate::sector::{cook_checksum, verify_checksum, InvalidReason, Sector, WORDS_PER_SECTOR};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for one sector payload.
fn payload_strategy() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(any::<u32>(), WORDS_PER_SECTOR)
}

/// Strategy for a whole strip: 2-8 data columns of random payloads.
fn strip_strategy() -> impl Strategy<Value = Vec<Vec<u32>>> {
    prop::collection::vec(payload_strategy(), 2..=8)
}

fn sector_from_payload(payload: &[u32], seed: u64) -> Sector {
    let mut sector = Sector::default();
    sector.data.copy_from_slice(payload);
    sector.crc = cook_checksum(sector.calc_raw_checksum(), seed);
    sector
}

/// Encode a strip: data sectors plus sealed row and diagonal parity.
fn encode_strip(payloads: &[Vec<u32>], seed: u64) -> (Vec<Sector>, Sector, Sector) {
    let columns: Vec<Sector> = payloads
        .iter()
        .map(|p| sector_from_payload(p, seed))
        .collect();

    let mut row = Sector::default();
    let mut diag = Sector::default();
    init_parity(&columns[0], 0, &mut row, &mut diag).unwrap();
    for (c, col) in columns.iter().enumerate().skip(1) {
        update_parity(col, c, &mut row, &mut diag).unwrap();
    }
    seal_parity(&mut row, seed);
    seal_parity(&mut diag, seed);
    (columns, row, diag)
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Any single lost data column is rebuilt exactly, whatever
    /// the payloads, the seed, or which column was lost.
    #[test]
    fn prop_roundtrip_any_lost_column(
        payloads in strip_strategy(),
        seed in any::<u64>(),
        lost_pick in any::<prop::sample::Index>(),
    ) {
        let (columns, row, diag) = encode_strip(&payloads, seed);
        let lost = lost_pick.index(columns.len());

        let mut scratch = Scratch::new(seed);
        scratch.add_error(PositionMask::from_position(lost));
        for (c, col) in columns.iter().enumerate() {
            if c != lost {
                scratch.accumulate_data(col, c, lost)?;
            }
        }
        scratch.accumulate_parity(&row, ParityKind::Row, lost)?;
        scratch.accumulate_parity(&diag, ParityKind::Diagonal, lost)?;

        let mut board = Eboard::new();
        board.u_crc = PositionMask::from_position(lost);
        let outcome = scratch.resolve(&mut board, lost, 14, 15)?;

        prop_assert_eq!(outcome, Resolution::Reconstructed);
        prop_assert_eq!(scratch.state(), ScratchState::Done);
        prop_assert_eq!(&scratch.row_candidate, &columns[lost]);
        prop_assert!(scratch.fatal_mask().is_empty());
    }

    /// Property: A corrupted diagonal checksum record never blocks data
    /// recovery; it costs the diagonal parity drive instead.
    #[test]
    fn prop_stale_diag_poc_is_survivable(
        payloads in strip_strategy(),
        seed in any::<u64>(),
        lost_pick in any::<prop::sample::Index>(),
        flip in 1u16..,
    ) {
        let (columns, row, mut diag) = encode_strip(&payloads, seed);
        let lost = lost_pick.index(columns.len());
        diag.lba_stamp ^= flip;

        let mut scratch = Scratch::new(seed);
        scratch.add_error(PositionMask::from_position(lost));
        for (c, col) in columns.iter().enumerate() {
            if c != lost {
                scratch.accumulate_data(col, c, lost)?;
            }
        }
        scratch.accumulate_parity(&row, ParityKind::Row, lost)?;
        scratch.accumulate_parity(&diag, ParityKind::Diagonal, lost)?;

        let mut board = Eboard::new();
        let outcome = scratch.resolve(&mut board, lost, 14, 15)?;

        prop_assert_eq!(outcome, Resolution::Reconstructed);
        prop_assert_eq!(scratch.state(), ScratchState::ReconstructParity);
        prop_assert_eq!(&scratch.row_candidate.data, &columns[lost].data);
        prop_assert_eq!(board.u_poc_coh, PositionMask::from_position(15));
    }
}

// =============================================================================
// Encoding Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: Folding the trailing columns in any order yields the same
    /// parity pair.
    #[test]
    fn prop_parity_fold_commutes(
        payloads in prop::collection::vec(payload_strategy(), 3..=6),
        seed in any::<u64>(),
    ) {
        let columns: Vec<Sector> = payloads
            .iter()
            .map(|p| sector_from_payload(p, seed))
            .collect();

        let mut row_fwd = Sector::default();
        let mut diag_fwd = Sector::default();
        init_parity(&columns[0], 0, &mut row_fwd, &mut diag_fwd)?;
        for (c, col) in columns.iter().enumerate().skip(1) {
            update_parity(col, c, &mut row_fwd, &mut diag_fwd)?;
        }

        let mut row_rev = Sector::default();
        let mut diag_rev = Sector::default();
        init_parity(&columns[0], 0, &mut row_rev, &mut diag_rev)?;
        for (c, col) in columns.iter().enumerate().skip(1).rev() {
            update_parity(col, c, &mut row_rev, &mut diag_rev)?;
        }

        prop_assert_eq!(row_fwd, row_rev);
        prop_assert_eq!(diag_fwd, diag_rev);
    }

    /// Property: Folding the same column in twice restores the parity pair.
    #[test]
    fn prop_double_fold_cancels(
        base in payload_strategy(),
        extra in payload_strategy(),
        seed in any::<u64>(),
        column in 1usize..16,
    ) {
        let first = sector_from_payload(&base, seed);
        let second = sector_from_payload(&extra, seed);

        let mut row = Sector::default();
        let mut diag = Sector::default();
        init_parity(&first, 0, &mut row, &mut diag)?;
        let row_before = row.clone();
        let diag_before = diag.clone();

        update_parity(&second, column, &mut row, &mut diag)?;
        update_parity(&second, column, &mut row, &mut diag)?;

        prop_assert_eq!(row, row_before);
        prop_assert_eq!(diag, diag_before);
    }
}

// =============================================================================
// Checksum Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: A freshly cooked sector always verifies under its seed.
    #[test]
    fn prop_cooked_sector_verifies(
        payload in payload_strategy(),
        seed in any::<u64>(),
        position in 0usize..16,
    ) {
        let sector = sector_from_payload(&payload, seed);
        prop_assert!(verify_checksum(&sector, seed, position).is_ok());
    }

    /// Property: Flipping any payload bit breaks verification, and the
    /// invalidation pattern round-trips through its own recognizer.
    #[test]
    fn prop_invalidation_pattern_roundtrips(
        payload in payload_strategy(),
        seed in any::<u64>(),
    ) {
        let mut sector = sector_from_payload(&payload, seed);
        sector.invalidate(InvalidReason::Verify, seed);

        prop_assert!(verify_checksum(&sector, seed, 0).is_err());
        prop_assert_eq!(sector.invalidation(seed), Some(InvalidReason::Verify));
    }
}

// =============================================================================
// Recording Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: The table never exceeds its capacity, whatever gets
    /// recorded.
    #[test]
    fn prop_region_table_stays_bounded(
        entries in prop::collection::vec((0usize..6, 0u64..10_000), 1..100),
    ) {
        let layout = StripLayout { width: 6, parity_pos: 5, parity_drives: 2 };
        let mut table = ErrorRegions::new();
        for (position, lba) in entries {
            table.create_region(
                CompositeError::new(ErrorKind::Coherency),
                PositionMask::from_position(position),
                lba,
                &layout,
            )?;
        }
        prop_assert!(table.len() <= MAX_REGIONS);
    }

    /// Property: An ascending contiguous run of one error collapses into a
    /// single region spanning the whole run.
    #[test]
    fn prop_contiguous_run_coalesces(
        start in 0u64..1_000_000,
        run in 1u32..200,
        position in 0usize..6,
    ) {
        let layout = StripLayout { width: 6, parity_pos: 5, parity_drives: 2 };
        let mut table = ErrorRegions::new();
        for i in 0..u64::from(run) {
            table.create_region(
                CompositeError::new(ErrorKind::TimeStamp),
                PositionMask::from_position(position),
                start + i,
                &layout,
            )?;
        }
        prop_assert_eq!(table.len(), 1);
        prop_assert_eq!(table.regions()[0].lba, start);
        prop_assert_eq!(table.regions()[0].blocks, run);
    }
}
