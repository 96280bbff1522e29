//! Reconstruction Integration Tests
//!
//! End-to-end tests driving the full pipeline: forward parity generation,
//! loss of a strip member, dual-path recovery, and error-region recording.

use std::sync::Once;

use stripe_guard::encode::{init_parity, seal_parity, update_parity};
use stripe_guard::reconstruct::MAX_RECONSTRUCT_PASSES;
use stripe_guard::sector::{cook_checksum, verify_checksum, Sector};
use stripe_guard::{
    Eboard, ErrorKind, ErrorRegions, ParityKind, PositionMask, Resolution, Scratch, ScratchState,
    StripLayout,
};

static TRACING: Once = Once::new();

/// Route resolver and recorder debug output through the test harness when
/// RUST_LOG asks for it.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

const SEED: u64 = 0xdead_beef;
const ROW_POS: usize = 14;
const DIAG_POS: usize = 15;

const LAYOUT: StripLayout = StripLayout {
    width: 16,
    parity_pos: ROW_POS,
    parity_drives: 2,
};

fn data_sector(tag: u32) -> Sector {
    let mut sector = Sector::default();
    for (i, word) in sector.data.iter_mut().enumerate() {
        *word = tag
            .wrapping_mul(0x9e37_79b9)
            .wrapping_add((i as u32).wrapping_mul(0x0101_0101))
            .rotate_left((i % 29) as u32);
    }
    sector.crc = cook_checksum(sector.calc_raw_checksum(), SEED);
    sector
}

/// Encode `width` data columns into a strip with sealed parity.
fn encode_strip(width: usize) -> (Vec<Sector>, Sector, Sector) {
    let columns: Vec<Sector> = (0..width).map(|c| data_sector(c as u32 + 1)).collect();

    let mut row = Sector::default();
    let mut diag = Sector::default();
    init_parity(&columns[0], 0, &mut row, &mut diag).expect("init parity");
    for (c, col) in columns.iter().enumerate().skip(1) {
        update_parity(col, c, &mut row, &mut diag).expect("update parity");
    }
    seal_parity(&mut row, SEED);
    seal_parity(&mut diag, SEED);
    (columns, row, diag)
}

fn accumulate_survivors(
    scratch: &mut Scratch,
    columns: &[Sector],
    row: Option<&Sector>,
    diag: Option<&Sector>,
    lost: usize,
) {
    for (c, col) in columns.iter().enumerate() {
        if c != lost {
            scratch.accumulate_data(col, c, lost).expect("accumulate data");
        }
    }
    if let Some(row) = row {
        scratch
            .accumulate_parity(row, ParityKind::Row, lost)
            .expect("accumulate row parity");
    }
    if let Some(diag) = diag {
        scratch
            .accumulate_parity(diag, ParityKind::Diagonal, lost)
            .expect("accumulate diagonal parity");
    }
}

// =============================================================================
// Recovery Pipeline Tests
// =============================================================================

#[test]
fn test_full_reconstruction_pipeline() {
    init_tracing();
    let (columns, row, diag) = encode_strip(5);
    let lost = 2;

    let mut scratch = Scratch::new(SEED);
    scratch.add_error(PositionMask::from_position(lost));
    accumulate_survivors(&mut scratch, &columns, Some(&row), Some(&diag), lost);

    let mut board = Eboard::new();
    board.u_crc = PositionMask::from_position(lost);
    let outcome = scratch
        .resolve(&mut board, lost, ROW_POS, DIAG_POS)
        .expect("resolve");

    assert_eq!(outcome, Resolution::Reconstructed);
    assert_eq!(scratch.state(), ScratchState::Done);
    assert_eq!(scratch.row_candidate, columns[lost]);
    assert!(verify_checksum(&scratch.row_candidate, SEED, lost).is_ok());

    // The board moved the position from broken to fixed and marked it dirty.
    assert!(board.u_crc.is_empty());
    assert_eq!(board.c_crc, PositionMask::from_position(lost));
    assert_eq!(board.modified, PositionMask::from_position(lost));
}

#[test]
fn test_sacrificed_diag_parity_is_regenerated() {
    init_tracing();
    let (columns, row, mut diag) = encode_strip(4);
    let lost = 1;
    diag.lba_stamp ^= 0x8001;

    let mut scratch = Scratch::new(SEED);
    scratch.add_error(PositionMask::from_position(lost));
    accumulate_survivors(&mut scratch, &columns, Some(&row), Some(&diag), lost);

    let mut board = Eboard::new();
    let outcome = scratch
        .resolve(&mut board, lost, ROW_POS, DIAG_POS)
        .expect("resolve");

    assert_eq!(outcome, Resolution::Reconstructed);
    assert_eq!(scratch.state(), ScratchState::ReconstructParity);
    assert_eq!(scratch.row_candidate.data, columns[lost].data);
    assert_eq!(scratch.fatal_mask(), PositionMask::from_position(DIAG_POS));
    assert_eq!(board.u_poc_coh, PositionMask::from_position(DIAG_POS));

    // Regenerate the sacrificed parity from the repaired strip; it must
    // match a clean encoding.
    let mut repaired = columns.clone();
    repaired[lost] = scratch.row_candidate.clone();

    let mut new_row = Sector::default();
    let mut new_diag = Sector::default();
    init_parity(&repaired[0], 0, &mut new_row, &mut new_diag).expect("init parity");
    for (c, col) in repaired.iter().enumerate().skip(1) {
        update_parity(col, c, &mut new_row, &mut new_diag).expect("update parity");
    }
    seal_parity(&mut new_diag, SEED);

    let (_, _, clean_diag) = encode_strip(4);
    assert_eq!(new_diag, clean_diag);
}

#[test]
fn test_dead_diag_parity_recovers_along_row_path() {
    init_tracing();
    let (columns, row, _diag) = encode_strip(4);
    let lost = 3;

    let mut scratch = Scratch::new(SEED);
    scratch.add_error(PositionMask::from_position(lost));
    scratch.add_error(PositionMask::from_position(DIAG_POS));
    accumulate_survivors(&mut scratch, &columns, Some(&row), None, lost);

    let mut board = Eboard::new();
    let outcome = scratch
        .resolve(&mut board, lost, ROW_POS, DIAG_POS)
        .expect("resolve");

    assert_eq!(outcome, Resolution::Reconstructed);
    assert_eq!(scratch.state(), ScratchState::ReconstructParity);
    assert_eq!(scratch.row_candidate, columns[lost]);
    // The dead parity drive stays outstanding for its own rebuild.
    assert_eq!(scratch.fatal_mask(), PositionMask::from_position(DIAG_POS));
}

#[test]
fn test_dead_row_parity_recovers_along_diagonal_path() {
    init_tracing();
    let (columns, _row, diag) = encode_strip(4);
    let lost = 0;

    let mut scratch = Scratch::new(SEED);
    scratch.add_error(PositionMask::from_position(lost));
    scratch.add_error(PositionMask::from_position(ROW_POS));
    accumulate_survivors(&mut scratch, &columns, None, Some(&diag), lost);

    let mut board = Eboard::new();
    let outcome = scratch
        .resolve(&mut board, lost, ROW_POS, DIAG_POS)
        .expect("resolve");

    assert_eq!(outcome, Resolution::Reconstructed);
    assert_eq!(scratch.state(), ScratchState::ReconstructParity);
    assert_eq!(scratch.row_candidate.data, columns[lost].data);
    assert_eq!(scratch.fatal_mask(), PositionMask::from_position(ROW_POS));
}

#[test]
fn test_repair_loop_finishes_within_pass_bound() {
    init_tracing();
    let (columns, row, mut diag) = encode_strip(4);
    let lost = 1;
    diag.lba_stamp ^= 0x0042;

    let mut board = Eboard::new();
    let mut scratch = Scratch::new(SEED);
    scratch.add_error(PositionMask::from_position(lost));

    // Drive the repair loop the way a strip executor would: each pass either
    // recovers the data position or regenerates a sacrificed parity, and the
    // whole strip must settle within the pass bound.
    let mut repaired = columns.clone();
    let mut passes = 0;
    while scratch.fatal_count() > 0 {
        passes += 1;
        assert!(passes <= MAX_RECONSTRUCT_PASSES, "repair loop ran away");

        if scratch.fatal_mask().contains(lost) {
            accumulate_survivors(&mut scratch, &columns, Some(&row), Some(&diag), lost);
            let outcome = scratch
                .resolve(&mut board, lost, ROW_POS, DIAG_POS)
                .expect("resolve");
            assert_eq!(outcome, Resolution::Reconstructed);
            repaired[lost] = scratch.row_candidate.clone();
        } else {
            let mut new_row = Sector::default();
            let mut new_diag = Sector::default();
            init_parity(&repaired[0], 0, &mut new_row, &mut new_diag).expect("init parity");
            for (c, col) in repaired.iter().enumerate().skip(1) {
                update_parity(col, c, &mut new_row, &mut new_diag).expect("update parity");
            }
            seal_parity(&mut new_diag, SEED);
            diag = new_diag;
            scratch
                .remove_error(PositionMask::from_position(DIAG_POS))
                .expect("retire parity");
        }
    }

    assert_eq!(passes, 2);
    assert_eq!(repaired[lost], columns[lost]);
    let (_, _, clean_diag) = encode_strip(4);
    assert_eq!(diag, clean_diag);
}

// =============================================================================
// Error Recording Tests
// =============================================================================

#[test]
fn test_unrecoverable_strip_lands_in_region_table() {
    init_tracing();
    let (mut columns, row, diag) = encode_strip(4);
    let lost = 2;

    // A survivor drifts after parity was written, payload and checksum
    // together, so neither recovery path can be trusted.
    columns[3].data[0] ^= 0x00ff_00ff;
    columns[3].crc = cook_checksum(columns[3].calc_raw_checksum(), SEED);

    let mut scratch = Scratch::new(SEED);
    scratch.add_error(PositionMask::from_position(lost));
    accumulate_survivors(&mut scratch, &columns, Some(&row), Some(&diag), lost);

    let mut board = Eboard::new();
    board.u_crc = PositionMask::from_position(lost);
    let outcome = scratch
        .resolve(&mut board, lost, ROW_POS, DIAG_POS)
        .expect("resolve");

    assert_eq!(outcome, Resolution::Unrecoverable);
    assert_eq!(scratch.fatal_mask(), PositionMask::from_position(lost));

    let mut table = ErrorRegions::new();
    table
        .save_error_region(&board, true, 0x7700, &LAYOUT)
        .expect("save regions");

    let coherency = table
        .regions()
        .iter()
        .find(|r| {
            matches!(
                r.error.kind,
                ErrorKind::Coherency | ErrorKind::NPocCoherency
            )
        })
        .expect("coherency region recorded");
    assert_eq!(coherency.lba, 0x7700);
    assert!(coherency.error.is_uncorrectable());
    assert!(coherency.positions.contains(lost));
}

#[test]
fn test_region_table_coalesces_across_strips() {
    init_tracing();
    let mut board = Eboard::new();
    board.u_coh = PositionMask::from_position(2);
    board.media_err = PositionMask::from_position(2);
    board.u_crc = PositionMask::from_position(2);

    let mut table = ErrorRegions::new();
    for lba in 1000..1008 {
        table
            .save_error_region(&board, false, lba, &LAYOUT)
            .expect("save regions");
    }

    // Consecutive strips with identical diagnoses merge per error kind.
    for region in table.regions() {
        assert_eq!(region.lba, 1000);
        assert_eq!(region.blocks, 8);
    }
    assert!(!table.is_empty());
}

#[test]
fn test_region_table_serializes() {
    init_tracing();
    let mut board = Eboard::new();
    board.u_crc = PositionMask::from_position(1);
    board.media_err = PositionMask::from_position(1);

    let mut table = ErrorRegions::new();
    table
        .save_error_region(&board, true, 512, &LAYOUT)
        .expect("save regions");

    let json = serde_json::to_string(&table.regions()).expect("serialize regions");
    let parsed: Vec<stripe_guard::ErrorRegion> =
        serde_json::from_str(&json).expect("deserialize regions");
    assert_eq!(parsed, table.regions());
}
