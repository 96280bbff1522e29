//! Error types for the stripe reconstruction core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconstructing a strip or recording errors
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Geometry Errors
    // =========================================================================
    /// Position outside the supported strip width
    #[error("Position {position} out of range (width {width})")]
    PositionOutOfRange { position: usize, width: usize },

    /// A data column was fed to the accumulator for its own rebuild position
    #[error("Column {column} cannot contribute to its own reconstruction")]
    ColumnIsRebuildTarget { column: usize },

    /// The imaginary-row redirect fired an unexpected number of times
    #[error("Imaginary diagonal crossed {count} times for column {column} (expected exactly once)")]
    ImaginaryRowMiscount { column: usize, count: u32 },

    // =========================================================================
    // Reconstruction Errors
    // =========================================================================
    /// A reconstructed sector failed its own checksum
    #[error("Reconstructed data for position {position} does not match checksum {checksum:#06x}")]
    ReconstructionChecksumMismatch { position: usize, checksum: u16 },

    /// Tried to retire an error that was never outstanding
    #[error("Position mask {mask:#06x} is not in the outstanding error set")]
    NotOutstanding { mask: u16 },

    // =========================================================================
    // Error Accounting Errors
    // =========================================================================
    /// The classifier produced no usable error type
    #[error("Error board yielded an unknown error for mask {mask:#06x}")]
    UnknownBoardError { mask: u16 },

    /// Region creation was handed an out-of-range error value
    #[error("Error value {value:#x} is outside the recordable range")]
    ErrorValueOutOfRange { value: u32 },
}
