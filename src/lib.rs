//! StripeGuard - RAID-6 Parity Reconstruction and Error Accounting
//!
//! A dual-parity reconstruction core built on even-odd coding over 17
//! diagonals. Given the surviving sectors of a damaged strip, it rebuilds
//! the missing one along two independent parity paths, compares the two
//! candidates against checksum and parity-of-checksums evidence, and either
//! accepts a result or pins the blame on the sectors the evidence
//! contradicts. Every verdict lands on an error board and, from there, in a
//! bounded table of coalesced error regions.
//!
//! # Architecture
//!
//! ```text
//! Sectors → Accumulator (row + diagonal fold) → Resolver → Eboard → Regions
//! ```
//!
//! # Modules
//!
//! - [`sector`] - Sector layout, checksum pipeline, invalidation patterns
//! - [`bitmask`] - Drive position bitmasks
//! - [`eboard`] - Per-strip error board and the composite-error classifier
//! - [`errtype`] - Error kinds, qualifier flags, composite error values
//! - [`encode`] - Forward parity generation and the shared diagonal fold
//! - [`reconstruct`] - Scratch accumulator and the 64-case resolver
//! - [`regions`] - Coalescing, bounded error-region recorder
//! - [`error`] - Error types

pub mod bitmask;
pub mod eboard;
pub mod encode;
pub mod errtype;
pub mod error;
pub mod reconstruct;
pub mod regions;
pub mod sector;

#[cfg(test)]
mod proptest;

// Re-export commonly used types
pub use bitmask::PositionMask;
pub use eboard::Eboard;
pub use errtype::{CompositeError, ErrorFlags, ErrorKind};
pub use error::{Error, Result};
pub use reconstruct::{ParityKind, Resolution, Scratch, ScratchState};
pub use regions::{ErrorRegion, ErrorRegions, StripLayout};
pub use sector::Sector;
