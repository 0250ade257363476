//! Sigil is the core crate for the stamp ROM fixer. Contained here is all of the logic for
//! taking a freshly linked Game Boy ROM image and making its cartridge header bootable: the
//! cartridge type lexicon and descriptor parser, the header patch plan, and the passes that
//! rewrite the header, pad the image, and recompute both checksums. This crate aims to be free
//! of any CLI specifics; the `stamp` binary wraps it with argument handling.
//!
//! # Notes
//! The global checksum bytes live inside bank 0, so a ROM can never be checksummed and emitted
//! in a single forward pass. Seekable files are swept and then rewound; pipes buffer everything
//! past bank 0 in memory.

pub mod header;
pub mod mbc;
pub mod patch;
pub mod plan;
pub mod report;

pub use mbc::{parse_mbc, MbcByte, MbcKind, MbcParseError};
pub use patch::{patch_in_place, patch_stream, PatchError, BANK_SIZE};
pub use plan::{parse_byte, FixSpec, Model, PatchPlan};
pub use report::Reporter;
