//! The patching passes themselves. A ROM is processed in one linear sweep: read bank 0, apply
//! the requested header edits, settle the bank count (padding included), then the header
//! checksum, then the global checksum, then write everything back out.
//!
//! Two entry points exist because the global checksum bytes live inside bank 0, which has to be
//! written *after* the whole ROM has been summed. A seekable file can be swept forward and then
//! rewound, so only the header region is ever rewritten in place. A pipe cannot rewind, so the
//! switchable banks are buffered in memory until bank 0 has gone out.

use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};

use thiserror::Error;

use crate::header::{self, NINTENDO_LOGO};
use crate::plan::{Model, PatchPlan};

/// Every ROM bank is 16 KiB; bank 0 is fixed at the bottom of the address space.
pub const BANK_SIZE: usize = 0x4000;

/// Bank count cap. Real mappers stop at 512 banks, but 1 GiB keeps buffers bounded while
/// leaving room for oversized homebrew mappers.
const MAX_BANKS: u32 = 0x1_0000;

/// Ways patching a single ROM can fail. Each failure abandons the current file only; the caller
/// reports it and moves on to the next.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to read the header: {0}")]
    ReadHeader(#[source] io::Error),
    #[error("too short, expected at least 336 ($150) bytes, got only {0}")]
    TooShort(usize),
    #[error("has more than 65536 banks")]
    TooManyBanks,
    #[error("failed to read past bank 0: {0}")]
    ReadRomx(#[source] io::Error),
    #[error("failed to rewind: {0}")]
    Rewind(#[source] io::Error),
    #[error("failed to seek to the end: {0}")]
    SeekEnd(#[source] io::Error),
    #[error("failed to write bank 0: {0}")]
    WriteRom0(#[source] io::Error),
    #[error("failed to write the buffered banks: {0}")]
    WriteRomx(#[source] io::Error),
    #[error("failed to write the padding: {0}")]
    WritePadding(#[source] io::Error),
    #[error("failed to flush the output: {0}")]
    Flush(#[source] io::Error),
}

/// Reads until `buf` is full or EOF, retrying interrupted reads and accumulating short ones.
/// Returns how many bytes landed in `buf`.
fn read_fully<R: Read + ?Sized>(reader: &mut R, mut buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while !buf.is_empty() {
        match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                buf = &mut buf[n..];
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Working state for one file: bank 0 in memory, plus the running totals everything after
/// the header edits needs.
struct Patcher<'a> {
    plan: &'a PatchPlan,
    rom0: [u8; BANK_SIZE],
    /// How much of `rom0` actually came from (or, after padding, belongs in) the file.
    rom0_len: usize,
    /// Number of banks the output will have, bank 0 included.
    nb_banks: u32,
    /// Actual payload size past bank 0, padding excluded.
    total_romx_len: usize,
    /// Wrapping 16-bit sum of every output byte, accumulated as they become known.
    global_sum: u16,
}

impl<'a> Patcher<'a> {
    fn read_rom0<R: Read>(plan: &'a PatchPlan, input: &mut R) -> Result<Self, PatchError> {
        let mut rom0 = [0u8; BANK_SIZE];
        let rom0_len = read_fully(input, &mut rom0).map_err(PatchError::ReadHeader)?;
        // A partial bank 0 is fine as long as the whole header is there.
        if rom0_len < header::HEADER_END {
            return Err(PatchError::TooShort(rom0_len));
        }
        Ok(Self {
            plan,
            rom0,
            rom0_len,
            nb_banks: 1,
            total_romx_len: 0,
            global_sum: 0,
        })
    }

    /// Applies every requested header edit to the in-memory bank 0. The ROM size byte and the
    /// two checksums are deliberately absent; they depend on the final size and are settled by
    /// the later passes.
    fn apply_header(&mut self) {
        let plan = self.plan;

        if plan.fix_spec.fix_logo() {
            self.rom0[header::LOGO..header::LOGO + NINTENDO_LOGO.len()]
                .copy_from_slice(&NINTENDO_LOGO);
        } else if plan.fix_spec.trash_logo() {
            for (out, &logo) in self.rom0[header::LOGO..].iter_mut().zip(&NINTENDO_LOGO) {
                *out = !logo;
            }
        }

        if let Some(title) = &plan.title {
            self.rom0[header::TITLE..header::TITLE + title.len()].copy_from_slice(title);
        }

        if let Some(id) = &plan.game_id {
            self.rom0[header::GAME_ID..header::GAME_ID + id.len()].copy_from_slice(id);
        }

        match plan.model {
            Model::Dmg => {}
            Model::Both => self.rom0[header::CGB_FLAG] = 0x80,
            Model::Cgb => self.rom0[header::CGB_FLAG] = 0xC0,
        }

        if let Some(licensee) = &plan.new_licensee {
            self.rom0[header::NEW_LICENSEE..header::NEW_LICENSEE + licensee.len()]
                .copy_from_slice(licensee);
        }

        if plan.sgb {
            self.rom0[header::SGB_FLAG] = 0x03;
        }

        if let Some(mbc) = plan.mbc {
            self.rom0[header::CART_TYPE] = mbc.code();
        }

        if let Some(ram_size) = plan.ram_size {
            self.rom0[header::RAM_SIZE] = ram_size;
        }

        if !plan.japanese {
            self.rom0[header::DESTINATION] = 0x01;
        }

        if let Some(licensee) = plan.old_licensee {
            self.rom0[header::OLD_LICENSEE] = licensee;
        }

        if let Some(version) = plan.rom_version {
            self.rom0[header::ROM_VERSION] = version;
        }
    }

    /// Derives the bank layout from a known file length (seekable mode).
    fn layout_from_len(&mut self, file_size: u64) -> Result<(), PatchError> {
        if file_size >= MAX_BANKS as u64 * BANK_SIZE as u64 {
            return Err(PatchError::TooManyBanks);
        }
        self.nb_banks = file_size.div_ceil(BANK_SIZE as u64) as u32;
        self.total_romx_len = (file_size as usize).saturating_sub(BANK_SIZE);
        Ok(())
    }

    /// Drains the switchable banks from a pipe into memory (there is no way to revisit them
    /// later), folding them into the global sum along the way.
    fn buffer_romx<R: Read>(&mut self, input: &mut R) -> Result<Vec<u8>, PatchError> {
        let mut romx = Vec::new();
        if self.rom0_len < BANK_SIZE {
            // Bank 0 hit EOF already.
            return Ok(romx);
        }
        let mut bank = [0u8; BANK_SIZE];
        loop {
            let len = read_fully(input, &mut bank).map_err(PatchError::ReadRomx)?;
            if len != 0 {
                if self.nb_banks == MAX_BANKS {
                    return Err(PatchError::TooManyBanks);
                }
                self.nb_banks += 1;
                for &b in &bank[..len] {
                    self.global_sum = self.global_sum.wrapping_add(b.into());
                }
                romx.extend_from_slice(&bank[..len]);
            }
            // A short (or empty) read is EOF.
            if len != BANK_SIZE {
                break;
            }
        }
        self.total_romx_len = romx.len();
        Ok(romx)
    }

    /// Settles the final bank count. Padding is only ever requested by flashers, which write to
    /// power-of-two ROM chips, so the count rounds up to the next power of two, with two banks
    /// (32 KiB) as the floor. The padding bytes are folded into the global sum here, before any
    /// of them are materialized.
    fn settle_layout(&mut self) {
        let Some(pad_value) = self.plan.pad_value else {
            return;
        };
        if self.nb_banks == 1 {
            if self.rom0_len != BANK_SIZE {
                // The short bank 0 tail becomes padding; treat it as written payload from here
                // on so the writeback emits it.
                self.rom0[self.rom0_len..].fill(pad_value);
                self.rom0_len = BANK_SIZE;
            }
            self.nb_banks = 2;
        } else {
            debug_assert_eq!(self.rom0_len, BANK_SIZE);
        }
        self.nb_banks = self.nb_banks.next_power_of_two();
        self.rom0[header::ROM_SIZE] = (self.nb_banks / 2).trailing_zeros() as u8;

        let pad_len = (self.nb_banks as usize - 1) * BANK_SIZE - self.total_romx_len;
        self.global_sum = self
            .global_sum
            .wrapping_add((pad_value as usize * pad_len) as u16);
    }

    /// Settles the header checksum byte. Must run after [`Self::settle_layout`], which may
    /// rewrite the ROM size byte underneath the checksummed region.
    fn settle_header_sum(&mut self) {
        let spec = self.plan.fix_spec;
        if !spec.fix_header_sum() && !spec.trash_header_sum() {
            return;
        }
        let sum = header::header_checksum(&self.rom0);
        self.rom0[header::HEADER_SUM] = if spec.trash_header_sum() { !sum } else { sum };
    }

    fn wants_global_sum(&self) -> bool {
        self.plan.fix_spec.fix_global_sum() || self.plan.fix_spec.trash_global_sum()
    }

    /// Folds bank 0 into the global sum. The stored checksum is defined over the ROM with its
    /// own two bytes zeroed, so zero them first.
    fn sum_rom0(&mut self) {
        self.rom0[header::GLOBAL_SUM] = 0;
        self.rom0[header::GLOBAL_SUM + 1] = 0;
        for &b in &self.rom0[..self.rom0_len] {
            self.global_sum = self.global_sum.wrapping_add(b.into());
        }
    }

    fn store_global_sum(&mut self) {
        let sum = if self.plan.fix_spec.trash_global_sum() {
            !self.global_sum
        } else {
            self.global_sum
        };
        let [hi, lo] = sum.to_be_bytes();
        self.rom0[header::GLOBAL_SUM] = hi;
        self.rom0[header::GLOBAL_SUM + 1] = lo;
    }

    /// Emits the padding tail, one bank-sized chunk at a time.
    fn write_padding<W: Write>(&self, output: &mut W) -> Result<(), PatchError> {
        let Some(pad_value) = self.plan.pad_value else {
            return Ok(());
        };
        let bank = [pad_value; BANK_SIZE];
        let mut remaining = (self.nb_banks as usize - 1) * BANK_SIZE - self.total_romx_len;
        while remaining > 0 {
            let chunk = remaining.min(BANK_SIZE);
            output
                .write_all(&bank[..chunk])
                .map_err(PatchError::WritePadding)?;
            remaining -= chunk;
        }
        Ok(())
    }
}

/// Patches a seekable file in place. `file_size` must be the file's true length.
///
/// The file is read forward once (bank 0, then, if the global checksum is wanted, the rest),
/// rewound, and then only bank 0 is rewritten; without padding that shrinks further, to just the
/// `0x150` header bytes. Padding, if any, is appended at the end.
pub fn patch_in_place<F>(plan: &PatchPlan, file: &mut F, file_size: u64) -> Result<(), PatchError>
where
    F: Read + Write + Seek,
{
    let mut patcher = Patcher::read_rom0(plan, file)?;
    patcher.apply_header();
    patcher.layout_from_len(file_size)?;
    patcher.settle_layout();
    patcher.settle_header_sum();

    if patcher.wants_global_sum() {
        patcher.sum_rom0();
        // The cursor sits just past bank 0; sweep the rest of the file forward.
        let mut bank = [0u8; BANK_SIZE];
        loop {
            let len = read_fully(file, &mut bank).map_err(PatchError::ReadRomx)?;
            for &b in &bank[..len] {
                patcher.global_sum = patcher.global_sum.wrapping_add(b.into());
            }
            if len != BANK_SIZE {
                break;
            }
        }
        patcher.store_global_sum();
    }

    file.seek(SeekFrom::Start(0)).map_err(PatchError::Rewind)?;
    // Only the header needs rewriting, unless padding extended bank 0.
    let out_len = if plan.pad_value.is_none() {
        header::HEADER_END
    } else {
        patcher.rom0_len
    };
    file.write_all(&patcher.rom0[..out_len])
        .map_err(PatchError::WriteRom0)?;

    if plan.pad_value.is_some() {
        file.seek(SeekFrom::End(0)).map_err(PatchError::SeekEnd)?;
        patcher.write_padding(file)?;
    }
    file.flush().map_err(PatchError::Flush)
}

/// Patches a ROM streaming through distinct input and output handles (stdin to stdout). The
/// banks past bank 0 are buffered in memory, capped at 65536 banks total.
pub fn patch_stream<R, W>(plan: &PatchPlan, input: &mut R, output: &mut W) -> Result<(), PatchError>
where
    R: Read,
    W: Write,
{
    let mut patcher = Patcher::read_rom0(plan, input)?;
    patcher.apply_header();
    let romx = patcher.buffer_romx(input)?;
    patcher.settle_layout();
    patcher.settle_header_sum();

    if patcher.wants_global_sum() {
        // The buffered banks are already in the sum; bank 0 is all that is missing.
        patcher.sum_rom0();
        patcher.store_global_sum();
    }

    output
        .write_all(&patcher.rom0[..patcher.rom0_len])
        .map_err(PatchError::WriteRom0)?;
    output.write_all(&romx).map_err(PatchError::WriteRomx)?;
    patcher.write_padding(output)?;
    output.flush().map_err(PatchError::Flush)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_headerless_input() {
        let plan = PatchPlan::new();
        let mut output = Vec::new();
        let err = patch_stream(&plan, &mut &[0u8; 0x14F][..], &mut output).unwrap_err();
        assert!(matches!(err, PatchError::TooShort(0x14F)));
        assert!(output.is_empty());
    }

    #[test]
    fn tolerates_a_partial_bank_zero() {
        let plan = PatchPlan::new();
        let mut output = Vec::new();
        patch_stream(&plan, &mut &[0u8; 0x200][..], &mut output).unwrap();
        assert_eq!(output.len(), 0x200);
    }

    #[test]
    fn read_fully_accumulates_across_short_reads() {
        // A reader that trickles one byte at a time.
        struct Trickle(usize);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0 == 0 || buf.is_empty() {
                    return Ok(0);
                }
                self.0 -= 1;
                buf[0] = 0xAB;
                Ok(1)
            }
        }
        let mut buf = [0u8; 16];
        assert_eq!(read_fully(&mut Trickle(10), &mut buf).unwrap(), 10);
        assert_eq!(&buf[..10], &[0xAB; 10]);
        assert_eq!(&buf[10..], &[0; 6]);
    }

    #[test]
    fn bank_count_caps_at_65536() {
        let plan = PatchPlan::new();
        let mut patcher = Patcher::read_rom0(&plan, &mut &[0u8; BANK_SIZE][..]).unwrap();
        let err = patcher
            .layout_from_len(MAX_BANKS as u64 * BANK_SIZE as u64)
            .unwrap_err();
        assert!(matches!(err, PatchError::TooManyBanks));
        patcher
            .layout_from_len(MAX_BANKS as u64 * BANK_SIZE as u64 - 1)
            .unwrap();
        assert_eq!(patcher.nb_banks, MAX_BANKS);
    }

    #[test]
    fn layout_rounds_to_a_power_of_two() {
        let mut plan = PatchPlan::new();
        plan.pad_value = Some(0);
        let mut patcher = Patcher::read_rom0(&plan, &mut &[0u8; BANK_SIZE][..]).unwrap();
        patcher.nb_banks = 3;
        patcher.total_romx_len = 2 * BANK_SIZE;
        patcher.settle_layout();
        assert_eq!(patcher.nb_banks, 4);
        assert_eq!(patcher.rom0[header::ROM_SIZE], 1);

        // 512 banks encodes as 8, and an exact power of two stays put.
        let mut patcher = Patcher::read_rom0(&plan, &mut &[0u8; BANK_SIZE][..]).unwrap();
        patcher.nb_banks = 512;
        patcher.total_romx_len = 511 * BANK_SIZE;
        patcher.settle_layout();
        assert_eq!(patcher.nb_banks, 512);
        assert_eq!(patcher.rom0[header::ROM_SIZE], 8);
    }
}
