//! The cartridge type byte at `0x147` names the memory bank controller soldered onto the cart,
//! plus whichever extras (RAM, battery, timer, rumble, sensor) it is wired to. Only certain
//! combinations were ever manufactured, so the value set is closed.
//!
//! See the list [here](https://gbdev.io/pandocs/The_Cartridge_Header.html#0147--cartridge-type).
//!
//! Users spell the value either as a plain number (`"0x1B"`) or as a descriptor
//! (`"MBC5+RAM+BATTERY"`, `"ROM ONLY"`); [`parse_mbc`] turns both into a byte.

use std::num::IntErrorKind;

use thiserror::Error;

/// One of the cartridge types that actually exists. The discriminant is the header byte.
///
/// Values a descriptor cannot produce (there is no such hardware) are not representable here;
/// a raw numeric request for one of those bytes is carried by [`MbcByte::Raw`] instead.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, derive_more::Display)]
#[repr(u8)]
pub enum MbcKind {
    #[display("ROM")]
    Rom = 0x00,
    #[display("ROM+RAM")]
    RomRam = 0x08,
    #[display("ROM+RAM+BATTERY")]
    RomRamBattery = 0x09,

    #[display("MBC1")]
    Mbc1 = 0x01,
    #[display("MBC1+RAM")]
    Mbc1Ram = 0x02,
    #[display("MBC1+RAM+BATTERY")]
    Mbc1RamBattery = 0x03,

    #[display("MBC2")]
    Mbc2 = 0x05,
    #[display("MBC2+BATTERY")]
    Mbc2Battery = 0x06,

    #[display("MMM01")]
    Mmm01 = 0x0B,
    #[display("MMM01+RAM")]
    Mmm01Ram = 0x0C,
    #[display("MMM01+RAM+BATTERY")]
    Mmm01RamBattery = 0x0D,

    #[display("MBC3+TIMER+BATTERY")]
    Mbc3TimerBattery = 0x0F,
    #[display("MBC3+TIMER+RAM+BATTERY")]
    Mbc3TimerRamBattery = 0x10,
    #[display("MBC3")]
    Mbc3 = 0x11,
    #[display("MBC3+RAM")]
    Mbc3Ram = 0x12,
    #[display("MBC3+RAM+BATTERY")]
    Mbc3RamBattery = 0x13,

    #[display("MBC5")]
    Mbc5 = 0x19,
    #[display("MBC5+RAM")]
    Mbc5Ram = 0x1A,
    #[display("MBC5+RAM+BATTERY")]
    Mbc5RamBattery = 0x1B,
    #[display("MBC5+RUMBLE")]
    Mbc5Rumble = 0x1C,
    #[display("MBC5+RUMBLE+RAM")]
    Mbc5RumbleRam = 0x1D,
    #[display("MBC5+RUMBLE+RAM+BATTERY")]
    Mbc5RumbleRamBattery = 0x1E,

    #[display("MBC6")]
    Mbc6 = 0x20,

    #[display("MBC7+SENSOR+RUMBLE+RAM+BATTERY")]
    Mbc7SensorRumbleRamBattery = 0x22,

    #[display("POCKET CAMERA")]
    PocketCamera = 0xFC,

    #[display("BANDAI TAMA5")]
    BandaiTama5 = 0xFD,

    #[display("HUC3")]
    Huc3 = 0xFE,

    #[display("HUC1+RAM+BATTERY")]
    Huc1RamBattery = 0xFF,
}

impl MbcKind {
    /// The header byte for this cartridge type.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use MbcKind::*;
        let kind = match code {
            0x00 => Rom,
            0x08 => RomRam,
            0x09 => RomRamBattery,
            0x01 => Mbc1,
            0x02 => Mbc1Ram,
            0x03 => Mbc1RamBattery,
            0x05 => Mbc2,
            0x06 => Mbc2Battery,
            0x0B => Mmm01,
            0x0C => Mmm01Ram,
            0x0D => Mmm01RamBattery,
            0x0F => Mbc3TimerBattery,
            0x10 => Mbc3TimerRamBattery,
            0x11 => Mbc3,
            0x12 => Mbc3Ram,
            0x13 => Mbc3RamBattery,
            0x19 => Mbc5,
            0x1A => Mbc5Ram,
            0x1B => Mbc5RamBattery,
            0x1C => Mbc5Rumble,
            0x1D => Mbc5RumbleRam,
            0x1E => Mbc5RumbleRamBattery,
            0x20 => Mbc6,
            0x22 => Mbc7SensorRumbleRamBattery,
            0xFC => PocketCamera,
            0xFD => BandaiTama5,
            0xFE => Huc3,
            0xFF => Huc1RamBattery,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether this cartridge type exposes external RAM, as far as the header byte tells.
    ///
    /// MBC2 carts do carry RAM on the controller itself but their type bytes are not marked as
    /// such, so they answer `false` here. MBC6 and TAMA5 answer `false` as well; the answer only
    /// feeds an advisory warning, never the patched output.
    pub fn has_ram(self) -> bool {
        use MbcKind::*;
        match self {
            Rom | Mbc1 | Mbc2 | Mbc2Battery | Mmm01 | Mbc3 | Mbc3TimerBattery | Mbc5
            | Mbc5Rumble | Mbc6 | BandaiTama5 => false,

            RomRam | RomRamBattery | Mbc1Ram | Mbc1RamBattery | Mmm01Ram | Mmm01RamBattery
            | Mbc3TimerRamBattery | Mbc3Ram | Mbc3RamBattery | Mbc5Ram | Mbc5RamBattery
            | Mbc5RumbleRam | Mbc5RumbleRamBattery | Mbc7SensorRumbleRamBattery | PocketCamera
            | Huc3 | Huc1RamBattery => true,
        }
    }
}

/// A value destined for the cartridge type byte. Descriptors always resolve to a known kind;
/// numeric requests are honored as-is even when no such cartridge exists.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum MbcByte {
    Known(MbcKind),
    Raw(u8),
}

impl MbcByte {
    pub fn from_byte(byte: u8) -> Self {
        match MbcKind::from_code(byte) {
            Some(kind) => Self::Known(kind),
            None => Self::Raw(byte),
        }
    }

    /// The byte to store at `0x147`.
    pub fn code(self) -> u8 {
        match self {
            Self::Known(kind) => kind.code(),
            Self::Raw(byte) => byte,
        }
    }

    pub fn kind(self) -> Option<MbcKind> {
        match self {
            Self::Known(kind) => Some(kind),
            Self::Raw(_) => None,
        }
    }
}

impl From<MbcKind> for MbcByte {
    fn from(kind: MbcKind) -> Self {
        Self::Known(kind)
    }
}

/// Ways a cartridge type descriptor can fail to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MbcParseError {
    /// The descriptor names no known controller, or has junk left over.
    #[error("unknown MBC")]
    BadSyntax,
    /// The controller exists but was never wired with that feature combination.
    #[error("features incompatible with MBC")]
    IncompatibleFeatures,
    /// A numeric descriptor does not fit in the cartridge type byte.
    #[error("MBC ID out of range 0-255")]
    OutOfRange,
}

/// The controller families a descriptor can start with, before any `+FEATURE` suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Rom,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Mbc6,
    Mbc7,
    Mmm01,
    PocketCamera,
    Tama5,
    Huc1,
    Huc3,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Features {
    ram: bool,
    battery: bool,
    timer: bool,
    rumble: bool,
    sensor: bool,
}

/// Parses a cartridge type descriptor.
///
/// Numbers (decimal, `0x` hex, or `$` hex) resolve to their byte directly, with no feature
/// validation. Named descriptors are matched case-insensitively, with `_` accepted wherever a
/// space is, and whitespace tolerated around each `+`.
pub fn parse_mbc(name: &str) -> Result<MbcByte, MbcParseError> {
    if name.as_bytes().first().is_some_and(|b| b.is_ascii_digit()) || name.starts_with('$') {
        return parse_numeric(name);
    }

    let mut scanner = Scanner::new(name.as_bytes());
    scanner.skip_whitespace();
    let family = scanner.family()?;
    let features = scanner.features()?;
    resolve(family, features).map(MbcByte::Known)
}

fn parse_numeric(name: &str) -> Result<MbcByte, MbcParseError> {
    let (digits, radix) = if let Some(hex) = name.strip_prefix('$') {
        (hex, 16)
    } else if let Some(hex) = name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        (hex, 16)
    } else {
        (name, 10)
    };
    match u32::from_str_radix(digits, radix) {
        Ok(value) if value > 0xFF => Err(MbcParseError::OutOfRange),
        Ok(value) => Ok(MbcByte::from_byte(value as u8)),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Err(MbcParseError::OutOfRange),
        Err(_) => Err(MbcParseError::BadSyntax),
    }
}

/// Maps a family and its requested features onto the cartridge type byte that was actually
/// manufactured, or rejects the combination. This table is the authority; the numeric adjacency
/// of some codes (e.g. `MBC1` and `MBC1+RAM`) is a coincidence of the byte assignment and is
/// not relied upon.
fn resolve(family: Family, features: Features) -> Result<MbcKind, MbcParseError> {
    use MbcKind::*;

    let Features {
        ram,
        battery,
        timer,
        rumble,
        sensor,
    } = features;

    // Columns: family, RAM, BATTERY, TIMER, RUMBLE, SENSOR.
    let kind = match (family, ram, battery, timer, rumble, sensor) {
        (Family::Rom, false, false, false, false, false) => Rom,
        (Family::Rom, true, false, false, false, false) => RomRam,
        (Family::Rom, true, true, false, false, false) => RomRamBattery,

        (Family::Mbc1, false, false, false, false, false) => Mbc1,
        (Family::Mbc1, true, false, false, false, false) => Mbc1Ram,
        (Family::Mbc1, true, true, false, false, false) => Mbc1RamBattery,

        (Family::Mbc2, false, false, false, false, false) => Mbc2,
        (Family::Mbc2, false, true, false, false, false) => Mbc2Battery,

        (Family::Mmm01, false, false, false, false, false) => Mmm01,
        (Family::Mmm01, true, false, false, false, false) => Mmm01Ram,
        (Family::Mmm01, true, true, false, false, false) => Mmm01RamBattery,

        (Family::Mbc3, false, false, false, false, false) => Mbc3,
        (Family::Mbc3, true, false, false, false, false) => Mbc3Ram,
        (Family::Mbc3, true, true, false, false, false) => Mbc3RamBattery,
        (Family::Mbc3, false, true, true, false, false) => Mbc3TimerBattery,
        (Family::Mbc3, true, true, true, false, false) => Mbc3TimerRamBattery,

        (Family::Mbc5, false, false, false, false, false) => Mbc5,
        (Family::Mbc5, true, false, false, false, false) => Mbc5Ram,
        (Family::Mbc5, true, true, false, false, false) => Mbc5RamBattery,
        (Family::Mbc5, false, false, false, true, false) => Mbc5Rumble,
        (Family::Mbc5, true, false, false, true, false) => Mbc5RumbleRam,
        (Family::Mbc5, true, true, false, true, false) => Mbc5RumbleRamBattery,

        (Family::Mbc6, false, false, false, false, false) => Mbc6,

        (Family::Mbc7, true, true, false, true, true) => Mbc7SensorRumbleRamBattery,

        (Family::PocketCamera, false, false, false, false, false) => PocketCamera,
        (Family::Tama5, false, false, false, false, false) => BandaiTama5,
        (Family::Huc3, false, false, false, false, false) => Huc3,

        (Family::Huc1, true, true, false, false, false) => Huc1RamBattery,

        _ => return Err(MbcParseError::IncompatibleFeatures),
    };
    Ok(kind)
}

/// Walks descriptor bytes one at a time, folding case and treating `_` as a space.
struct Scanner<'a> {
    rest: &'a [u8],
}

impl<'a> Scanner<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Self { rest }
    }

    fn bump(&mut self) -> Option<u8> {
        let (&byte, rest) = self.rest.split_first()?;
        self.rest = rest;
        Some(if byte == b'_' {
            b' '
        } else {
            byte.to_ascii_uppercase()
        })
    }

    fn expect(&mut self, tail: &str) -> Result<(), MbcParseError> {
        for expected in tail.bytes() {
            if self.bump() != Some(expected) {
                return Err(MbcParseError::BadSyntax);
            }
        }
        Ok(())
    }

    fn peek(&self) -> Option<u8> {
        self.rest.first().map(|&b| {
            if b == b'_' {
                b' '
            } else {
                b.to_ascii_uppercase()
            }
        })
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t') = self.rest.first() {
            self.rest = &self.rest[1..];
        }
    }

    /// Like [`Self::skip_whitespace`], but `_` also counts once a family name has been read.
    fn skip_separators(&mut self) {
        while let Some(b' ' | b'\t' | b'_') = self.rest.first() {
            self.rest = &self.rest[1..];
        }
    }

    fn family(&mut self) -> Result<Family, MbcParseError> {
        let family = match self.bump().ok_or(MbcParseError::BadSyntax)? {
            b'R' => {
                self.expect("OM")?;
                // Optional " ONLY"
                self.skip_separators();
                if self.peek() == Some(b'O') {
                    self.bump();
                    self.expect("NLY")?;
                }
                Family::Rom
            }
            b'M' => match self.bump().ok_or(MbcParseError::BadSyntax)? {
                b'B' => {
                    self.expect("C")?;
                    match self.bump().ok_or(MbcParseError::BadSyntax)? {
                        b'1' => Family::Mbc1,
                        b'2' => Family::Mbc2,
                        b'3' => Family::Mbc3,
                        b'5' => Family::Mbc5,
                        b'6' => Family::Mbc6,
                        b'7' => Family::Mbc7,
                        _ => return Err(MbcParseError::BadSyntax),
                    }
                }
                b'M' => {
                    self.expect("M01")?;
                    Family::Mmm01
                }
                _ => return Err(MbcParseError::BadSyntax),
            },
            b'P' => {
                self.expect("OCKET CAMERA")?;
                Family::PocketCamera
            }
            b'B' => {
                self.expect("ANDAI TAMA5")?;
                Family::Tama5
            }
            b'T' => {
                self.expect("AMA5")?;
                Family::Tama5
            }
            b'H' => {
                self.expect("UC")?;
                match self.bump().ok_or(MbcParseError::BadSyntax)? {
                    b'1' => Family::Huc1,
                    b'3' => Family::Huc3,
                    _ => return Err(MbcParseError::BadSyntax),
                }
            }
            _ => return Err(MbcParseError::BadSyntax),
        };
        Ok(family)
    }

    fn features(&mut self) -> Result<Features, MbcParseError> {
        let mut features = Features::default();
        loop {
            self.skip_separators();
            if self.rest.is_empty() {
                return Ok(features);
            }
            if self.bump() != Some(b'+') {
                return Err(MbcParseError::BadSyntax);
            }
            self.skip_separators();
            match self.bump().ok_or(MbcParseError::BadSyntax)? {
                b'B' => {
                    self.expect("ATTERY")?;
                    features.battery = true;
                }
                b'R' => match self.bump().ok_or(MbcParseError::BadSyntax)? {
                    b'U' => {
                        self.expect("MBLE")?;
                        features.rumble = true;
                    }
                    b'A' => {
                        self.expect("M")?;
                        features.ram = true;
                    }
                    _ => return Err(MbcParseError::BadSyntax),
                },
                b'S' => {
                    self.expect("ENSOR")?;
                    features.sensor = true;
                }
                b'T' => {
                    self.expect("IMER")?;
                    features.timer = true;
                }
                _ => return Err(MbcParseError::BadSyntax),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(kind: MbcKind) -> Result<MbcByte, MbcParseError> {
        Ok(MbcByte::Known(kind))
    }

    #[test]
    fn bare_families() {
        assert_eq!(parse_mbc("ROM"), known(MbcKind::Rom));
        assert_eq!(parse_mbc("ROM ONLY"), known(MbcKind::Rom));
        assert_eq!(parse_mbc("ROM_ONLY"), known(MbcKind::Rom));
        assert_eq!(parse_mbc("ROMONLY"), known(MbcKind::Rom));
        assert_eq!(parse_mbc("MBC1"), known(MbcKind::Mbc1));
        assert_eq!(parse_mbc("MBC2"), known(MbcKind::Mbc2));
        assert_eq!(parse_mbc("MBC3"), known(MbcKind::Mbc3));
        assert_eq!(parse_mbc("MBC5"), known(MbcKind::Mbc5));
        assert_eq!(parse_mbc("MBC6"), known(MbcKind::Mbc6));
        assert_eq!(parse_mbc("MMM01"), known(MbcKind::Mmm01));
        assert_eq!(parse_mbc("POCKET CAMERA"), known(MbcKind::PocketCamera));
        assert_eq!(parse_mbc("POCKET_CAMERA"), known(MbcKind::PocketCamera));
        assert_eq!(parse_mbc("BANDAI TAMA5"), known(MbcKind::BandaiTama5));
        assert_eq!(parse_mbc("TAMA5"), known(MbcKind::BandaiTama5));
        assert_eq!(parse_mbc("HUC3"), known(MbcKind::Huc3));
    }

    #[test]
    fn feature_suffixes() {
        assert_eq!(parse_mbc("MBC1+RAM"), known(MbcKind::Mbc1Ram));
        assert_eq!(parse_mbc("MBC1+RAM+BATTERY"), known(MbcKind::Mbc1RamBattery));
        assert_eq!(parse_mbc("MBC2+BATTERY"), known(MbcKind::Mbc2Battery));
        assert_eq!(
            parse_mbc("MBC3+TIMER+BATTERY"),
            known(MbcKind::Mbc3TimerBattery)
        );
        assert_eq!(
            parse_mbc("MBC3+TIMER+RAM+BATTERY"),
            known(MbcKind::Mbc3TimerRamBattery)
        );
        assert_eq!(
            parse_mbc("MBC5+RUMBLE+RAM+BATTERY"),
            known(MbcKind::Mbc5RumbleRamBattery)
        );
        assert_eq!(parse_mbc("HUC1+RAM+BATTERY"), known(MbcKind::Huc1RamBattery));
    }

    #[test]
    fn case_underscores_and_spacing() {
        assert_eq!(
            parse_mbc("mbc7+sensor+rumble+ram+battery"),
            known(MbcKind::Mbc7SensorRumbleRamBattery)
        );
        assert_eq!(
            parse_mbc("  MBC5 + rumble + RAM "),
            known(MbcKind::Mbc5RumbleRam)
        );
        assert_eq!(
            parse_mbc("mbc3_+_timer_+_battery"),
            known(MbcKind::Mbc3TimerBattery)
        );
    }

    #[test]
    fn numeric_forms() {
        assert_eq!(parse_mbc("0"), known(MbcKind::Rom));
        assert_eq!(parse_mbc("27"), known(MbcKind::Mbc5RamBattery));
        assert_eq!(parse_mbc("0x1B"), known(MbcKind::Mbc5RamBattery));
        assert_eq!(parse_mbc("$1B"), known(MbcKind::Mbc5RamBattery));
        assert_eq!(parse_mbc("255"), known(MbcKind::Huc1RamBattery));
        // Bytes with no named counterpart still pass through untouched.
        assert_eq!(parse_mbc("0x50"), Ok(MbcByte::Raw(0x50)));
        assert_eq!(parse_mbc("0x50").unwrap().code(), 0x50);
    }

    #[test]
    fn numeric_out_of_range() {
        assert_eq!(parse_mbc("256"), Err(MbcParseError::OutOfRange));
        assert_eq!(parse_mbc("0x100"), Err(MbcParseError::OutOfRange));
        assert_eq!(parse_mbc("99999999999999999999"), Err(MbcParseError::OutOfRange));
    }

    #[test]
    fn rejects_unknown_feature_sets() {
        assert_eq!(parse_mbc("MBC2+RAM"), Err(MbcParseError::IncompatibleFeatures));
        assert_eq!(parse_mbc("MBC6+RAM"), Err(MbcParseError::IncompatibleFeatures));
        assert_eq!(parse_mbc("MBC7+RAM"), Err(MbcParseError::IncompatibleFeatures));
        assert_eq!(parse_mbc("HUC1"), Err(MbcParseError::IncompatibleFeatures));
        assert_eq!(
            parse_mbc("ROM+SENSOR"),
            Err(MbcParseError::IncompatibleFeatures)
        );
        assert_eq!(
            parse_mbc("MBC3+TIMER"),
            Err(MbcParseError::IncompatibleFeatures)
        );
    }

    #[test]
    fn rejects_bad_syntax() {
        assert_eq!(parse_mbc(""), Err(MbcParseError::BadSyntax));
        assert_eq!(parse_mbc("MBC4"), Err(MbcParseError::BadSyntax));
        assert_eq!(parse_mbc("MBC1 RAM"), Err(MbcParseError::BadSyntax));
        assert_eq!(parse_mbc("MBC1+"), Err(MbcParseError::BadSyntax));
        assert_eq!(parse_mbc("MBC1+RAMX"), Err(MbcParseError::BadSyntax));
        assert_eq!(parse_mbc("MBC1 junk"), Err(MbcParseError::BadSyntax));
        assert_eq!(parse_mbc("12three"), Err(MbcParseError::BadSyntax));
        assert_eq!(parse_mbc("_MBC1"), Err(MbcParseError::BadSyntax));
    }

    #[test]
    fn every_code_round_trips_through_from_code() {
        for code in 0..=0xFFu8 {
            if let Some(kind) = MbcKind::from_code(code) {
                assert_eq!(kind.code(), code);
                // A named kind formats to a descriptor that parses back to itself.
                assert_eq!(parse_mbc(&kind.to_string()), Ok(MbcByte::Known(kind)));
            }
        }
    }

    #[test]
    fn ram_predicate_matches_the_byte_names() {
        assert!(!MbcKind::Rom.has_ram());
        assert!(MbcKind::RomRam.has_ram());
        assert!(!MbcKind::Mbc2Battery.has_ram());
        assert!(MbcKind::Mbc5RumbleRamBattery.has_ram());
        assert!(!MbcKind::Mbc6.has_ram());
        assert!(!MbcKind::BandaiTama5.has_ram());
        assert!(MbcKind::PocketCamera.has_ram());
    }
}
