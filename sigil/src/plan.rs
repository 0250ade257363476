//! Everything the user asked to change about a header, gathered into one read-only value before
//! any file is opened. The patching passes in [`crate::patch`] only ever consult this plan; they
//! never look back at the command line.

use tracing::warn;

use crate::mbc::{MbcByte, MbcKind};
use crate::report::Reporter;

/// Which hardware the cartridge claims to run on, via the byte at `0x143`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Model {
    /// Leave the byte alone.
    #[default]
    #[display("DMG")]
    Dmg,
    /// `0x80`: color-enhanced, still runs on monochrome hardware.
    #[display("BOTH")]
    Both,
    /// `0xC0`: color only.
    #[display("CGB")]
    Cgb,
}

const FIX_LOGO: u8 = 0x80;
const TRASH_LOGO: u8 = 0x40;
const FIX_HEADER_SUM: u8 = 0x20;
const TRASH_HEADER_SUM: u8 = 0x10;
const FIX_GLOBAL_SUM: u8 = 0x08;
const TRASH_GLOBAL_SUM: u8 = 0x04;

/// Which of the logo, header checksum, and global checksum to rewrite, and whether to write the
/// correct value ("fix") or its complement ("trash", for exercising boot ROM reject paths).
/// Fixing and trashing the same field are mutually exclusive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FixSpec(u8);

impl FixSpec {
    /// `-v`: fix the logo and both checksums, i.e. `lhg`.
    pub const VALIDATE: Self = Self(FIX_LOGO | FIX_HEADER_SUM | FIX_GLOBAL_SUM);

    /// Reads a fix spec string, one flag per character: `l`/`L` fix/trash the logo, `h`/`H` the
    /// header checksum, `g`/`G` the global checksum. A later character silently wins over its
    /// paired opposite, modulo a warning; anything else is ignored with a warning.
    pub fn parse(spec: &str) -> Self {
        let mut out = Self::default();
        for c in spec.chars() {
            let (bit, opposite) = match c {
                'l' => (FIX_LOGO, TRASH_LOGO),
                'L' => (TRASH_LOGO, FIX_LOGO),
                'h' => (FIX_HEADER_SUM, TRASH_HEADER_SUM),
                'H' => (TRASH_HEADER_SUM, FIX_HEADER_SUM),
                'g' => (FIX_GLOBAL_SUM, TRASH_GLOBAL_SUM),
                'G' => (TRASH_GLOBAL_SUM, FIX_GLOBAL_SUM),
                _ => {
                    warn!("ignoring '{c}' in fix spec");
                    continue;
                }
            };
            if out.0 & opposite != 0 {
                let shadowed = if c.is_ascii_lowercase() {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                };
                warn!("'{c}' overriding '{shadowed}' in fix spec");
            }
            out.0 = (out.0 & !opposite) | bit;
        }
        out
    }

    pub fn fix_logo(self) -> bool {
        self.0 & FIX_LOGO != 0
    }

    pub fn trash_logo(self) -> bool {
        self.0 & TRASH_LOGO != 0
    }

    pub fn fix_header_sum(self) -> bool {
        self.0 & FIX_HEADER_SUM != 0
    }

    pub fn trash_header_sum(self) -> bool {
        self.0 & TRASH_HEADER_SUM != 0
    }

    pub fn fix_global_sum(self) -> bool {
        self.0 & FIX_GLOBAL_SUM != 0
    }

    pub fn trash_global_sum(self) -> bool {
        self.0 & TRASH_GLOBAL_SUM != 0
    }
}

/// The set of header edits one invocation applies to every file it touches. Assembled once,
/// read-only afterwards. `None` always means "leave the ROM's byte alone".
#[derive(Debug, Clone)]
pub struct PatchPlan {
    pub model: Model,
    pub fix_spec: FixSpec,
    pub game_id: Option<Vec<u8>>,
    pub japanese: bool,
    pub new_licensee: Option<Vec<u8>>,
    pub old_licensee: Option<u8>,
    pub mbc: Option<MbcByte>,
    pub rom_version: Option<u8>,
    pub pad_value: Option<u8>,
    pub ram_size: Option<u8>,
    pub sgb: bool,
    pub title: Option<Vec<u8>>,
}

impl Default for PatchPlan {
    fn default() -> Self {
        Self {
            model: Model::default(),
            fix_spec: FixSpec::default(),
            game_id: None,
            japanese: true,
            new_licensee: None,
            old_licensee: None,
            mbc: None,
            rom_version: None,
            pad_value: None,
            ram_size: None,
            sgb: false,
            title: None,
        }
    }
}

impl PatchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a title may be under the current plan: the last byte of the title region doubles
    /// as the CGB flag on color-aware carts, and the last 4 bytes as the manufacturer code when
    /// a game ID is set.
    pub fn max_title_len(&self) -> usize {
        if self.game_id.is_some() {
            11
        } else if self.model != Model::Dmg {
            15
        } else {
            16
        }
    }

    pub fn set_model(&mut self, model: Model) {
        self.model = model;
        if model != Model::Dmg {
            self.clamp_title(15);
        }
    }

    pub fn set_title(&mut self, title: &str) {
        let max = self.max_title_len();
        let mut bytes = title.as_bytes().to_vec();
        if bytes.len() > max {
            warn!("truncating title {title:?} to {max} chars");
            bytes.truncate(max);
        }
        self.title = Some(bytes);
    }

    pub fn set_game_id(&mut self, id: &str) {
        let mut bytes = id.as_bytes().to_vec();
        if bytes.len() > 4 {
            warn!("truncating game ID {id:?} to 4 chars");
            bytes.truncate(4);
        }
        self.game_id = Some(bytes);
        self.clamp_title(11);
    }

    pub fn set_new_licensee(&mut self, licensee: &str) {
        let mut bytes = licensee.as_bytes().to_vec();
        if bytes.len() > 2 {
            warn!("truncating new licensee {licensee:?} to 2 chars");
            bytes.truncate(2);
        }
        self.new_licensee = Some(bytes);
    }

    fn clamp_title(&mut self, max: usize) {
        if let Some(title) = &mut self.title {
            if title.len() > max {
                warn!(
                    "truncating title {:?} to {max} chars",
                    String::from_utf8_lossy(title)
                );
                title.truncate(max);
            }
        }
    }

    /// Points out option combinations that are legal but almost certainly not what the user
    /// meant. Purely advisory; nothing here changes the output or fails the run.
    pub fn warn_inconsistencies(&self) {
        let kind = self.mbc.and_then(MbcByte::kind);

        if matches!(kind, Some(MbcKind::RomRam | MbcKind::RomRamBattery)) {
            warn!("ROM+RAM / ROM+RAM+BATTERY are under-specified and poorly supported");
        }

        if let (Some(ram_size), Some(kind)) = (self.ram_size, kind) {
            if matches!(kind, MbcKind::RomRam | MbcKind::RomRamBattery) {
                if ram_size != 1 {
                    warn!("MBC \"{kind}\" should have 2 KiB of RAM (-r 1)");
                }
            } else if kind.has_ram() {
                if ram_size == 0 {
                    warn!("MBC \"{kind}\" has RAM, but RAM size was set to 0");
                } else if ram_size == 1 {
                    warn!("RAM size 1 (2 KiB) was specified for MBC \"{kind}\"");
                }
            } else if ram_size != 0 {
                warn!("MBC \"{kind}\" has no RAM, but RAM size was set to {ram_size}");
            }
        }

        if let (true, Some(licensee)) = (self.sgb, self.old_licensee) {
            if licensee != 0x33 {
                warn!("SGB compatibility enabled, but old licensee is 0x{licensee:02X}, not 0x33");
            }
        }
    }
}

/// Parses a byte-valued option argument: decimal, `0x`-prefixed hex, or `$`-prefixed hex.
/// Anything unparsable or above 255 is reported as a user error and yields `None`.
pub fn parse_byte(arg: &str, option: char, reporter: &mut Reporter) -> Option<u8> {
    if arg.is_empty() {
        reporter.error(format!("argument to option '{option}' may not be empty"));
        return None;
    }
    let (digits, radix) = if let Some(hex) = arg.strip_prefix('$') {
        (hex, 16)
    } else if let Some(hex) = arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        (hex, 16)
    } else {
        (arg, 10)
    };
    match u32::from_str_radix(digits, radix) {
        Ok(value) if value <= 0xFF => Some(value as u8),
        Ok(value) => {
            reporter.error(format!(
                "argument to option '{option}' is larger than 255: {value}"
            ));
            None
        }
        Err(_) => {
            reporter.error(format!(
                "expected number as argument to option '{option}', got {arg}"
            ));
            None
        }
    }
}
