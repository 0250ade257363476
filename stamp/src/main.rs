use std::fs::OpenOptions;
use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;

use sigil::header::HEADER_END;
use sigil::mbc::{parse_mbc, MbcParseError};
use sigil::{parse_byte, patch_in_place, patch_stream, FixSpec, Model, PatchPlan, Reporter};

/// Fixes a Game Boy ROM header after linking: title and flag bytes, optional padding up to the
/// next valid size, and the header and global checksums the boot ROM verifies.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Set the CGB flag to "CGB only" (0xC0)
    #[arg(short = 'C', long)]
    color_only: bool,

    /// Set the CGB flag to "CGB compatible" (0x80)
    #[arg(short = 'c', long)]
    color_compatible: bool,

    /// Fix or trash the logo (l/L), header checksum (h/H), and global checksum (g/G)
    #[arg(short = 'f', long, value_name = "FIX_SPEC")]
    fix_spec: Option<String>,

    /// Set the manufacturer code, up to 4 characters
    #[arg(short = 'i', long, value_name = "GAME_ID")]
    game_id: Option<String>,

    /// Mark the ROM as sold outside Japan
    #[arg(short = 'j', long)]
    non_japanese: bool,

    /// Set the new licensee code, 2 characters
    #[arg(short = 'k', long, value_name = "LICENSEE")]
    new_licensee: Option<String>,

    /// Set the old licensee byte
    #[arg(short = 'l', long, value_name = "LICENSEE_BYTE")]
    old_licensee: Option<String>,

    /// Set the cartridge type byte, by value or by name (e.g. "MBC5+RAM+BATTERY")
    #[arg(short = 'm', long, value_name = "MBC_TYPE")]
    mbc_type: Option<String>,

    /// Set the mask ROM version byte
    #[arg(short = 'n', long, value_name = "ROM_VERSION")]
    rom_version: Option<String>,

    /// Pad to the next valid size using this byte value
    #[arg(short = 'p', long, value_name = "PAD_VALUE")]
    pad_value: Option<String>,

    /// Set the cart RAM size byte
    #[arg(short = 'r', long, value_name = "RAM_SIZE")]
    ram_size: Option<String>,

    /// Set the SGB flag (0x03)
    #[arg(short = 's', long)]
    sgb_compatible: bool,

    /// Set the title, up to 16 characters depending on the other flags
    #[arg(short = 't', long, value_name = "TITLE")]
    title: Option<String>,

    /// Fix the header logo and both checksums (-f lhg)
    #[arg(short = 'v', long)]
    validate: bool,

    /// ROM files to fix; `-`, or no file at all, patches stdin to stdout
    #[arg(value_name = "FILE")]
    files: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .compact()
        .without_time()
        .with_target(false)
        .with_writer(io::stderr)
        .with_max_level(LevelFilter::INFO)
        .init();

    let args = Args::parse();
    let mut reporter = Reporter::new();
    let plan = build_plan(&args, &mut reporter);
    plan.warn_inconsistencies();

    // User errors at option parsing fail the run even when every file goes through cleanly.
    let mut failed = reporter.has_errors();

    if args.files.is_empty() {
        failed |= process_filename(&plan, "-");
    } else {
        for name in &args.files {
            failed |= process_filename(&plan, name);
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Folds the raw arguments into the read-only patch plan, reporting malformed values and
/// warning about truncations as it goes.
fn build_plan(args: &Args, reporter: &mut Reporter) -> PatchPlan {
    let mut plan = PatchPlan::new();

    if args.color_only {
        plan.set_model(Model::Cgb);
    } else if args.color_compatible {
        plan.set_model(Model::Both);
    }

    if args.validate {
        plan.fix_spec = FixSpec::VALIDATE;
    }
    // An explicit fix spec wins over --validate.
    if let Some(spec) = &args.fix_spec {
        plan.fix_spec = FixSpec::parse(spec);
    }

    plan.japanese = !args.non_japanese;
    plan.sgb = args.sgb_compatible;

    if let Some(id) = &args.game_id {
        plan.set_game_id(id);
    }
    if let Some(licensee) = &args.new_licensee {
        plan.set_new_licensee(licensee);
    }
    if let Some(title) = &args.title {
        plan.set_title(title);
    }

    if let Some(arg) = &args.old_licensee {
        plan.old_licensee = parse_byte(arg, 'l', reporter);
    }
    if let Some(arg) = &args.rom_version {
        plan.rom_version = parse_byte(arg, 'n', reporter);
    }
    if let Some(arg) = &args.pad_value {
        plan.pad_value = parse_byte(arg, 'p', reporter);
    }
    if let Some(arg) = &args.ram_size {
        plan.ram_size = parse_byte(arg, 'r', reporter);
    }

    if let Some(spec) = &args.mbc_type {
        match parse_mbc(spec) {
            Ok(mbc) => plan.mbc = Some(mbc),
            Err(MbcParseError::BadSyntax) => {
                reporter.error(format_args!("unknown MBC \"{spec}\""));
            }
            Err(MbcParseError::IncompatibleFeatures) => {
                reporter.error(format_args!("features incompatible with MBC (\"{spec}\")"));
            }
            Err(MbcParseError::OutOfRange) => {
                reporter.error(format_args!("specified MBC ID out of range 0-255: {spec}"));
            }
        }
    }

    plan
}

/// Patches one file (or the standard streams, for `-`). Returns whether the file failed.
fn process_filename(plan: &PatchPlan, name: &str) -> bool {
    let mut reporter = Reporter::new();
    if name == "-" {
        let stdin = io::stdin();
        let stdout = io::stdout();
        if let Err(e) = patch_stream(plan, &mut stdin.lock(), &mut stdout.lock()) {
            reporter.error(format_args!("FATAL: \"<stdin>\" {e}"));
        }
        finish_file("<stdin>", &reporter)
    } else {
        patch_path(plan, name, &mut reporter);
        finish_file(name, &reporter)
    }
}

fn patch_path(plan: &PatchPlan, name: &str, reporter: &mut Reporter) {
    let mut file = match OpenOptions::new().read(true).write(true).open(name) {
        Ok(file) => file,
        Err(e) => {
            reporter.error(format_args!(
                "FATAL: failed to open \"{name}\" for reading+writing: {e}"
            ));
            return;
        }
    };
    let metadata = match file.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            reporter.error(format_args!("FATAL: failed to stat \"{name}\": {e}"));
            return;
        }
    };
    if !metadata.is_file() {
        // Only `-` gets pipe treatment; anything else must be rewindable.
        reporter.error(format_args!(
            "FATAL: \"{name}\" is not a regular file, and thus cannot be modified in-place"
        ));
        return;
    }
    if metadata.len() < HEADER_END as u64 {
        // Redundant with the in-place check, but catches it before any I/O happens.
        reporter.error(format_args!(
            "FATAL: \"{name}\" too short, expected at least 336 ($150) bytes, got only {}",
            metadata.len()
        ));
        return;
    }
    if let Err(e) = patch_in_place(plan, &mut file, metadata.len()) {
        reporter.error(format_args!("FATAL: \"{name}\" {e}"));
    }
}

fn finish_file(name: &str, reporter: &Reporter) -> bool {
    let errors = reporter.errors();
    if errors != 0 {
        warn!(
            "fixing \"{name}\" failed with {errors} error{}",
            if errors == 1 { "" } else { "s" }
        );
    }
    errors != 0
}
