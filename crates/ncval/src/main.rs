//! CLI entry point for the `ncval` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ncval::settings::{parse_address, parse_architecture, parse_branch_targets, parse_mode};
use ncval::{
    render_cross_check, render_listing, render_report, CliError, Settings, EXIT_ACCEPT,
    EXIT_REJECT, EXIT_USAGE,
};
use serde as _;
use sfi_validator::{
    cross_check_all, Architecture, BranchTargetPolicy, ExhaustiveEnumerator, ProductionX86Decoder,
    RandomEnumerator, ReferenceX86Decoder, ValidationMode, Validator,
};
#[cfg(test)]
use tempfile as _;
use thiserror as _;
use toml as _;

/// Disagreements printed by `cross-check`.
const DISAGREEMENT_LIMIT: usize = 20;

/// Static validator for sandboxed machine code.
#[derive(Debug, Parser)]
#[command(name = "ncval", version, about)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a raw code segment.
    Validate {
        /// Segment bytes.
        file: PathBuf,
        /// Target encoding: arm or x86-32.
        #[arg(long, value_parser = parse_architecture)]
        arch: Option<Architecture>,
        /// Bundle size in bytes.
        #[arg(long)]
        bundle_size: Option<u32>,
        /// Address of the first byte.
        #[arg(long, value_parser = parse_address)]
        base: Option<u32>,
        /// strict or diagnostic.
        #[arg(long, value_parser = parse_mode)]
        mode: Option<ValidationMode>,
        /// bundle-start or instruction-boundary.
        #[arg(long, value_parser = parse_branch_targets)]
        targets: Option<BranchTargetPolicy>,
        /// TOML settings file; flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print one line per decoded instruction.
    Decode {
        /// Segment bytes.
        file: PathBuf,
        /// Target encoding: arm or x86-32.
        #[arg(long, value_parser = parse_architecture)]
        arch: Option<Architecture>,
        /// Address of the first byte.
        #[arg(long, value_parser = parse_address)]
        base: Option<u32>,
    },
    /// Compare the x86-32 decoder against the reference length tables.
    CrossCheck {
        /// Leading bytes enumerated exhaustively.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
        bytes: u8,
        /// Additional random trials.
        #[arg(long, default_value_t = 0)]
        random: usize,
        /// Seed for the random trials.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn read_input(path: &Path) -> Result<Vec<u8>, CliError> {
    fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn run_validate(file: &Path, config: Option<&Path>, flags: Settings) -> Result<u8, CliError> {
    let settings = match config {
        Some(path) => Settings::load(path)?.merge(flags),
        None => flags,
    };
    let config = settings.to_config()?;
    let validator = Validator::new(config)?;
    let code = read_input(file)?;
    log::info!(
        "{}: {} byte(s) as {} at {:#x}",
        file.display(),
        code.len(),
        config.architecture,
        settings.base()
    );
    let report = validator.validate_with_report(settings.base(), &code);
    print!("{}", render_report(&report));
    Ok(if report.verdict.is_accept() {
        EXIT_ACCEPT
    } else {
        EXIT_REJECT
    })
}

fn run_decode(file: &Path, settings: Settings) -> Result<u8, CliError> {
    let config = settings.to_config()?;
    let code = read_input(file)?;
    print!("{}", render_listing(config.architecture, &code, settings.base()));
    Ok(EXIT_ACCEPT)
}

fn run_cross_check(bytes: u8, random: usize, seed: u64) -> u8 {
    let tail = vec![0u8; 15 - usize::from(bytes)];
    let mut trials: Vec<Vec<u8>> = ExhaustiveEnumerator::new(bytes, tail).patterns().collect();
    trials.extend(RandomEnumerator::new(seed, 15).take(random));
    let summary = cross_check_all(&ProductionX86Decoder, &ReferenceX86Decoder, &trials);
    print!("{}", render_cross_check(&summary, DISAGREEMENT_LIMIT));
    if summary.is_clean() {
        EXIT_ACCEPT
    } else {
        EXIT_REJECT
    }
}

fn run(command: Command) -> Result<u8, CliError> {
    match command {
        Command::Validate {
            file,
            arch,
            bundle_size,
            base,
            mode,
            targets,
            config,
        } => {
            let flags = Settings {
                architecture: arch,
                bundle_size,
                mode,
                branch_targets: targets,
                base,
                ..Settings::default()
            };
            run_validate(&file, config.as_deref(), flags)
        }
        Command::Decode { file, arch, base } => run_decode(
            &file,
            Settings {
                architecture: arch,
                base,
                ..Settings::default()
            },
        ),
        Command::CrossCheck {
            bytes,
            random,
            seed,
        } => Ok(run_cross_check(bytes, random, seed)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_flags_parse_into_settings_fields() {
        let cli = Cli::try_parse_from([
            "ncval",
            "validate",
            "code.bin",
            "--arch",
            "x86-32",
            "--base",
            "0x10000",
            "--mode",
            "diagnostic",
            "--targets",
            "instruction-boundary",
            "-vv",
        ])
        .expect("valid arguments");
        assert_eq!(cli.verbose, 2);
        let Command::Validate {
            file,
            arch,
            base,
            mode,
            targets,
            bundle_size,
            config,
        } = cli.command
        else {
            panic!("expected validate");
        };
        assert_eq!(file, PathBuf::from("code.bin"));
        assert_eq!(arch, Some(Architecture::X86));
        assert_eq!(base, Some(0x10000));
        assert_eq!(mode, Some(ValidationMode::Diagnostic));
        assert_eq!(targets, Some(BranchTargetPolicy::InstructionBoundary));
        assert_eq!(bundle_size, None);
        assert_eq!(config, None);
    }

    #[test]
    fn bad_flag_values_are_usage_errors() {
        assert!(Cli::try_parse_from(["ncval", "validate", "x", "--arch", "mips"]).is_err());
        assert!(Cli::try_parse_from(["ncval", "cross-check", "--bytes", "3"]).is_err());
        assert!(Cli::try_parse_from(["ncval", "decode"]).is_err());
    }

    #[test]
    fn cross_check_defaults() {
        let cli = Cli::try_parse_from(["ncval", "cross-check"]).expect("valid arguments");
        assert!(matches!(
            cli.command,
            Command::CrossCheck {
                bytes: 1,
                random: 0,
                seed: 0
            }
        ));
    }
}
