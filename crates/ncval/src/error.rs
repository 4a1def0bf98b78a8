use std::path::PathBuf;

use sfi_validator::ConfigError;
use thiserror::Error;

/// Exit status for an accepted segment or a clean cross-check.
pub const EXIT_ACCEPT: u8 = 0;
/// Exit status for a rejected segment or a decoder disagreement.
pub const EXIT_REJECT: u8 = 1;
/// Exit status for usage, input and configuration problems.
pub const EXIT_USAGE: u8 = 2;

/// Failures that stop the tool before a verdict is reached.
#[derive(Debug, Error)]
pub enum CliError {
    /// An input or settings file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A settings file is not valid TOML or has unknown keys.
    #[error("invalid settings in {}: {source}", path.display())]
    Settings {
        /// Settings file.
        path: PathBuf,
        /// Parser error.
        source: Box<toml::de::Error>,
    },
    /// The merged settings describe an unsupported validator.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
