//! Command-line front end for the SFI code validator.

use clap as _;
use env_logger as _;
#[cfg(test)]
use tempfile as _;

/// Failures that stop the tool before a verdict and their exit codes.
pub mod error;
pub use error::{CliError, EXIT_ACCEPT, EXIT_REJECT, EXIT_USAGE};

/// Settings file format and flag value parsers.
pub mod settings;
pub use settings::{Settings, DEFAULT_BASE};

/// Text rendering of listings, reports and cross-check summaries.
pub mod listing;
pub use listing::{render_cross_check, render_listing, render_report};
