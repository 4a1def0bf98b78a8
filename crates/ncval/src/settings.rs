//! Validator settings assembled from an optional TOML file and command-line
//! overrides.
//!
//! ```toml
//! architecture = "x86-32"
//! bundle_size = 32
//! sandbox_address_bits = 30
//! mode = "diagnostic"
//! branch_targets = "instruction-boundary"
//! base = 0x10000
//! ```
//!
//! Every key is optional; missing keys fall back to the architecture's
//! defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sfi_validator::{Architecture, BranchTargetPolicy, ValidationMode, ValidatorConfig};

use crate::error::CliError;

/// Base address used when none is configured.
pub const DEFAULT_BASE: u32 = 0x0002_0000;

/// Partially specified validator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Target encoding.
    pub architecture: Option<Architecture>,
    /// Bundle size in bytes.
    pub bundle_size: Option<u32>,
    /// Sandbox address width in bits.
    pub sandbox_address_bits: Option<u8>,
    /// Strict or diagnostic scanning.
    pub mode: Option<ValidationMode>,
    /// Accepted direct-branch targets.
    pub branch_targets: Option<BranchTargetPolicy>,
    /// Address of the first byte of the segment.
    pub base: Option<u32>,
}

impl Settings {
    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Read`] when the file cannot be read and
    /// [`CliError::Settings`] when it does not parse.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::parse(&text).map_err(|source| CliError::Settings {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        log::debug!("loaded settings from {}: {settings:?}", path.display());
        Ok(settings)
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns the parser error for malformed text or unknown keys.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlays every field that `overrides` sets.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn merge(self, overrides: Self) -> Self {
        Self {
            architecture: overrides.architecture.or(self.architecture),
            bundle_size: overrides.bundle_size.or(self.bundle_size),
            sandbox_address_bits: overrides.sandbox_address_bits.or(self.sandbox_address_bits),
            mode: overrides.mode.or(self.mode),
            branch_targets: overrides.branch_targets.or(self.branch_targets),
            base: overrides.base.or(self.base),
        }
    }

    /// Resolved segment base address.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn base(&self) -> u32 {
        self.base.unwrap_or(DEFAULT_BASE)
    }

    /// Validator configuration with unset fields taken from the
    /// architecture's defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Config`] when the result is not a supported
    /// geometry.
    pub fn to_config(&self) -> Result<ValidatorConfig, CliError> {
        let defaults = ValidatorConfig::for_architecture(self.architecture.unwrap_or_default());
        let config = ValidatorConfig {
            bundle_size: self.bundle_size.unwrap_or(defaults.bundle_size),
            sandbox_address_bits: self
                .sandbox_address_bits
                .unwrap_or(defaults.sandbox_address_bits),
            mode: self.mode.unwrap_or(defaults.mode),
            branch_targets: self.branch_targets.unwrap_or(defaults.branch_targets),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parses `arm` or `x86-32`.
///
/// # Errors
///
/// Returns a message naming the accepted values.
pub fn parse_architecture(value: &str) -> Result<Architecture, String> {
    match value {
        "arm" => Ok(Architecture::Arm),
        "x86-32" | "x86" => Ok(Architecture::X86),
        other => Err(format!("unknown architecture `{other}` (expected arm or x86-32)")),
    }
}

/// Parses `strict` or `diagnostic`.
///
/// # Errors
///
/// Returns a message naming the accepted values.
pub fn parse_mode(value: &str) -> Result<ValidationMode, String> {
    match value {
        "strict" => Ok(ValidationMode::Strict),
        "diagnostic" => Ok(ValidationMode::Diagnostic),
        other => Err(format!("unknown mode `{other}` (expected strict or diagnostic)")),
    }
}

/// Parses `bundle-start` or `instruction-boundary`.
///
/// # Errors
///
/// Returns a message naming the accepted values.
pub fn parse_branch_targets(value: &str) -> Result<BranchTargetPolicy, String> {
    match value {
        "bundle-start" => Ok(BranchTargetPolicy::BundleStart),
        "instruction-boundary" => Ok(BranchTargetPolicy::InstructionBoundary),
        other => Err(format!(
            "unknown branch target policy `{other}` (expected bundle-start or instruction-boundary)"
        )),
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal address.
///
/// # Errors
///
/// Returns a message when the text is not a 32-bit number.
pub fn parse_address(value: &str) -> Result<u32, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => value.replace('_', "").parse(),
    };
    parsed.map_err(|error| format!("invalid address `{value}`: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_resolve_to_arm_defaults() {
        let config = Settings::default().to_config().expect("defaults are valid");
        assert_eq!(config, ValidatorConfig::arm());
        assert_eq!(Settings::default().base(), DEFAULT_BASE);
    }

    #[test]
    fn toml_uses_kebab_case_values() {
        let settings = Settings::parse(
            r#"
architecture = "x86-32"
mode = "diagnostic"
branch_targets = "instruction-boundary"
base = 0x10000
"#,
        )
        .expect("valid settings");
        assert_eq!(settings.architecture, Some(Architecture::X86));
        assert_eq!(settings.base(), 0x10000);

        let config = settings.to_config().expect("valid geometry");
        assert_eq!(config.bundle_size, 32);
        assert_eq!(config.mode, ValidationMode::Diagnostic);
        assert_eq!(config.branch_targets, BranchTargetPolicy::InstructionBoundary);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Settings::parse("bundle = 16").is_err());
    }

    #[test]
    fn overrides_win_field_by_field() {
        let file = Settings {
            architecture: Some(Architecture::X86),
            bundle_size: Some(64),
            ..Settings::default()
        };
        let flags = Settings {
            bundle_size: Some(16),
            mode: Some(ValidationMode::Diagnostic),
            ..Settings::default()
        };
        let merged = file.merge(flags);
        assert_eq!(merged.architecture, Some(Architecture::X86));
        assert_eq!(merged.bundle_size, Some(16));
        assert_eq!(merged.mode, Some(ValidationMode::Diagnostic));
    }

    #[test]
    fn unsupported_geometry_is_a_config_error() {
        let settings = Settings {
            bundle_size: Some(24),
            ..Settings::default()
        };
        assert!(matches!(settings.to_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn flag_value_parsers() {
        assert_eq!(parse_architecture("x86-32"), Ok(Architecture::X86));
        assert!(parse_architecture("mips").is_err());
        assert_eq!(parse_mode("strict"), Ok(ValidationMode::Strict));
        assert_eq!(
            parse_branch_targets("bundle-start"),
            Ok(BranchTargetPolicy::BundleStart)
        );
        assert_eq!(parse_address("0x2_0000"), Ok(0x20000));
        assert_eq!(parse_address("4096"), Ok(4096));
        assert!(parse_address("0x1_0000_0000").is_err());
    }
}
