//! Validator configuration: target architecture, bundle geometry and policy knobs.

use std::fmt;

use crate::fault::ConfigError;

/// Smallest sandbox address width accepted by [`ValidatorConfig::validate`].
pub const MIN_SANDBOX_ADDRESS_BITS: u8 = 16;
/// Largest sandbox address width accepted by [`ValidatorConfig::validate`].
pub const MAX_SANDBOX_ADDRESS_BITS: u8 = 32;
/// Largest supported bundle size in bytes.
pub const MAX_BUNDLE_SIZE: u32 = 4096;

/// Instruction encodings understood by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Architecture {
    /// Fixed-width 32-bit A32 encoding.
    #[default]
    Arm,
    /// Variable-length x86-32 encoding.
    #[cfg_attr(feature = "serde", serde(rename = "x86-32"))]
    X86,
}

impl Architecture {
    /// Smallest bundle size that can hold a mask and the instruction it guards.
    #[must_use]
    pub const fn min_bundle_size(self) -> u32 {
        match self {
            Self::Arm => 8,
            Self::X86 => 16,
        }
    }

    /// Bundle size used when none is configured.
    #[must_use]
    pub const fn default_bundle_size(self) -> u32 {
        match self {
            Self::Arm => 16,
            Self::X86 => 32,
        }
    }

    /// Short name used in reports and on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Arm => "arm",
            Self::X86 => "x86-32",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What happens after the first violation in a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ValidationMode {
    /// Abort the segment at the first violation.
    #[default]
    Strict,
    /// Record every violation and scan the segment to its end.
    Diagnostic,
}

/// Which offsets a direct branch may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BranchTargetPolicy {
    /// Only the first byte of a bundle.
    #[default]
    BundleStart,
    /// Any instruction start that does not split a guarded pair.
    InstructionBoundary,
}

/// Immutable validator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ValidatorConfig {
    /// Encoding of the code being validated.
    pub architecture: Architecture,
    /// Bundle size in bytes; a power of two.
    pub bundle_size: u32,
    /// Width of the sandboxed address space in bits.
    pub sandbox_address_bits: u8,
    /// Strict or diagnostic scanning.
    pub mode: ValidationMode,
    /// Accepted direct-branch targets.
    pub branch_targets: BranchTargetPolicy,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self::for_architecture(Architecture::Arm)
    }
}

impl ValidatorConfig {
    /// Default settings for `architecture`.
    #[must_use]
    pub const fn for_architecture(architecture: Architecture) -> Self {
        Self {
            architecture,
            bundle_size: architecture.default_bundle_size(),
            sandbox_address_bits: 30,
            mode: ValidationMode::Strict,
            branch_targets: BranchTargetPolicy::BundleStart,
        }
    }

    /// Default A32 settings.
    #[must_use]
    pub const fn arm() -> Self {
        Self::for_architecture(Architecture::Arm)
    }

    /// Default x86-32 settings.
    #[must_use]
    pub const fn x86_32() -> Self {
        Self::for_architecture(Architecture::X86)
    }

    /// Returns a copy with a different bundle size.
    #[must_use]
    pub const fn with_bundle_size(mut self, bundle_size: u32) -> Self {
        self.bundle_size = bundle_size;
        self
    }

    /// Returns a copy with a different scanning mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns a copy with a different branch target policy.
    #[must_use]
    pub const fn with_branch_targets(mut self, branch_targets: BranchTargetPolicy) -> Self {
        self.branch_targets = branch_targets;
        self
    }

    /// Checks the bundle geometry and sandbox width.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the bundle size is not a power of two or
    /// lies outside the architecture's range, or when the sandbox width is
    /// out of range.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        let size = self.bundle_size;
        if !size.is_power_of_two() {
            return Err(ConfigError::BundleSizeNotPowerOfTwo { size });
        }
        let min = self.architecture.min_bundle_size();
        if size < min || size > MAX_BUNDLE_SIZE {
            return Err(ConfigError::BundleSizeOutOfRange {
                size,
                architecture: self.architecture,
                min,
                max: MAX_BUNDLE_SIZE,
            });
        }
        let bits = self.sandbox_address_bits;
        if bits < MIN_SANDBOX_ADDRESS_BITS || bits > MAX_SANDBOX_ADDRESS_BITS {
            return Err(ConfigError::SandboxBitsOutOfRange { bits });
        }
        Ok(())
    }

    /// Address bits a data mask must clear.
    #[must_use]
    pub const fn data_mask(&self) -> u32 {
        if self.sandbox_address_bits >= 32 {
            0
        } else {
            !((1u32 << self.sandbox_address_bits) - 1)
        }
    }

    /// Address bits a code mask must clear before an indirect branch.
    ///
    /// A32 masks clear the data bits and the bundle offset; x86-32 relies on
    /// segmentation for the range and only clears the bundle offset.
    #[must_use]
    pub const fn code_mask(&self) -> u32 {
        let bundle_bits = self.bundle_size.wrapping_sub(1);
        match self.architecture {
            Architecture::Arm => self.data_mask() | bundle_bits,
            Architecture::X86 => bundle_bits,
        }
    }

    /// Bundle size as a byte count.
    #[must_use]
    pub const fn bundle_bytes(&self) -> usize {
        self.bundle_size as usize
    }
}
