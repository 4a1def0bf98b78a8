use thiserror::Error;

use crate::config::Architecture;
use crate::registers::Register;
use crate::safety::SafetyLevel;

/// Violation classes used for report aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum ViolationClass {
    /// Bits that do not decode to a known instruction.
    Decode = 0x01,
    /// Decoded instruction stricter than `IMPLEMENTATION_SAFE`.
    Safety = 0x02,
    /// Incomplete multi-instruction safety pattern.
    Pairing = 0x03,
    /// Control flow or instruction layout breaking bundle alignment.
    BundleAlignment = 0x04,
}

impl ViolationClass {
    /// Stable numeric code of this class.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable numeric code back into a class.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Decode),
            0x02 => Some(Self::Safety),
            0x03 => Some(Self::Pairing),
            0x04 => Some(Self::BundleAlignment),
            _ => None,
        }
    }
}

/// Required instruction pairings that were not met.
///
/// Register-bearing variants keep the architecture so messages use its
/// register names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PairingFault {
    /// Indirect branch whose target register was not code-masked earlier in the bundle.
    #[error(
        "indirect branch through {} has no preceding mask in its bundle",
        register.name(*architecture)
    )]
    UnmaskedIndirectBranch {
        /// Encoding the register belongs to.
        architecture: Architecture,
        /// Branch target register.
        register: Register,
    },
    /// Memory access through a base register not proven to lie in the sandbox.
    #[error("memory access through unsandboxed base {}", register.name(*architecture))]
    UnmaskedMemoryBase {
        /// Encoding the register belongs to.
        architecture: Architecture,
        /// Base address register.
        register: Register,
    },
    /// Stack pointer changed and not re-masked before the bundle ended.
    #[error("stack pointer modified without re-mask in the same bundle")]
    StackPointerNotRemasked,
    /// Code mask whose guarded branch never arrived before the segment ended.
    #[error(
        "mask of {} at segment end has no following indirect branch",
        register.name(*architecture)
    )]
    MaskWithoutBranch {
        /// Encoding the register belongs to.
        architecture: Architecture,
        /// Masked register.
        register: Register,
    },
}

/// Bundle layout and control-transfer alignment rules that were broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AlignmentFault {
    /// Direct branch whose target is not an allowed entry point.
    #[error("branch target {target:#x} is not a valid entry point")]
    MisalignedBranchTarget {
        /// Absolute target address.
        target: u32,
    },
    /// Instruction extending past the end of its bundle.
    #[error("instruction crosses a bundle boundary")]
    InstructionCrossesBundle,
    /// Call whose return address is not a bundle start.
    #[error("call does not end at a bundle boundary")]
    CallNotAtBundleEnd,
    /// Segment base address not aligned to the bundle size.
    #[error("segment base {base:#x} is not bundle aligned")]
    MisalignedSegmentBase {
        /// Configured base address.
        base: u32,
    },
}

/// Per-instruction and per-segment validation failures.
///
/// All variants are recoverable: they turn the segment verdict into a reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ValidationError {
    /// Bits that do not correspond to any known instruction.
    #[error("undecodable instruction")]
    DecodeUndefined,
    /// Instruction classified stricter than `IMPLEMENTATION_SAFE`.
    #[error("instruction classified {level}")]
    SafetyViolation {
        /// Computed safety level.
        level: SafetyLevel,
    },
    /// Incomplete multi-instruction safety pattern.
    #[error(transparent)]
    PairingViolation(#[from] PairingFault),
    /// Control transfer or instruction layout breaking bundle alignment.
    #[error(transparent)]
    BundleAlignmentViolation(#[from] AlignmentFault),
}

impl ValidationError {
    /// Report class of this error.
    #[must_use]
    pub const fn class(self) -> ViolationClass {
        match self {
            Self::DecodeUndefined => ViolationClass::Decode,
            Self::SafetyViolation { .. } => ViolationClass::Safety,
            Self::PairingViolation(_) => ViolationClass::Pairing,
            Self::BundleAlignmentViolation(_) => ViolationClass::BundleAlignment,
        }
    }
}

/// Invalid validator settings; fatal to validator construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    /// Bundle size is not a power of two.
    #[error("bundle size {size} is not a power of two")]
    BundleSizeNotPowerOfTwo {
        /// Configured size.
        size: u32,
    },
    /// Bundle size outside the architecture's supported range.
    #[error("bundle size {size} is outside {min}..={max} for {architecture}")]
    BundleSizeOutOfRange {
        /// Configured size.
        size: u32,
        /// Target architecture.
        architecture: Architecture,
        /// Smallest supported size.
        min: u32,
        /// Largest supported size.
        max: u32,
    },
    /// Sandbox address width outside the supported range.
    #[error("sandbox address width {bits} is outside 16..=32")]
    SandboxBitsOutOfRange {
        /// Configured width.
        bits: u8,
    },
}
