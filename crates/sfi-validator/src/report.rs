//! Segment verdicts, diagnostics and scan statistics.

use std::fmt;

use crate::fault::{ValidationError, ViolationClass};
use crate::safety::SafetyLevel;

/// One rejected instruction or unmet segment rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Diagnostic {
    /// Offset from the segment start.
    pub offset: usize,
    /// Absolute address (`base + offset`).
    pub address: u32,
    /// Safety level of the instruction at `offset`.
    pub safety: SafetyLevel,
    /// What went wrong.
    pub error: ValidationError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x} (+{:#x}) {}: {}",
            self.address, self.offset, self.safety, self.error
        )
    }
}

/// Outcome of validating one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Verdict {
    /// Every instruction and pairing rule passed.
    Accept,
    /// At least one violation; never map these bytes executable.
    Reject(Vec<Diagnostic>),
}

impl Verdict {
    /// True for [`Verdict::Accept`].
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }

    /// Diagnostics of a reject, empty for an accept.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Accept => &[],
            Self::Reject(diagnostics) => diagnostics,
        }
    }

    /// Diagnostic with the lowest offset.
    #[must_use]
    pub fn first(&self) -> Option<&Diagnostic> {
        self.diagnostics().first()
    }
}

/// Walker state after the scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ScanState {
    /// Normal decode and classify loop.
    #[default]
    Scanning,
    /// A rule was broken; strict mode stops here.
    BundleViolation,
    /// Every bundle was scanned.
    Done,
}

/// Saturating counters collected while scanning a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ValidationStats {
    /// Instructions decoded, including undecodable records.
    pub instructions: u32,
    /// Bundles entered.
    pub bundles: u32,
    /// Literal-pool bundles skipped as data.
    pub literal_pools: u32,
    /// Decode-class violations.
    pub decode_violations: u32,
    /// Safety-class violations.
    pub safety_violations: u32,
    /// Pairing-class violations.
    pub pairing_violations: u32,
    /// Alignment-class violations.
    pub alignment_violations: u32,
}

impl ValidationStats {
    /// Counts one violation against its class.
    pub fn record(&mut self, error: ValidationError) {
        let counter = match error.class() {
            ViolationClass::Decode => &mut self.decode_violations,
            ViolationClass::Safety => &mut self.safety_violations,
            ViolationClass::Pairing => &mut self.pairing_violations,
            ViolationClass::BundleAlignment => &mut self.alignment_violations,
        };
        *counter = counter.saturating_add(1);
    }

    /// Counts one decoded instruction.
    #[allow(clippy::missing_const_for_fn)]
    pub fn count_instruction(&mut self) {
        self.instructions = self.instructions.saturating_add(1);
    }

    /// Counts one bundle.
    #[allow(clippy::missing_const_for_fn)]
    pub fn count_bundle(&mut self) {
        self.bundles = self.bundles.saturating_add(1);
    }

    /// Counts one skipped literal pool.
    #[allow(clippy::missing_const_for_fn)]
    pub fn count_literal_pool(&mut self) {
        self.literal_pools = self.literal_pools.saturating_add(1);
    }

    /// Violations of every class.
    #[must_use]
    pub const fn violations(&self) -> u32 {
        self.decode_violations
            .saturating_add(self.safety_violations)
            .saturating_add(self.pairing_violations)
            .saturating_add(self.alignment_violations)
    }
}

/// Verdict together with how the scan ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ValidationReport {
    /// Segment verdict.
    pub verdict: Verdict,
    /// State the walker stopped in.
    pub final_state: ScanState,
    /// Counters.
    pub stats: ValidationStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{AlignmentFault, PairingFault};

    #[test]
    fn counters_follow_violation_class() {
        let mut stats = ValidationStats::default();
        stats.record(ValidationError::DecodeUndefined);
        stats.record(PairingFault::StackPointerNotRemasked.into());
        stats.record(AlignmentFault::InstructionCrossesBundle.into());
        stats.record(AlignmentFault::CallNotAtBundleEnd.into());
        assert_eq!(stats.decode_violations, 1);
        assert_eq!(stats.pairing_violations, 1);
        assert_eq!(stats.alignment_violations, 2);
        assert_eq!(stats.violations(), 4);
    }

    #[test]
    fn counters_saturate() {
        let mut stats = ValidationStats {
            safety_violations: u32::MAX,
            instructions: u32::MAX,
            ..ValidationStats::default()
        };
        stats.record(ValidationError::SafetyViolation {
            level: SafetyLevel::Forbidden,
        });
        stats.count_instruction();
        assert_eq!(stats.safety_violations, u32::MAX);
        assert_eq!(stats.instructions, u32::MAX);
        assert_eq!(stats.violations(), u32::MAX);
    }

    #[test]
    fn diagnostics_render_address_offset_and_reason() {
        let diagnostic = Diagnostic {
            offset: 4,
            address: 0x1_0004,
            safety: SafetyLevel::Forbidden,
            error: ValidationError::SafetyViolation {
                level: SafetyLevel::Forbidden,
            },
        };
        assert_eq!(
            diagnostic.to_string(),
            "0x00010004 (+0x4) FORBIDDEN: instruction classified FORBIDDEN"
        );
        let verdict = Verdict::Reject(vec![diagnostic]);
        assert!(!verdict.is_accept());
        assert_eq!(verdict.first(), Some(&diagnostic));
        assert!(Verdict::Accept.diagnostics().is_empty());
    }
}
