//! Bundle/segment walker reducing a code region to a verdict.
//!
//! The walker decodes instructions in address order, checks each one's
//! safety level, feeds the register tracker and enforces the bundle rules.
//! Direct branch targets are checked in a second pass once every
//! instruction boundary of the segment is known.

use std::collections::BTreeSet;

use log::{debug, info, trace};
use rayon::prelude::*;

use crate::config::{Architecture, BranchTargetPolicy, ValidationMode, ValidatorConfig};
use crate::decoder::{DecodedInstruction, InstructionForm};
use crate::fault::{AlignmentFault, ConfigError, ValidationError};
use crate::report::{Diagnostic, ScanState, ValidationReport, ValidationStats, Verdict};
use crate::safety::SafetyLevel;
use crate::tracker::{Observation, RegisterTracker};

/// A code region to validate: its load address and its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Address the first byte will be mapped at.
    pub base: u32,
    /// Raw machine code.
    pub code: &'a [u8],
}

impl<'a> Segment<'a> {
    /// Segment of `code` loaded at `base`.
    #[must_use]
    pub const fn new(base: u32, code: &'a [u8]) -> Self {
        Self { base, code }
    }
}

/// Validates segments against one checked configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    /// Creates a validator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration describes an unsupported
    /// bundle geometry or sandbox width.
    pub fn new(config: ValidatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validates `code` loaded at `base`.
    #[must_use]
    pub fn validate(&self, base: u32, code: &[u8]) -> Verdict {
        self.validate_with_report(base, code).verdict
    }

    /// Validates `code` loaded at `base` and reports how the scan ended.
    #[must_use]
    pub fn validate_with_report(&self, base: u32, code: &[u8]) -> ValidationReport {
        let report = Scan::new(self.config, base, code).run();
        info!(
            "segment {base:#010x} ({} bytes, {}): {}",
            code.len(),
            self.config.architecture,
            if report.verdict.is_accept() {
                "accept".to_owned()
            } else {
                format!("reject, {} violation(s)", report.verdict.diagnostics().len())
            }
        );
        report
    }

    /// Validates independent segments in parallel; verdicts keep input order.
    #[must_use]
    pub fn validate_segments(&self, segments: &[Segment<'_>]) -> Vec<Verdict> {
        segments
            .par_iter()
            .map(|segment| self.validate(segment.base, segment.code))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct DirectBranch {
    offset: usize,
    target: u32,
    safety: SafetyLevel,
}

struct Scan<'a> {
    config: ValidatorConfig,
    base: u32,
    code: &'a [u8],
    bundle: usize,
    tracker: RegisterTracker,
    state: ScanState,
    stats: ValidationStats,
    diagnostics: Vec<Diagnostic>,
    current_bundle: Option<usize>,
    starts: BTreeSet<usize>,
    pair_interiors: BTreeSet<usize>,
    branches: Vec<DirectBranch>,
}

impl<'a> Scan<'a> {
    fn new(config: ValidatorConfig, base: u32, code: &'a [u8]) -> Self {
        Self {
            config,
            base,
            code,
            bundle: config.bundle_bytes(),
            tracker: RegisterTracker::new(&config),
            state: ScanState::Scanning,
            stats: ValidationStats::default(),
            diagnostics: Vec::new(),
            current_bundle: None,
            starts: BTreeSet::new(),
            pair_interiors: BTreeSet::new(),
            branches: Vec::new(),
        }
    }

    fn run(mut self) -> ValidationReport {
        if self.base % self.config.bundle_size != 0 {
            self.fail(
                0,
                SafetyLevel::Safe,
                AlignmentFault::MisalignedSegmentBase { base: self.base }.into(),
            );
        }
        if !self.stopped() {
            self.scan_instructions();
        }
        if !self.stopped() {
            self.close_segment();
        }
        if !self.stopped() {
            self.check_branch_targets();
        }

        if !self.stopped() {
            self.state = ScanState::Done;
        }
        self.diagnostics.sort_by_key(|diagnostic| diagnostic.offset);
        let verdict = if self.diagnostics.is_empty() {
            Verdict::Accept
        } else {
            Verdict::Reject(self.diagnostics)
        };
        ValidationReport {
            verdict,
            final_state: self.state,
            stats: self.stats,
        }
    }

    fn stopped(&self) -> bool {
        self.config.mode == ValidationMode::Strict && self.state == ScanState::BundleViolation
    }

    #[allow(clippy::cast_possible_truncation)]
    fn address(&self, offset: usize) -> u32 {
        self.base.wrapping_add(offset as u32)
    }

    fn fail(&mut self, offset: usize, safety: SafetyLevel, error: ValidationError) {
        let diagnostic = Diagnostic {
            offset,
            address: self.address(offset),
            safety,
            error,
        };
        debug!("rejected {diagnostic}");
        self.stats.record(error);
        self.diagnostics.push(diagnostic);
        self.state = ScanState::BundleViolation;
    }

    fn next_bundle_start(&self, offset: usize) -> usize {
        (offset / self.bundle + 1) * self.bundle
    }

    fn scan_instructions(&mut self) {
        let mut offset = 0;
        while offset < self.code.len() && !self.stopped() {
            if self.state == ScanState::BundleViolation {
                self.state = ScanState::Scanning;
            }
            let bundle_index = offset / self.bundle;
            if self.current_bundle != Some(bundle_index) {
                self.enter_bundle(bundle_index);
                if self.stopped() {
                    break;
                }
                if offset % self.bundle == 0 && self.is_literal_pool(offset) {
                    trace!("literal pool at {:#x}", self.address(offset));
                    self.stats.count_literal_pool();
                    offset = self.next_bundle_start(offset);
                    continue;
                }
            }
            offset = self.step(offset);
        }
    }

    fn enter_bundle(&mut self, bundle_index: usize) {
        if self.current_bundle.is_some() {
            self.close_bundle();
        }
        trace!(
            "bundle {bundle_index} at {:#x}",
            self.address(bundle_index * self.bundle)
        );
        self.current_bundle = Some(bundle_index);
        self.stats.count_bundle();
    }

    fn close_bundle(&mut self) {
        if let Err(unmet) = self.tracker.end_bundle() {
            let safety = self.safety_at(unmet.offset);
            self.fail(unmet.offset, safety, unmet.fault.into());
        }
    }

    fn close_segment(&mut self) {
        if let Err(unmet) = self.tracker.finish() {
            let safety = self.safety_at(unmet.offset);
            self.fail(unmet.offset, safety, unmet.fault.into());
        }
        if !self.stopped() && self.current_bundle.is_some() {
            self.close_bundle();
        }
    }

    fn safety_at(&self, offset: usize) -> SafetyLevel {
        DecodedInstruction::decode(self.config.architecture, self.code, offset).safety()
    }

    fn is_literal_pool(&self, offset: usize) -> bool {
        if self.config.architecture != Architecture::Arm {
            return false;
        }
        matches!(
            DecodedInstruction::decode(Architecture::Arm, self.code, offset).form,
            InstructionForm::Arm(instruction) if instruction.is_literal_pool_head()
        )
    }

    /// Handles the instruction at `offset`; returns where the next one starts.
    fn step(&mut self, offset: usize) -> usize {
        let instruction = DecodedInstruction::decode(self.config.architecture, self.code, offset);
        self.stats.count_instruction();
        self.starts.insert(offset);

        if !instruction.is_decoded() {
            self.fail(offset, SafetyLevel::Undefined, ValidationError::DecodeUndefined);
            return match self.config.architecture {
                Architecture::X86 => self.next_bundle_start(offset),
                Architecture::Arm => offset + instruction.length.max(1),
            };
        }

        let end = offset + instruction.length;
        let safety = instruction.safety();
        if self.config.architecture == Architecture::X86
            && offset % self.bundle + instruction.length > self.bundle
        {
            self.fail(offset, safety, AlignmentFault::InstructionCrossesBundle.into());
            if self.stopped() {
                return end;
            }
        }
        if !safety.is_acceptable() {
            self.fail(offset, safety, ValidationError::SafetyViolation { level: safety });
            if self.stopped() {
                return end;
            }
        }

        let facts = instruction.facts(&self.config, self.base);
        match self.tracker.observe(&facts) {
            Ok(Observation::Guarded { guard_offset }) => {
                let interior: Vec<usize> = self
                    .starts
                    .range(guard_offset + 1..=offset)
                    .copied()
                    .collect();
                self.pair_interiors.extend(interior);
            }
            Ok(Observation::Standalone) => {}
            Err(fault) => {
                self.fail(offset, safety.narrow(SafetyLevel::Forbidden), fault.into());
                if self.stopped() {
                    return end;
                }
            }
        }

        if facts.is_call && end % self.bundle != 0 {
            self.fail(offset, safety, AlignmentFault::CallNotAtBundleEnd.into());
        }
        if let Some(target) = facts.direct_target {
            self.branches.push(DirectBranch {
                offset,
                target,
                safety,
            });
        }
        end
    }

    fn check_branch_targets(&mut self) {
        let branches = std::mem::take(&mut self.branches);
        for branch in branches {
            if !self.is_valid_target(branch.target) {
                self.fail(
                    branch.offset,
                    branch.safety,
                    AlignmentFault::MisalignedBranchTarget {
                        target: branch.target,
                    }
                    .into(),
                );
                if self.stopped() {
                    return;
                }
            }
        }
    }

    fn is_valid_target(&self, target: u32) -> bool {
        let relative = usize::try_from(target.wrapping_sub(self.base)).unwrap_or(usize::MAX);
        if target < self.base || relative >= self.code.len() {
            return target % self.config.bundle_size == 0;
        }
        match self.config.branch_targets {
            BranchTargetPolicy::BundleStart => relative % self.bundle == 0,
            BranchTargetPolicy::InstructionBoundary => {
                self.starts.contains(&relative) && !self.pair_interiors.contains(&relative)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::PairingFault;
    use crate::registers::Register;

    fn words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    fn arm(mode: ValidationMode) -> Validator {
        Validator::new(ValidatorConfig::arm().with_mode(mode)).expect("valid config")
    }

    fn x86(mode: ValidationMode) -> Validator {
        Validator::new(ValidatorConfig::x86_32().with_mode(mode)).expect("valid config")
    }

    #[test]
    fn rejects_invalid_configuration_at_construction() {
        let error = Validator::new(ValidatorConfig::arm().with_bundle_size(12))
            .expect_err("not a power of two");
        assert_eq!(error, ConfigError::BundleSizeNotPowerOfTwo { size: 12 });
    }

    #[test]
    fn strict_mode_stops_at_first_violation() {
        let code = words(&[0xE281_F004, 0xEF00_0000]);
        let report = arm(ValidationMode::Strict).validate_with_report(0x1_0000, &code);
        assert_eq!(report.final_state, ScanState::BundleViolation);
        assert_eq!(report.verdict.diagnostics().len(), 1);
        assert_eq!(report.stats.instructions, 1);
    }

    #[test]
    fn diagnostic_mode_reports_everything_and_finishes() {
        let code = words(&[0xE281_F004, 0xEF00_0000]);
        let report = arm(ValidationMode::Diagnostic).validate_with_report(0x1_0000, &code);
        assert_eq!(report.final_state, ScanState::Done);
        let offsets: Vec<_> = report.verdict.diagnostics().iter().map(|d| d.offset).collect();
        assert_eq!(offsets, vec![0, 4]);
        assert_eq!(report.stats.safety_violations, 2);
    }

    #[test]
    fn accepted_segment_reaches_done() {
        let code = words(&[0xE281_0001, 0xE320_F000, 0xE320_F000, 0xE320_F000]);
        let report = arm(ValidationMode::Strict).validate_with_report(0x1_0000, &code);
        assert_eq!(report.verdict, Verdict::Accept);
        assert_eq!(report.final_state, ScanState::Done);
        assert_eq!(report.stats.bundles, 1);
        assert_eq!(report.stats.instructions, 4);
    }

    #[test]
    fn misaligned_base_is_rejected() {
        let code = words(&[0xE281_0001]);
        let verdict = arm(ValidationMode::Strict).validate(0x1_0004, &code);
        assert_eq!(
            verdict.first().map(|d| d.error),
            Some(AlignmentFault::MisalignedSegmentBase { base: 0x1_0004 }.into())
        );
    }

    #[test]
    fn literal_pool_bundle_is_skipped() {
        let code = words(&[
            0xE127_7777,
            0xFFFF_FFFF,
            0xDEAD_BEEF,
            0x0000_0000,
            0xE281_0001,
        ]);
        let report = arm(ValidationMode::Strict).validate_with_report(0, &code);
        assert_eq!(report.verdict, Verdict::Accept);
        assert_eq!(report.stats.literal_pools, 1);
        assert_eq!(report.stats.instructions, 1);
    }

    #[test]
    fn call_must_end_its_bundle() {
        let early = words(&[0xEB00_0002, 0xE320_F000, 0xE320_F000, 0xE320_F000]);
        let verdict = arm(ValidationMode::Strict).validate(0, &early);
        assert_eq!(
            verdict.first().map(|d| d.error),
            Some(AlignmentFault::CallNotAtBundleEnd.into())
        );

        let last = words(&[0xE320_F000, 0xE320_F000, 0xE320_F000, 0xEBFF_FFFB]);
        assert_eq!(arm(ValidationMode::Strict).validate(0, &last), Verdict::Accept);
    }

    #[test]
    fn stack_pointer_left_unmasked_fails_at_bundle_end() {
        let code = words(&[0xE28D_D010, 0xE320_F000, 0xE320_F000, 0xE320_F000]);
        let verdict = arm(ValidationMode::Strict).validate(0, &code);
        assert_eq!(
            verdict.first().map(|d| (d.offset, d.error)),
            Some((0, PairingFault::StackPointerNotRemasked.into()))
        );

        let remasked = words(&[0xE28D_D010, 0xE3CD_D103, 0xE320_F000, 0xE320_F000]);
        assert_eq!(arm(ValidationMode::Strict).validate(0, &remasked), Verdict::Accept);
    }

    #[test]
    fn dangling_mask_at_segment_end_is_reported() {
        let code = words(&[0xE3C0_02FC]);
        let verdict = arm(ValidationMode::Strict).validate(0, &code);
        assert_eq!(
            verdict.first().map(|d| d.error),
            Some(
                PairingFault::MaskWithoutBranch {
                    architecture: Architecture::Arm,
                    register: Register::new(0)
                }
                .into()
            )
        );
    }

    #[test]
    fn x86_instruction_crossing_a_bundle_is_rejected() {
        let mut code = vec![0x90; 30];
        code.extend_from_slice(&[0xE8, 0, 0, 0, 0]);
        let verdict = x86(ValidationMode::Strict).validate(0, &code);
        assert_eq!(
            verdict.first().map(|d| (d.offset, d.error)),
            Some((30, AlignmentFault::InstructionCrossesBundle.into()))
        );
    }

    #[test]
    fn x86_resynchronises_after_undecodable_bytes() {
        let mut code = vec![0xD6];
        code.extend_from_slice(&[0xCC; 31]);
        code.extend_from_slice(&[0x90; 32]);
        let report = x86(ValidationMode::Diagnostic).validate_with_report(0, &code);
        assert_eq!(report.verdict.diagnostics().len(), 1);
        assert_eq!(report.stats.decode_violations, 1);
        assert_eq!(report.stats.instructions, 33);
    }

    #[test]
    fn instruction_boundary_policy_accepts_interior_starts() {
        let config = ValidatorConfig::x86_32()
            .with_branch_targets(BranchTargetPolicy::InstructionBoundary);
        let validator = Validator::new(config).expect("valid config");
        let mut code = vec![0xEB, 0x01, 0x90, 0x90];
        code.resize(32, 0x90);
        assert_eq!(validator.validate(0, &code), Verdict::Accept);
        assert!(!x86(ValidationMode::Strict).validate(0, &code).is_accept());
    }

    #[test]
    fn instruction_boundary_policy_rejects_pair_interiors() {
        let config = ValidatorConfig::x86_32()
            .with_branch_targets(BranchTargetPolicy::InstructionBoundary);
        let validator = Validator::new(config).expect("valid config");
        let mut code = vec![0xEB, 0x03, 0x83, 0xE0, 0xE0, 0xFF, 0xE0];
        code.resize(32, 0x90);
        let verdict = validator.validate(0, &code);
        assert_eq!(
            verdict.first().map(|d| d.error),
            Some(AlignmentFault::MisalignedBranchTarget { target: 5 }.into())
        );
    }

    #[test]
    fn targets_outside_the_segment_must_be_bundle_aligned() {
        let aligned = words(&[0xEA00_0002, 0xE320_F000, 0xE320_F000, 0xE320_F000]);
        assert_eq!(arm(ValidationMode::Strict).validate(0, &aligned), Verdict::Accept);
        let misaligned = words(&[0xEA00_0003, 0xE320_F000, 0xE320_F000, 0xE320_F000]);
        assert!(!arm(ValidationMode::Strict).validate(0, &misaligned).is_accept());
    }

    #[test]
    fn parallel_validation_keeps_input_order() {
        let good = words(&[0xE281_0001]);
        let bad = words(&[0xE281_F004]);
        let segments = [
            Segment::new(0, &good),
            Segment::new(0, &bad),
            Segment::new(0x10, &good),
        ];
        let verdicts = arm(ValidationMode::Strict).validate_segments(&segments);
        assert_eq!(verdicts.len(), 3);
        assert!(verdicts[0].is_accept());
        assert!(!verdicts[1].is_accept());
        assert!(verdicts[2].is_accept());
    }
}
