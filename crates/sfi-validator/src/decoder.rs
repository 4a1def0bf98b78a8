//! Architecture-neutral decoding of a byte span into instructions.

use crate::arm::{self, ArmInstruction};
use crate::config::{Architecture, ValidatorConfig};
use crate::registers::RegisterList;
use crate::safety::SafetyLevel;
use crate::tracker::InstructionFacts;
use crate::x86::X86Instruction;

/// Shape tag of bytes that decode to nothing.
pub const UNDECODABLE_SHAPE: &str = "Undecodable";

/// Decoded form of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionForm {
    /// A32 word.
    Arm(ArmInstruction),
    /// x86-32 instruction.
    X86(X86Instruction),
    /// Bytes that do not start any known instruction.
    Undecodable,
}

/// One instruction located within a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodedInstruction {
    /// Offset from the segment start.
    pub offset: usize,
    /// Bytes consumed.
    pub length: usize,
    /// Decoded form.
    pub form: InstructionForm,
}

impl DecodedInstruction {
    /// Decodes the instruction at `offset` in `code`.
    ///
    /// Never fails: unknown or truncated bytes produce an
    /// [`InstructionForm::Undecodable`] record one byte long on x86 and one
    /// word (or whatever remains) long on ARM.
    #[must_use]
    pub fn decode(architecture: Architecture, code: &[u8], offset: usize) -> Self {
        let rest = code.get(offset..).unwrap_or_default();
        match architecture {
            Architecture::Arm => match rest.first_chunk::<{ arm::INSTRUCTION_BYTES }>() {
                Some(word) => Self {
                    offset,
                    length: arm::INSTRUCTION_BYTES,
                    form: InstructionForm::Arm(ArmInstruction::decode(u32::from_le_bytes(*word))),
                },
                None => Self::undecodable(offset, rest.len().min(arm::INSTRUCTION_BYTES)),
            },
            Architecture::X86 => match X86Instruction::decode(rest) {
                Some(instruction) => Self {
                    offset,
                    length: instruction.length(),
                    form: InstructionForm::X86(instruction),
                },
                None => Self::undecodable(offset, rest.len().min(1)),
            },
        }
    }

    const fn undecodable(offset: usize, length: usize) -> Self {
        Self {
            offset,
            length,
            form: InstructionForm::Undecodable,
        }
    }

    /// True when the bytes decoded to a known instruction.
    #[must_use]
    pub const fn is_decoded(&self) -> bool {
        !matches!(self.form, InstructionForm::Undecodable)
    }

    /// Stable shape tag.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match &self.form {
            InstructionForm::Arm(instruction) => instruction.shape(),
            InstructionForm::X86(instruction) => instruction.shape(),
            InstructionForm::Undecodable => UNDECODABLE_SHAPE,
        }
    }

    /// Architectural verdict; `UNDEFINED` for undecodable bytes.
    #[must_use]
    pub fn baseline_safety(&self) -> SafetyLevel {
        match &self.form {
            InstructionForm::Arm(instruction) => instruction.baseline_safety(),
            InstructionForm::X86(instruction) => instruction.baseline_safety(),
            InstructionForm::Undecodable => SafetyLevel::Undefined,
        }
    }

    /// Sandbox verdict; `UNDEFINED` for undecodable bytes.
    #[must_use]
    pub fn safety(&self) -> SafetyLevel {
        match &self.form {
            InstructionForm::Arm(instruction) => instruction.safety(),
            InstructionForm::X86(instruction) => instruction.safety(),
            InstructionForm::Undecodable => SafetyLevel::Undefined,
        }
    }

    /// Registers written.
    #[must_use]
    pub fn defs(&self) -> RegisterList {
        match &self.form {
            InstructionForm::Arm(instruction) => instruction.defs(),
            InstructionForm::X86(instruction) => instruction.defs(),
            InstructionForm::Undecodable => RegisterList::EMPTY,
        }
    }

    /// Facts the tracker and walker need, with addresses resolved against
    /// `base` and masks taken from `config`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn facts(&self, config: &ValidatorConfig, base: u32) -> InstructionFacts {
        let address = base.wrapping_add(self.offset as u32);
        let facts = InstructionFacts {
            offset: self.offset,
            length: self.length,
            defs: self.defs(),
            ..InstructionFacts::default()
        };
        match &self.form {
            InstructionForm::Arm(instruction) => {
                InstructionFacts {
                    condition: Some(instruction.condition()),
                    code_mask: instruction.masked_register(config.code_mask()),
                    data_mask: instruction.masked_register(config.data_mask()),
                    zero_test: instruction.sets_z_if_bits_clear(config.data_mask()),
                    indirect_branch: instruction.indirect_branch_register(),
                    memory: instruction.memory_access(),
                    stack_adjustment: instruction.is_legal_stack_adjustment(),
                    is_call: instruction.is_call(),
                    direct_target: instruction.branch_target(address),
                    literal_pool_head: instruction.is_literal_pool_head(),
                    ..facts
                }
            }
            InstructionForm::X86(instruction) => InstructionFacts {
                code_mask: instruction.masked_register(config.code_mask()),
                indirect_branch: instruction.indirect_branch_register(),
                is_call: instruction.is_call(),
                direct_target: instruction.branch_target(address),
                ..facts
            },
            InstructionForm::Undecodable => facts,
        }
    }
}

/// Iterator over the instructions of a byte span, in address order.
///
/// Undecodable bytes are yielded as [`InstructionForm::Undecodable`] records
/// and the walk continues right after them.
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    architecture: Architecture,
    code: &'a [u8],
    offset: usize,
}

impl<'a> Instructions<'a> {
    /// Iterates over `code` decoded for `architecture`.
    #[must_use]
    pub const fn new(architecture: Architecture, code: &'a [u8]) -> Self {
        Self {
            architecture,
            code,
            offset: 0,
        }
    }
}

impl Iterator for Instructions<'_> {
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.code.len() {
            return None;
        }
        let instruction = DecodedInstruction::decode(self.architecture, self.code, self.offset);
        self.offset += instruction.length.max(1);
        Some(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Register;

    #[test]
    fn arm_words_are_little_endian() {
        let code = 0xE281_0001u32.to_le_bytes();
        let decoded = DecodedInstruction::decode(Architecture::Arm, &code, 0);
        assert_eq!(decoded.length, 4);
        assert_eq!(decoded.shape(), "Binary2RegisterImmediateOp");
        assert_eq!(decoded.safety(), SafetyLevel::Safe);
    }

    #[test]
    fn trailing_partial_word_is_undecodable() {
        let decoded = DecodedInstruction::decode(Architecture::Arm, &[1, 2, 3], 0);
        assert!(!decoded.is_decoded());
        assert_eq!(decoded.length, 3);
        assert_eq!(decoded.safety(), SafetyLevel::Undefined);
        assert_eq!(decoded.shape(), UNDECODABLE_SHAPE);
    }

    #[test]
    fn x86_undecodable_advances_one_byte() {
        let listing: Vec<_> = Instructions::new(Architecture::X86, &[0xD6, 0x90]).collect();
        assert_eq!(listing.len(), 2);
        assert!(!listing[0].is_decoded());
        assert_eq!(listing[0].length, 1);
        assert_eq!(listing[1].offset, 1);
        assert_eq!(listing[1].shape(), "Plain");
    }

    #[test]
    fn facts_resolve_masks_against_the_configuration() {
        let config = ValidatorConfig::arm();
        let code = 0xE3C0_02FCu32.to_le_bytes();
        let facts = DecodedInstruction::decode(Architecture::Arm, &code, 0).facts(&config, 0);
        assert_eq!(facts.code_mask, Some(Register::new(0)));
        assert_eq!(facts.data_mask, Some(Register::new(0)));

        let code = 0xE3C0_0103u32.to_le_bytes();
        let facts = DecodedInstruction::decode(Architecture::Arm, &code, 0).facts(&config, 0);
        assert_eq!(facts.code_mask, None);
        assert_eq!(facts.data_mask, Some(Register::new(0)));
    }

    #[test]
    fn x86_direct_targets_use_the_base_address() {
        let config = ValidatorConfig::x86_32();
        let code = [0x90, 0xEB, 0x00];
        let jmp = DecodedInstruction::decode(Architecture::X86, &code, 1);
        assert_eq!(jmp.facts(&config, 0x2000).direct_target, Some(0x2003));
    }
}
