//! Closed set of A32 instruction shapes and their safety rules.
//!
//! Each shape computes a baseline verdict from the architecture's own
//! UNPREDICTABLE/UNDEFINED/DEPRECATED rules and a sandbox restriction on top
//! of it. [`ArmInstruction::safety`] is always the narrower of the two, so no
//! shape can report a safer verdict than its architectural baseline.

use crate::bits::arm::{self as fields, CONDITION_ALWAYS};
use crate::registers::{Register, RegisterList};
use crate::safety::SafetyLevel;
use crate::tracker::MemoryAccess;

/// Immediate of the `BKPT` that opens a literal pool.
pub const LITERAL_POOL_HEAD: u16 = 0x7777;

/// Two-operand data-processing opcodes that write a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DataOp {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Orr,
    Bic,
}

/// Flag-setting comparisons with no destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TestOp {
    Tst,
    Teq,
    Cmp,
    Cmn,
}

/// Single-operand moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MoveOp {
    Mov,
    Mvn,
}

/// Shifter operand of a data-processing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Modified 12-bit immediate.
    Immediate(u32),
    /// Register shifted by a constant.
    ShiftedRegister {
        /// Shifted register.
        rm: Register,
        /// Shift type field.
        shift_type: u8,
        /// Shift amount.
        amount: u8,
    },
    /// Register shifted by the low byte of another register.
    RegisterShiftedRegister {
        /// Shifted register.
        rm: Register,
        /// Register holding the shift amount.
        rs: Register,
        /// Shift type field.
        shift_type: u8,
    },
}

/// 32-bit multiplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MultiplyOp {
    Mul,
    Mla,
    Mls,
}

/// Multiplies producing a 64-bit result in two registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum LongMultiplyOp {
    Umaal,
    Umull,
    Umlal,
    Smull,
    Smlal,
}

/// Bit-field insert, clear and extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BitFieldOp {
    Bfi,
    Bfc,
    Ubfx,
    Sbfx,
}

/// Width of a single-register memory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TransferSize {
    Word,
    Byte,
    Halfword,
}

/// Offset operand of a single-register memory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    /// Unsigned byte offset.
    Immediate(u32),
    /// Offset register shifted by a constant.
    Register {
        /// Offset register.
        rm: Register,
        /// Shift type field.
        shift_type: u8,
        /// Shift amount.
        amount: u8,
    },
}

/// Why an always-forbidden shape is forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForbiddenReason {
    /// Encodings with condition `0b1111`.
    Unconditional,
    /// `SVC`.
    SupervisorCall,
    /// `SMC`.
    SecureMonitorCall,
    /// `BXJ`.
    Jazelle,
    /// Coprocessor access outside the VFP data-processing space.
    Coprocessor,
    /// Status register reads and system-level writes.
    StatusRegister,
    /// User-mode (`...T`) memory accesses.
    Unprivileged,
    /// Block transfers touching banked registers or returning from exceptions.
    BankedRegisters,
}

/// Instruction shapes recognised by the A32 decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmClass {
    /// `NOP` and `YIELD`.
    CondNop,
    /// Hints with side effects (`WFE`, `WFI`, `SEV`, `DBG`) and unallocated hints.
    ForbiddenCondNop,
    /// Legal architecture, never allowed in the sandbox.
    Forbidden(ForbiddenReason),
    /// No instruction; includes `UDF` and unallocated encodings.
    Undefined,
    /// VFP data-processing.
    CondVfpOp,
    /// `MSR APSR_<fields>, #imm`.
    MoveImmediate12ToApsr {
        /// Bits 19:18 of the write mask (`nzcvq`, `g`).
        mask: u8,
    },
    /// `AND`, `EOR`, `SUB`, `RSB`, `ADD`, `ADC`, `SBC`, `RSC`, `ORR`, `BIC`.
    DataProcessing {
        /// Operation.
        op: DataOp,
        /// Updates flags.
        s: bool,
        /// Destination.
        rd: Register,
        /// First operand.
        rn: Register,
        /// Shifter operand.
        operand: Operand,
    },
    /// `MOV`, `MVN` and the shift aliases.
    Move {
        /// Operation.
        op: MoveOp,
        /// Updates flags.
        s: bool,
        /// Destination.
        rd: Register,
        /// Should-be-zero `Rn` field.
        rn_field: Register,
        /// Shifter operand.
        operand: Operand,
    },
    /// `TST`, `TEQ`, `CMP`, `CMN`.
    Test {
        /// Operation.
        op: TestOp,
        /// Tested register.
        rn: Register,
        /// Should-be-zero `Rd` field.
        rd_field: Register,
        /// Shifter operand.
        operand: Operand,
    },
    /// `MOVW` and `MOVT`.
    MoveWide {
        /// Writes the top half (`MOVT`).
        top: bool,
        /// Destination.
        rd: Register,
        /// 16-bit immediate.
        imm16: u16,
    },
    /// `CLZ`.
    CountLeadingZeros {
        /// Destination.
        rd: Register,
        /// Source.
        rm: Register,
    },
    /// `MUL`, `MLA`, `MLS`.
    Multiply {
        /// Operation.
        op: MultiplyOp,
        /// Updates flags.
        s: bool,
        /// Destination.
        rd: Register,
        /// First factor.
        rn: Register,
        /// Second factor.
        rm: Register,
        /// Accumulator (should be zero for `MUL`).
        ra: Register,
    },
    /// `UMAAL`, `UMULL`, `UMLAL`, `SMULL`, `SMLAL`.
    MultiplyLong {
        /// Operation.
        op: LongMultiplyOp,
        /// Updates flags.
        s: bool,
        /// High destination.
        rd_hi: Register,
        /// Low destination.
        rd_lo: Register,
        /// First factor.
        rn: Register,
        /// Second factor.
        rm: Register,
    },
    /// `BFI`, `BFC`, `UBFX`, `SBFX`.
    BitField {
        /// Operation.
        op: BitFieldOp,
        /// Destination.
        rd: Register,
        /// Source (`pc` for `BFC`).
        rn: Register,
        /// Lowest bit.
        lsb: u8,
        /// Most significant bit for inserts, `width - 1` for extracts.
        msb: u8,
    },
    /// `B` and `BL`.
    Branch {
        /// Writes the link register.
        link: bool,
        /// Byte offset from the instruction address plus eight.
        offset: i32,
    },
    /// `BX` and `BLX` (register).
    BranchToRegister {
        /// Writes the link register.
        link: bool,
        /// Target register.
        rm: Register,
        /// Should-be-one field, bits 19:8.
        sbo: u16,
    },
    /// `BKPT`; immediate `0x7777` opens a literal pool.
    BreakPoint {
        /// 16-bit immediate.
        imm16: u16,
    },
    /// `LDR`, `STR`, `LDRB`, `STRB`, `LDRH`, `STRH`.
    LoadStore {
        /// Transfer width.
        size: TransferSize,
        /// Load (otherwise store).
        load: bool,
        /// Transfer register.
        rt: Register,
        /// Base register.
        rn: Register,
        /// Offset operand.
        offset: Offset,
        /// Offset applied before the access.
        pre_index: bool,
        /// Offset added (otherwise subtracted).
        add: bool,
        /// `W` bit.
        w: bool,
    },
    /// `LDREX`.
    LoadExclusive {
        /// Destination.
        rt: Register,
        /// Base register.
        rn: Register,
    },
    /// `STREX`.
    StoreExclusive {
        /// Status destination.
        rd: Register,
        /// Stored register.
        rt: Register,
        /// Base register.
        rn: Register,
    },
    /// `LDM`/`STM` and the `PUSH`/`POP` aliases.
    LoadStoreMultiple {
        /// Load (otherwise store).
        load: bool,
        /// Base register.
        rn: Register,
        /// Base written back.
        writeback: bool,
        /// Transferred registers.
        registers: RegisterList,
    },
    /// `SWP` and `SWPB`.
    Swap {
        /// Byte variant.
        byte: bool,
        /// Destination.
        rt: Register,
        /// Stored register.
        rt2: Register,
        /// Address register.
        rn: Register,
    },
}

impl ArmClass {
    /// Stable shape tag used in listings and cross-checks.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::CondNop => "CondNop",
            Self::ForbiddenCondNop => "ForbiddenCondNop",
            Self::Forbidden(_) => "Forbidden",
            Self::Undefined => "Undefined",
            Self::CondVfpOp => "CondVfpOp",
            Self::MoveImmediate12ToApsr { .. } => "MoveImmediate12ToApsr",
            Self::DataProcessing { op: DataOp::Bic, operand: Operand::Immediate(_), .. } => {
                "MaskedBinary2RegisterImmediateOp"
            }
            Self::DataProcessing { operand, .. } => match operand {
                Operand::Immediate(_) => "Binary2RegisterImmediateOp",
                Operand::ShiftedRegister { .. } => "Binary3RegisterImmedShiftedOp",
                Operand::RegisterShiftedRegister { .. } => "Binary4RegisterShiftedOp",
            },
            Self::Move { operand, .. } => match operand {
                Operand::Immediate(_) => "Unary1RegisterImmediateOp",
                Operand::ShiftedRegister { .. } => "Unary2RegisterImmedShiftedOp",
                Operand::RegisterShiftedRegister { .. } => "Unary3RegisterShiftedOp",
            },
            Self::Test { op: TestOp::Tst, operand: Operand::Immediate(_), .. } => {
                "MaskedBinaryRegisterImmediateTest"
            }
            Self::Test { operand, .. } => match operand {
                Operand::Immediate(_) => "BinaryRegisterImmediateTest",
                Operand::ShiftedRegister { .. } => "Binary2RegisterImmedShiftedTest",
                Operand::RegisterShiftedRegister { .. } => "Binary3RegisterShiftedTest",
            },
            Self::MoveWide { .. } => "Unary1RegisterImmediateOp",
            Self::CountLeadingZeros { .. } => "Unary2RegisterOp",
            Self::Multiply { op: MultiplyOp::Mul, .. } => "Binary3RegisterOpAltA",
            Self::Multiply { .. } => "Binary4RegisterDualOp",
            Self::MultiplyLong { .. } => "Binary4RegisterDualResult",
            Self::BitField { op, .. } => match op {
                BitFieldOp::Bfc => "Unary1RegisterBitRange",
                BitFieldOp::Bfi => "Binary2RegisterBitRangeMsbGeLsb",
                BitFieldOp::Ubfx | BitFieldOp::Sbfx => "Binary2RegisterBitRangeNotRnIsPc",
            },
            Self::Branch { .. } => "BranchImmediate24",
            Self::BranchToRegister { .. } => "BranchToRegister",
            Self::BreakPoint { .. } => "BreakPointAndConstantPoolHead",
            Self::LoadStore { offset, load, size, .. } => match (size, offset, load) {
                (TransferSize::Halfword, Offset::Immediate(_), true) => "Load2RegisterImm8Op",
                (TransferSize::Halfword, Offset::Immediate(_), false) => "Store2RegisterImm8Op",
                (TransferSize::Halfword, Offset::Register { .. }, true) => "Load3RegisterOp",
                (TransferSize::Halfword, Offset::Register { .. }, false) => "Store3RegisterOp",
                (_, Offset::Immediate(_), true) => "Load2RegisterImm12Op",
                (_, Offset::Immediate(_), false) => "Store2RegisterImm12Op",
                (_, Offset::Register { .. }, true) => "Load3RegisterImm5Op",
                (_, Offset::Register { .. }, false) => "Store3RegisterImm5Op",
            },
            Self::LoadExclusive { .. } => "LoadExclusive2RegisterOp",
            Self::StoreExclusive { .. } => "StoreExclusive3RegisterOp",
            Self::LoadStoreMultiple { load: true, .. } => "LoadRegisterList",
            Self::LoadStoreMultiple { load: false, .. } => "StoreRegisterList",
            Self::Swap { .. } => "Deprecated",
        }
    }
}

fn any_pc(registers: &[Register]) -> bool {
    registers.contains(&Register::PC)
}

const fn level_if(condition: bool, level: SafetyLevel) -> SafetyLevel {
    if condition {
        level
    } else {
        SafetyLevel::Safe
    }
}

/// A decoded A32 word together with its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArmInstruction {
    word: u32,
    class: ArmClass,
}

impl ArmInstruction {
    /// Decodes `word` into its shape.
    #[must_use]
    pub fn decode(word: u32) -> Self {
        Self {
            word,
            class: super::decoder::classify(word),
        }
    }

    /// Raw instruction bits.
    #[must_use]
    pub const fn word(&self) -> u32 {
        self.word
    }

    /// Recognised shape.
    #[must_use]
    pub const fn class(&self) -> &ArmClass {
        &self.class
    }

    /// Condition code field.
    #[must_use]
    pub const fn condition(&self) -> u8 {
        fields::condition(self.word)
    }

    /// Stable shape tag.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        self.class.shape()
    }

    /// Verdict from the architecture's own rules alone.
    #[must_use]
    pub fn baseline_safety(&self) -> SafetyLevel {
        use SafetyLevel::{Deprecated, Safe, Undefined, Unpredictable};

        match self.class {
            ArmClass::CondNop
            | ArmClass::ForbiddenCondNop
            | ArmClass::Forbidden(_)
            | ArmClass::CondVfpOp
            | ArmClass::MoveImmediate12ToApsr { .. }
            | ArmClass::Branch { .. } => Safe,
            ArmClass::Undefined => Undefined,
            ArmClass::DataProcessing { s, rd, rn, operand, .. } => {
                level_if(shifted_register_uses_pc(operand, &[rd, rn]), Unpredictable)
                    .narrow(level_if(rd == Register::PC && s, Unpredictable))
            }
            ArmClass::Move { s, rd, rn_field, operand, .. } => {
                level_if(shifted_register_uses_pc(operand, &[rd]), Unpredictable)
                    .narrow(level_if(rd == Register::PC && s, Unpredictable))
                    .narrow(level_if(rn_field.index() != 0, Unpredictable))
            }
            ArmClass::Test { rn, rd_field, operand, .. } => {
                level_if(shifted_register_uses_pc(operand, &[rn]), Unpredictable)
                    .narrow(level_if(rd_field.index() != 0, Unpredictable))
            }
            ArmClass::MoveWide { rd, .. } => level_if(rd == Register::PC, Unpredictable),
            ArmClass::CountLeadingZeros { rd, rm } => level_if(any_pc(&[rd, rm]), Unpredictable),
            ArmClass::Multiply { op, rd, rn, rm, ra, .. } => {
                let uses_pc = any_pc(&[rd, rn, rm])
                    || (op != MultiplyOp::Mul && ra == Register::PC);
                level_if(uses_pc, Unpredictable).narrow(level_if(
                    op == MultiplyOp::Mul && ra.index() != 0,
                    Unpredictable,
                ))
            }
            ArmClass::MultiplyLong { rd_hi, rd_lo, rn, rm, .. } => {
                level_if(any_pc(&[rd_hi, rd_lo, rn, rm]) || rd_hi == rd_lo, Unpredictable)
            }
            ArmClass::BitField { op, rd, rn, lsb, msb } => {
                let operands = match op {
                    BitFieldOp::Bfi | BitFieldOp::Bfc => msb < lsb,
                    BitFieldOp::Ubfx | BitFieldOp::Sbfx => {
                        rn == Register::PC || u32::from(lsb) + u32::from(msb) > 31
                    }
                };
                level_if(rd == Register::PC || operands, Unpredictable)
            }
            ArmClass::BranchToRegister { link, rm, sbo } => {
                level_if(sbo != 0xFFF || (link && rm == Register::PC), Unpredictable)
            }
            ArmClass::BreakPoint { .. } => {
                level_if(self.condition() != CONDITION_ALWAYS, Unpredictable)
            }
            ArmClass::LoadStore { size, rt, rn, offset, .. } => {
                let writeback = self.writes_back();
                let offset_pc = matches!(offset, Offset::Register { rm, .. } if rm == Register::PC);
                let base = writeback && (rn == Register::PC || rn == rt);
                let narrow_pc = size != TransferSize::Word && rt == Register::PC;
                level_if(offset_pc || base || narrow_pc, Unpredictable)
            }
            ArmClass::LoadExclusive { rt, rn } => level_if(any_pc(&[rt, rn]), Unpredictable),
            ArmClass::StoreExclusive { rd, rt, rn } => {
                level_if(any_pc(&[rd, rt, rn]) || rd == rn || rd == rt, Unpredictable)
            }
            ArmClass::LoadStoreMultiple { load, rn, writeback, registers } => {
                let base_in_list = writeback && registers.contains(rn);
                let unknown_store = !load && base_in_list && registers.lowest() != Some(rn);
                level_if(
                    rn == Register::PC
                        || registers.is_empty()
                        || (load && base_in_list)
                        || unknown_store,
                    Unpredictable,
                )
            }
            ArmClass::Swap { rt, rt2, rn, .. } => {
                Deprecated.narrow(level_if(any_pc(&[rt, rt2, rn]) || rn == rt || rn == rt2, Unpredictable))
            }
        }
    }

    /// Extra restriction the sandbox places on top of the baseline.
    #[must_use]
    pub fn sandbox_restriction(&self) -> SafetyLevel {
        use SafetyLevel::{Forbidden, ForbiddenOperands, ImplementationSafe, Safe};

        let mut level = match self.class {
            ArmClass::Forbidden(_) | ArmClass::ForbiddenCondNop => Forbidden,
            ArmClass::CondVfpOp => ImplementationSafe,
            ArmClass::LoadStore { offset: Offset::Register { .. }, .. } => ForbiddenOperands,
            _ => Safe,
        };

        let defs = self.defs();
        if defs.contains(Register::PC) && !self.is_branch() {
            level = level.narrow(if self.is_load() { ForbiddenOperands } else { Forbidden });
        }
        if defs.contains(Register::THREAD_POINTER) {
            level = level.narrow(Forbidden);
        }
        if self.stored_register() == Some(Register::PC) {
            level = level.narrow(ForbiddenOperands);
        }
        level
    }

    /// Final verdict: the baseline narrowed by the sandbox restriction.
    #[must_use]
    pub fn safety(&self) -> SafetyLevel {
        self.baseline_safety().narrow(self.sandbox_restriction())
    }

    /// Registers this instruction may write, legal or not.
    #[must_use]
    pub fn defs(&self) -> RegisterList {
        let flags = |s: bool| RegisterList::EMPTY.with_if(s, Register::CONDITIONS);
        match self.class {
            ArmClass::CondNop
            | ArmClass::ForbiddenCondNop
            | ArmClass::Forbidden(_)
            | ArmClass::Undefined
            | ArmClass::CondVfpOp
            | ArmClass::BreakPoint { .. } => RegisterList::EMPTY,
            ArmClass::MoveImmediate12ToApsr { mask } => flags(mask & 0b10 != 0),
            ArmClass::DataProcessing { s, rd, .. } | ArmClass::Move { s, rd, .. } => {
                flags(s).with(rd)
            }
            ArmClass::Test { .. } => flags(true),
            ArmClass::MoveWide { rd, .. }
            | ArmClass::CountLeadingZeros { rd, .. }
            | ArmClass::BitField { rd, .. }
            | ArmClass::StoreExclusive { rd, .. } => RegisterList::single(rd),
            ArmClass::Multiply { s, rd, .. } => flags(s).with(rd),
            ArmClass::MultiplyLong { s, rd_hi, rd_lo, .. } => flags(s).with(rd_hi).with(rd_lo),
            ArmClass::Branch { link, .. } | ArmClass::BranchToRegister { link, .. } => {
                RegisterList::single(Register::PC).with_if(link, Register::LR)
            }
            ArmClass::LoadStore { load, rt, rn, .. } => RegisterList::EMPTY
                .with_if(load, rt)
                .with_if(self.writes_back(), rn),
            ArmClass::LoadExclusive { rt, .. } | ArmClass::Swap { rt, .. } => {
                RegisterList::single(rt)
            }
            ArmClass::LoadStoreMultiple { load, rn, writeback, registers } => {
                let loaded = if load { registers } else { RegisterList::EMPTY };
                loaded.with_if(writeback, rn)
            }
        }
    }

    /// True for `B`, `BL`, `BX` and `BLX`.
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(
            self.class,
            ArmClass::Branch { .. } | ArmClass::BranchToRegister { .. }
        )
    }

    /// True for branches that write the link register.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(
            self.class,
            ArmClass::Branch { link: true, .. } | ArmClass::BranchToRegister { link: true, .. }
        )
    }

    /// True for shapes that read memory into registers.
    #[must_use]
    pub const fn is_load(&self) -> bool {
        matches!(
            self.class,
            ArmClass::LoadStore { load: true, .. }
                | ArmClass::LoadStoreMultiple { load: true, .. }
                | ArmClass::LoadExclusive { .. }
                | ArmClass::Swap { .. }
        )
    }

    /// True when a single-register transfer updates its base.
    #[must_use]
    pub const fn writes_back(&self) -> bool {
        match self.class {
            ArmClass::LoadStore { pre_index, w, .. } => !pre_index || w,
            ArmClass::LoadStoreMultiple { writeback, .. } => writeback,
            _ => false,
        }
    }

    /// Register whose value is the target of an indirect branch.
    #[must_use]
    pub const fn indirect_branch_register(&self) -> Option<Register> {
        match self.class {
            ArmClass::BranchToRegister { rm, .. } => Some(rm),
            _ => None,
        }
    }

    /// Absolute target of a direct branch located at `address`.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn branch_target(&self, address: u32) -> Option<u32> {
        match self.class {
            ArmClass::Branch { offset, .. } => {
                Some(address.wrapping_add(8).wrapping_add(offset as u32))
            }
            _ => None,
        }
    }

    /// True when this is `BIC` with an immediate that clears every bit of `mask`.
    #[must_use]
    pub const fn clears_bits(&self, mask: u32) -> bool {
        match self.class {
            ArmClass::DataProcessing {
                op: DataOp::Bic,
                operand: Operand::Immediate(imm12),
                ..
            } => fields::expand_imm12(imm12) & mask == mask,
            _ => false,
        }
    }

    /// Register left holding a value with every bit of `mask` cleared.
    #[must_use]
    pub const fn masked_register(&self, mask: u32) -> Option<Register> {
        match self.class {
            ArmClass::DataProcessing { rd, .. } if self.clears_bits(mask) => Some(rd),
            _ => None,
        }
    }

    /// Register whose `mask` bits are all clear whenever this `TST` sets Z.
    #[must_use]
    pub const fn sets_z_if_bits_clear(&self, mask: u32) -> Option<Register> {
        match self.class {
            ArmClass::Test {
                op: TestOp::Tst,
                rn,
                operand: Operand::Immediate(imm12),
                ..
            } if fields::expand_imm12(imm12) & mask == mask => Some(rn),
            _ => None,
        }
    }

    /// Memory access performed by this instruction, if any.
    #[must_use]
    pub const fn memory_access(&self) -> Option<MemoryAccess> {
        let writeback = self.writes_back();
        match self.class {
            ArmClass::LoadStore { load, rn, offset, .. } => Some(MemoryAccess {
                base: rn,
                is_store: !load,
                writeback,
                immediate_offset: matches!(offset, Offset::Immediate(_)),
            }),
            ArmClass::LoadStoreMultiple { load, rn, .. } => Some(MemoryAccess {
                base: rn,
                is_store: !load,
                writeback,
                immediate_offset: true,
            }),
            ArmClass::LoadExclusive { rn, .. } => Some(MemoryAccess {
                base: rn,
                is_store: false,
                writeback: false,
                immediate_offset: true,
            }),
            ArmClass::StoreExclusive { rn, .. } | ArmClass::Swap { rn, .. } => {
                Some(MemoryAccess {
                    base: rn,
                    is_store: true,
                    writeback: false,
                    immediate_offset: true,
                })
            }
            _ => None,
        }
    }

    /// True for stack pointer updates that keep it inside the sandbox:
    /// immediate write-back on an `sp` base that does not also load `sp`.
    #[must_use]
    pub fn is_legal_stack_adjustment(&self) -> bool {
        let Some(access) = self.memory_access() else {
            return false;
        };
        if access.base != Register::SP || !access.writeback || !access.immediate_offset {
            return false;
        }
        match self.class {
            ArmClass::LoadStore { load, rt, .. } => !(load && rt == Register::SP),
            ArmClass::LoadStoreMultiple { load, registers, .. } => {
                !(load && registers.contains(Register::SP))
            }
            _ => false,
        }
    }

    /// True for the `BKPT #0x7777` word that marks the start of a literal pool.
    #[must_use]
    pub const fn is_literal_pool_head(&self) -> bool {
        matches!(self.class, ArmClass::BreakPoint { imm16 } if imm16 == LITERAL_POOL_HEAD)
            && self.condition() == CONDITION_ALWAYS
    }

    fn stored_register(&self) -> Option<Register> {
        match self.class {
            ArmClass::LoadStore { load: false, rt, .. }
            | ArmClass::StoreExclusive { rt, .. } => Some(rt),
            ArmClass::Swap { rt2, .. } => Some(rt2),
            ArmClass::LoadStoreMultiple { load: false, registers, .. }
                if registers.contains(Register::PC) =>
            {
                Some(Register::PC)
            }
            _ => None,
        }
    }
}

fn shifted_register_uses_pc(operand: Operand, others: &[Register]) -> bool {
    match operand {
        Operand::RegisterShiftedRegister { rm, rs, .. } => {
            any_pc(others) || rm == Register::PC || rs == Register::PC
        }
        Operand::Immediate(_) | Operand::ShiftedRegister { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const DATA_MASK: u32 = 0xC000_0000;
    const CODE_MASK: u32 = 0xC000_000F;

    #[rstest]
    #[case::add_immediate(0xE281_0001, SafetyLevel::Safe)]
    #[case::add_to_pc(0xE281_F004, SafetyLevel::Forbidden)]
    #[case::adds_to_pc(0xE291_F004, SafetyLevel::Forbidden)]
    #[case::mov_to_r9(0xE1A0_9000, SafetyLevel::Forbidden)]
    #[case::load_to_pc(0xE590_F000, SafetyLevel::ForbiddenOperands)]
    #[case::register_offset_load(0xE790_1002, SafetyLevel::ForbiddenOperands)]
    #[case::store_pc(0xE580_F000, SafetyLevel::ForbiddenOperands)]
    #[case::pop_with_pc(0xE8BD_8010, SafetyLevel::ForbiddenOperands)]
    #[case::svc(0xEF00_0000, SafetyLevel::Forbidden)]
    #[case::swp(0xE101_0092, SafetyLevel::Deprecated)]
    #[case::vadd(0xEE30_0A00, SafetyLevel::ImplementationSafe)]
    #[case::udf(0xE7F0_00F0, SafetyLevel::Undefined)]
    #[case::wfi(0xE320_F003, SafetyLevel::Forbidden)]
    #[case::nop(0xE320_F000, SafetyLevel::Safe)]
    fn representative_safety_levels(#[case] word: u32, #[case] expected: SafetyLevel) {
        assert_eq!(ArmInstruction::decode(word).safety(), expected);
    }

    #[test]
    fn pc_destination_is_only_unpredictable_architecturally() {
        let adds = ArmInstruction::decode(0xE291_F004);
        assert_eq!(adds.baseline_safety(), SafetyLevel::Unpredictable);
        assert_eq!(adds.safety(), SafetyLevel::Forbidden);

        let add = ArmInstruction::decode(0xE281_F004);
        assert_eq!(add.baseline_safety(), SafetyLevel::Safe);
        assert_eq!(add.safety(), SafetyLevel::Forbidden);
    }

    #[test]
    fn defs_include_flags_and_write_back() {
        let adds = ArmInstruction::decode(0xE291_0001);
        assert_eq!(
            adds.defs(),
            RegisterList::single(Register::new(0)).with(Register::CONDITIONS)
        );

        let pre_indexed = ArmInstruction::decode(0xE5B0_1004);
        assert_eq!(
            pre_indexed.defs(),
            RegisterList::single(Register::new(0)).with(Register::new(1))
        );

        let bl = ArmInstruction::decode(0xEB00_0000);
        assert_eq!(
            bl.defs(),
            RegisterList::single(Register::PC).with(Register::LR)
        );
    }

    #[test]
    fn bic_hazard_matches_code_and_data_masks() {
        let code_mask = ArmInstruction::decode(0xE3C0_02FC);
        assert!(code_mask.clears_bits(CODE_MASK));
        assert!(code_mask.clears_bits(DATA_MASK));
        assert_eq!(code_mask.masked_register(CODE_MASK), Some(Register::new(0)));

        let data_mask = ArmInstruction::decode(0xE3C0_0103);
        assert!(data_mask.clears_bits(DATA_MASK));
        assert!(!data_mask.clears_bits(CODE_MASK));
    }

    #[test]
    fn tst_hazard_reports_tested_register() {
        let tst = ArmInstruction::decode(0xE313_0103);
        assert_eq!(tst.sets_z_if_bits_clear(DATA_MASK), Some(Register::new(3)));
        assert_eq!(tst.sets_z_if_bits_clear(CODE_MASK), None);
    }

    #[test]
    fn branch_targets_are_pc_relative() {
        let b = ArmInstruction::decode(0xEAFF_FFFE);
        assert_eq!(b.branch_target(0x1000), Some(0x1000));
        assert!(!b.is_call());
        let bx = ArmInstruction::decode(0xE12F_FF10);
        assert_eq!(bx.indirect_branch_register(), Some(Register::new(0)));
        assert_eq!(bx.branch_target(0x1000), None);
    }

    #[test]
    fn stack_adjustments_through_sp_write_back() {
        assert!(ArmInstruction::decode(0xE52D_E004).is_legal_stack_adjustment());
        assert!(ArmInstruction::decode(0xE92D_4010).is_legal_stack_adjustment());
        assert!(!ArmInstruction::decode(0xE28D_D010).is_legal_stack_adjustment());
        assert!(!ArmInstruction::decode(0xE59D_0004).is_legal_stack_adjustment());
    }

    #[test]
    fn literal_pool_head_requires_magic_immediate() {
        assert!(ArmInstruction::decode(0xE127_7777).is_literal_pool_head());
        assert!(!ArmInstruction::decode(0xE120_0070).is_literal_pool_head());
        assert_eq!(
            ArmInstruction::decode(0xE120_0070).safety(),
            SafetyLevel::Safe
        );
    }

    #[test]
    fn long_multiply_with_aliased_results_is_unpredictable() {
        let umull = ArmInstruction::decode(0xE081_1392);
        assert_eq!(umull.baseline_safety(), SafetyLevel::Unpredictable);
        let ok = ArmInstruction::decode(0xE081_0392);
        assert_eq!(ok.safety(), SafetyLevel::Safe);
    }
}
