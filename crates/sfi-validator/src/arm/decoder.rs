//! A32 decode tree: raw word to [`ArmClass`].
//!
//! Follows the top-level ARMv7-A encoding tables. Anything outside the
//! recognised subset lands on [`ArmClass::Undefined`] so that unknown bits
//! always fail closed.

#![allow(clippy::cast_possible_truncation)]

use super::classes::{
    ArmClass, BitFieldOp, DataOp, ForbiddenReason, LongMultiplyOp, MoveOp, MultiplyOp, Offset,
    Operand, TestOp, TransferSize,
};
use crate::bits::arm::{
    self as fields, BIT4, BIT7, BRANCH_SBO, COPROC, GROUP, HINT, IMM12, IMM5, LSB, MSB, MSR_MASK,
    OP1, OPCODE, REGISTER_LIST, RD, RM, RN, RS, SHIFT_TYPE, S,
};
use crate::bits::bit;
use crate::registers::{Register, RegisterList};

const fn reg(field: crate::bits::BitField, word: u32) -> Register {
    Register::from_field(field.value(word))
}

/// Classifies one A32 instruction word.
#[must_use]
pub fn classify(word: u32) -> ArmClass {
    if fields::condition(word) == fields::CONDITION_UNCONDITIONAL {
        return ArmClass::Forbidden(ForbiddenReason::Unconditional);
    }
    match GROUP.value(word) {
        0b000 | 0b001 => data_processing_and_misc(word),
        0b010 => load_store_word_byte(word),
        0b011 if !BIT4.is_set(word) => load_store_word_byte(word),
        0b011 => media(word),
        0b100 | 0b101 => branch_and_block_transfer(word),
        _ => coprocessor_and_supervisor_call(word),
    }
}

/// `op1` of the form `10xx0`: the miscellaneous and test-without-S space.
const fn is_misc_op1(op1: u32) -> bool {
    op1 & 0b11001 == 0b10000
}

fn data_processing_and_misc(word: u32) -> ArmClass {
    let op1 = OP1.value(word);
    if bit(word, 25) {
        return match op1 {
            0b10000 => move_wide(word, false),
            0b10100 => move_wide(word, true),
            _ if op1 & 0b11011 == 0b10010 => msr_immediate_and_hints(word),
            _ => data_processing(word, Operand::Immediate(IMM12.value(word))),
        };
    }

    if !BIT4.is_set(word) {
        if is_misc_op1(op1) {
            return if BIT7.is_set(word) {
                // Halfword multiplies are outside the recognised subset.
                ArmClass::Undefined
            } else {
                miscellaneous(word)
            };
        }
        return data_processing(
            word,
            Operand::ShiftedRegister {
                rm: reg(RM, word),
                shift_type: SHIFT_TYPE.value(word) as u8,
                amount: IMM5.value(word) as u8,
            },
        );
    }

    if !BIT7.is_set(word) {
        if is_misc_op1(op1) {
            return miscellaneous(word);
        }
        return data_processing(
            word,
            Operand::RegisterShiftedRegister {
                rm: reg(RM, word),
                rs: reg(RS, word),
                shift_type: SHIFT_TYPE.value(word) as u8,
            },
        );
    }

    match SHIFT_TYPE.value(word) {
        0b00 if bit(word, 24) => synchronization(word),
        0b00 => multiply(word),
        // Extra load/store with P == 0 and W == 1: the unprivileged forms.
        _ if !bit(word, 24) && bit(word, 21) => {
            ArmClass::Forbidden(ForbiddenReason::Unprivileged)
        }
        0b01 => halfword_transfer(word),
        _ => ArmClass::Undefined,
    }
}

fn data_processing(word: u32, operand: Operand) -> ArmClass {
    let s = S.is_set(word);
    let rd = reg(RD, word);
    let rn = reg(RN, word);
    let op = match OPCODE.value(word) {
        0b0000 => DataOp::And,
        0b0001 => DataOp::Eor,
        0b0010 => DataOp::Sub,
        0b0011 => DataOp::Rsb,
        0b0100 => DataOp::Add,
        0b0101 => DataOp::Adc,
        0b0110 => DataOp::Sbc,
        0b0111 => DataOp::Rsc,
        0b1100 => DataOp::Orr,
        0b1110 => DataOp::Bic,
        opcode @ 0b1000..=0b1011 => {
            let op = match opcode {
                0b1000 => TestOp::Tst,
                0b1001 => TestOp::Teq,
                0b1010 => TestOp::Cmp,
                _ => TestOp::Cmn,
            };
            return ArmClass::Test {
                op,
                rn,
                rd_field: rd,
                operand,
            };
        }
        opcode => {
            let op = if opcode == 0b1101 {
                MoveOp::Mov
            } else {
                MoveOp::Mvn
            };
            return ArmClass::Move {
                op,
                s,
                rd,
                rn_field: rn,
                operand,
            };
        }
    };
    ArmClass::DataProcessing {
        op,
        s,
        rd,
        rn,
        operand,
    }
}

fn move_wide(word: u32, top: bool) -> ArmClass {
    ArmClass::MoveWide {
        top,
        rd: reg(RD, word),
        imm16: fields::wide_immediate(word),
    }
}

fn msr_immediate_and_hints(word: u32) -> ArmClass {
    let spsr = bit(word, 22);
    let mask = MSR_MASK.value(word);
    if spsr {
        return ArmClass::Forbidden(ForbiddenReason::StatusRegister);
    }
    if mask == 0 {
        return match HINT.value(word) {
            0x00 | 0x01 => ArmClass::CondNop,
            _ => ArmClass::ForbiddenCondNop,
        };
    }
    if mask & 0b0011 != 0 {
        // Writes to the control or extension fields need privilege.
        return ArmClass::Forbidden(ForbiddenReason::StatusRegister);
    }
    ArmClass::MoveImmediate12ToApsr {
        mask: (mask >> 2) as u8,
    }
}

fn miscellaneous(word: u32) -> ArmClass {
    let op = (word >> 21) & 0b11;
    let op2 = (word >> 4) & 0b111;
    match (op2, op) {
        (0b000, _) => ArmClass::Forbidden(ForbiddenReason::StatusRegister),
        (0b001, 0b01) => ArmClass::BranchToRegister {
            link: false,
            rm: reg(RM, word),
            sbo: BRANCH_SBO.value(word) as u16,
        },
        (0b001, 0b11) => ArmClass::CountLeadingZeros {
            rd: reg(RD, word),
            rm: reg(RM, word),
        },
        (0b010, 0b01) => ArmClass::Forbidden(ForbiddenReason::Jazelle),
        (0b011, 0b01) => ArmClass::BranchToRegister {
            link: true,
            rm: reg(RM, word),
            sbo: BRANCH_SBO.value(word) as u16,
        },
        (0b111, 0b01) => ArmClass::BreakPoint {
            imm16: fields::breakpoint_immediate(word),
        },
        (0b111, 0b11) => ArmClass::Forbidden(ForbiddenReason::SecureMonitorCall),
        _ => ArmClass::Undefined,
    }
}

fn multiply(word: u32) -> ArmClass {
    let s = S.is_set(word);
    let high = reg(RN, word);
    let low = reg(RD, word);
    let rm = reg(RS, word);
    let rn = reg(RM, word);
    let op = (word >> 20) & 0b1111;
    let multiply = |op| ArmClass::Multiply {
        op,
        s,
        rd: high,
        rn,
        rm,
        ra: low,
    };
    let long = |op| ArmClass::MultiplyLong {
        op,
        s,
        rd_hi: high,
        rd_lo: low,
        rn,
        rm,
    };
    match op {
        0b0000 | 0b0001 => multiply(MultiplyOp::Mul),
        0b0010 | 0b0011 => multiply(MultiplyOp::Mla),
        0b0100 => long(LongMultiplyOp::Umaal),
        0b0110 => multiply(MultiplyOp::Mls),
        0b1000 | 0b1001 => long(LongMultiplyOp::Umull),
        0b1010 | 0b1011 => long(LongMultiplyOp::Umlal),
        0b1100 | 0b1101 => long(LongMultiplyOp::Smull),
        0b1110 | 0b1111 => long(LongMultiplyOp::Smlal),
        _ => ArmClass::Undefined,
    }
}

fn synchronization(word: u32) -> ArmClass {
    let rn = reg(RN, word);
    match (word >> 20) & 0b1111 {
        op @ (0b0000 | 0b0100) => ArmClass::Swap {
            byte: op == 0b0100,
            rt: reg(RD, word),
            rt2: reg(RM, word),
            rn,
        },
        0b1000 => ArmClass::StoreExclusive {
            rd: reg(RD, word),
            rt: reg(RM, word),
            rn,
        },
        0b1001 => ArmClass::LoadExclusive {
            rt: reg(RD, word),
            rn,
        },
        _ => ArmClass::Undefined,
    }
}

fn halfword_transfer(word: u32) -> ArmClass {
    let offset = if bit(word, 22) {
        Offset::Immediate(fields::split_imm8(word))
    } else {
        Offset::Register {
            rm: reg(RM, word),
            shift_type: 0,
            amount: 0,
        }
    };
    single_transfer(word, TransferSize::Halfword, offset)
}

fn load_store_word_byte(word: u32) -> ArmClass {
    if !bit(word, 24) && bit(word, 21) {
        return ArmClass::Forbidden(ForbiddenReason::Unprivileged);
    }
    let size = if bit(word, 22) {
        TransferSize::Byte
    } else {
        TransferSize::Word
    };
    let offset = if bit(word, 25) {
        Offset::Register {
            rm: reg(RM, word),
            shift_type: SHIFT_TYPE.value(word) as u8,
            amount: IMM5.value(word) as u8,
        }
    } else {
        Offset::Immediate(IMM12.value(word))
    };
    single_transfer(word, size, offset)
}

fn single_transfer(word: u32, size: TransferSize, offset: Offset) -> ArmClass {
    ArmClass::LoadStore {
        size,
        load: S.is_set(word),
        rt: reg(RD, word),
        rn: reg(RN, word),
        offset,
        pre_index: bit(word, 24),
        add: bit(word, 23),
        w: bit(word, 21),
    }
}

fn media(word: u32) -> ArmClass {
    let op1 = OP1.value(word);
    let op2 = (word >> 5) & 0b111;
    let rd = reg(RD, word);
    let rn = reg(RN, word);
    let lsb = LSB.value(word) as u8;
    let msb = MSB.value(word) as u8;
    let bit_field = |op| ArmClass::BitField {
        op,
        rd,
        rn,
        lsb,
        msb,
    };
    match (op1 >> 1, op2 & 0b011) {
        (0b1101, 0b10) => bit_field(BitFieldOp::Sbfx),
        (0b1111, 0b10) => bit_field(BitFieldOp::Ubfx),
        (0b1110, 0b00) if rn == Register::PC => bit_field(BitFieldOp::Bfc),
        (0b1110, 0b00) => bit_field(BitFieldOp::Bfi),
        // UDF and everything else in the media space.
        _ => ArmClass::Undefined,
    }
}

fn branch_and_block_transfer(word: u32) -> ArmClass {
    if bit(word, 25) {
        return ArmClass::Branch {
            link: bit(word, 24),
            offset: fields::branch_offset(word),
        };
    }
    if bit(word, 22) {
        return ArmClass::Forbidden(ForbiddenReason::BankedRegisters);
    }
    ArmClass::LoadStoreMultiple {
        load: S.is_set(word),
        rn: reg(RN, word),
        writeback: bit(word, 21),
        registers: RegisterList::from_bits(REGISTER_LIST.value(word)),
    }
}

fn coprocessor_and_supervisor_call(word: u32) -> ArmClass {
    let op1 = OP1.value(word) | ((word >> 20) & 0b10_0000);
    if op1 & 0b11_0000 == 0b11_0000 {
        return ArmClass::Forbidden(ForbiddenReason::SupervisorCall);
    }
    if op1 & 0b11_1110 == 0 {
        return ArmClass::Undefined;
    }
    let vfp = COPROC.value(word) & 0b1110 == 0b1010;
    if vfp && op1 & 0b11_0000 == 0b10_0000 && !BIT4.is_set(word) {
        return ArmClass::CondVfpOp;
    }
    ArmClass::Forbidden(ForbiddenReason::Coprocessor)
}
