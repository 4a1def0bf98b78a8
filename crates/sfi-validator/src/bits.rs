//! Bit-field accessors over raw instruction words and bytes.
//!
//! Every accessor is total: any bit pattern is a valid input, and giving the
//! extracted value a meaning is left to the classifiers.

/// A contiguous range of bits inside a 32-bit instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitField {
    lsb: u8,
    width: u8,
}

impl BitField {
    /// Creates a field covering `width` bits starting at bit `lsb`.
    ///
    /// Ranges running past bit 31 are truncated at the top of the word.
    #[must_use]
    pub const fn new(lsb: u8, width: u8) -> Self {
        Self { lsb, width }
    }

    /// Lowest bit index covered by this field.
    #[must_use]
    pub const fn lsb(self) -> u8 {
        self.lsb
    }

    /// Number of bits covered by this field.
    #[must_use]
    pub const fn width(self) -> u8 {
        self.width
    }

    /// Mask of the field's bits once shifted down to bit 0.
    #[must_use]
    pub const fn mask(self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// Extracts the field as an unsigned value.
    #[must_use]
    pub const fn value(self, word: u32) -> u32 {
        match word.checked_shr(self.lsb as u32) {
            Some(shifted) => shifted & self.mask(),
            None => 0,
        }
    }

    /// Extracts the field and sign-extends it from its top bit.
    #[must_use]
    pub const fn signed_value(self, word: u32) -> i32 {
        sign_extend(self.value(word), self.width)
    }

    /// True when any bit of the field is set.
    #[must_use]
    pub const fn is_set(self, word: u32) -> bool {
        self.value(word) != 0
    }

    /// Places `value` into the field position, dropping bits that do not fit.
    #[must_use]
    pub const fn place(self, value: u32) -> u32 {
        match (value & self.mask()).checked_shl(self.lsb as u32) {
            Some(placed) => placed,
            None => 0,
        }
    }
}

/// Sign-extends the low `width` bits of `value`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn sign_extend(value: u32, width: u8) -> i32 {
    if width == 0 {
        return 0;
    }
    if width >= 32 {
        return value as i32;
    }
    let shift = 32 - width as u32;
    ((value << shift) as i32) >> shift
}

/// Returns bit `index` of `word`; indices past 31 read as clear.
#[must_use]
pub const fn bit(word: u32, index: u8) -> bool {
    BitField::new(index, 1).is_set(word)
}

/// Named fields of the fixed-width (A32) encoding.
pub mod arm {
    use super::BitField;

    /// Condition code, bits 31:28.
    pub const COND: BitField = BitField::new(28, 4);
    /// Top-level encoding group, bits 27:25.
    pub const GROUP: BitField = BitField::new(25, 3);
    /// Data-processing opcode, bits 24:21.
    pub const OPCODE: BitField = BitField::new(21, 4);
    /// Five-bit `op1` selector used by the data-processing and media tables, bits 24:20.
    pub const OP1: BitField = BitField::new(20, 5);
    /// Immediate-form selector, bit 25.
    pub const IMMEDIATE: BitField = BitField::new(25, 1);
    /// Pre-index selector, bit 24.
    pub const P: BitField = BitField::new(24, 1);
    /// Add-offset selector, bit 23.
    pub const U: BitField = BitField::new(23, 1);
    /// Byte-size, SPSR or user-bank selector, bit 22.
    pub const B: BitField = BitField::new(22, 1);
    /// Write-back selector, bit 21.
    pub const W: BitField = BitField::new(21, 1);
    /// Flag-update or load selector, bit 20.
    pub const S: BitField = BitField::new(20, 1);
    /// First operand register, bits 19:16.
    pub const RN: BitField = BitField::new(16, 4);
    /// Destination or transfer register, bits 15:12.
    pub const RD: BitField = BitField::new(12, 4);
    /// Shift amount register, bits 11:8.
    pub const RS: BitField = BitField::new(8, 4);
    /// Second operand register, bits 3:0.
    pub const RM: BitField = BitField::new(0, 4);
    /// Modified immediate, bits 11:0.
    pub const IMM12: BitField = BitField::new(0, 12);
    /// Upper half of a split 16-bit immediate, bits 19:16.
    pub const IMM4_HIGH: BitField = BitField::new(16, 4);
    /// Upper nibble of a split 8-bit offset, bits 11:8.
    pub const IMM4_MIDDLE: BitField = BitField::new(8, 4);
    /// Low nibble of split immediates, bits 3:0.
    pub const IMM4_LOW: BitField = BitField::new(0, 4);
    /// Branch offset in words, bits 23:0.
    pub const IMM24: BitField = BitField::new(0, 24);
    /// Shift amount, bits 11:7.
    pub const IMM5: BitField = BitField::new(7, 5);
    /// Shift type, bits 6:5.
    pub const SHIFT_TYPE: BitField = BitField::new(5, 2);
    /// Secondary opcode, bits 7:4.
    pub const OP2: BitField = BitField::new(4, 4);
    /// Register-operand marker, bit 4.
    pub const BIT4: BitField = BitField::new(4, 1);
    /// Multiply or extra load/store marker, bit 7.
    pub const BIT7: BitField = BitField::new(7, 1);
    /// Bit-field MSB or `width - 1`, bits 20:16.
    pub const MSB: BitField = BitField::new(16, 5);
    /// Bit-field LSB, bits 11:7.
    pub const LSB: BitField = BitField::new(7, 5);
    /// Register list of block transfers, bits 15:0.
    pub const REGISTER_LIST: BitField = BitField::new(0, 16);
    /// Coprocessor number, bits 11:8.
    pub const COPROC: BitField = BitField::new(8, 4);
    /// Status register write mask, bits 19:16.
    pub const MSR_MASK: BitField = BitField::new(16, 4);
    /// Hint selector, bits 7:0.
    pub const HINT: BitField = BitField::new(0, 8);
    /// Should-be-one field of `BX`/`BLX`, bits 19:8.
    pub const BRANCH_SBO: BitField = BitField::new(8, 12);
    /// High twelve bits of the `BKPT` immediate, bits 19:8.
    pub const BKPT_HIGH: BitField = BitField::new(8, 12);

    /// Condition value meaning "always".
    pub const CONDITION_ALWAYS: u8 = 0xE;
    /// Condition value meaning "equal" (Z set).
    pub const CONDITION_EQUAL: u8 = 0x0;
    /// Condition value that selects the unconditional encoding space.
    pub const CONDITION_UNCONDITIONAL: u8 = 0xF;

    /// Reads the 4-bit condition code.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn condition(word: u32) -> u8 {
        COND.value(word) as u8
    }

    /// Expands a 12-bit modified immediate (`imm8` rotated right by `2 * rot`).
    #[must_use]
    pub const fn expand_imm12(imm12: u32) -> u32 {
        let imm8 = imm12 & 0xFF;
        let rotation = ((imm12 >> 8) & 0xF) * 2;
        imm8.rotate_right(rotation)
    }

    /// Byte offset of a `B`/`BL` relative to the branch address plus eight.
    #[must_use]
    pub const fn branch_offset(word: u32) -> i32 {
        IMM24.signed_value(word).wrapping_mul(4)
    }

    /// The 16-bit immediate split across bits 19:8 and 3:0 of `BKPT`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn breakpoint_immediate(word: u32) -> u16 {
        ((BKPT_HIGH.value(word) << 4) | IMM4_LOW.value(word)) as u16
    }

    /// The 16-bit immediate of `MOVW`/`MOVT`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn wide_immediate(word: u32) -> u16 {
        ((IMM4_HIGH.value(word) << 12) | IMM12.value(word)) as u16
    }

    /// The 8-bit offset of halfword transfers, split across bits 11:8 and 3:0.
    #[must_use]
    pub const fn split_imm8(word: u32) -> u32 {
        (IMM4_MIDDLE.value(word) << 4) | IMM4_LOW.value(word)
    }
}

/// Field accessors for the variable-length (x86-32) encoding.
pub mod x86 {
    /// `mod` field of a ModRM byte.
    #[must_use]
    pub const fn modrm_mod(modrm: u8) -> u8 {
        modrm >> 6
    }

    /// `reg` (or opcode extension) field of a ModRM byte.
    #[must_use]
    pub const fn modrm_reg(modrm: u8) -> u8 {
        (modrm >> 3) & 0x7
    }

    /// `rm` field of a ModRM byte.
    #[must_use]
    pub const fn modrm_rm(modrm: u8) -> u8 {
        modrm & 0x7
    }

    /// Scale field of a SIB byte.
    #[must_use]
    pub const fn sib_scale(sib: u8) -> u8 {
        sib >> 6
    }

    /// Index field of a SIB byte.
    #[must_use]
    pub const fn sib_index(sib: u8) -> u8 {
        (sib >> 3) & 0x7
    }

    /// Base field of a SIB byte.
    #[must_use]
    pub const fn sib_base(sib: u8) -> u8 {
        sib & 0x7
    }

    /// Reads a little-endian immediate of `size` bytes (1, 2 or 4), sign-extended.
    ///
    /// Missing bytes read as zero.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn signed_immediate(bytes: &[u8], offset: usize, size: usize) -> i32 {
        let byte = |i: usize| bytes.get(offset + i).copied().unwrap_or(0);
        match size {
            1 => i32::from(byte(0) as i8),
            2 => i32::from(i16::from_le_bytes([byte(0), byte(1)])),
            4 => i32::from_le_bytes([byte(0), byte(1), byte(2), byte(3)]),
            _ => 0,
        }
    }
}
