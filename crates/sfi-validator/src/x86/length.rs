//! Length-determination pass for x86-32 instructions.
//!
//! Walks prefixes, opcode bytes, ModRM/SIB, displacement and immediate to find
//! where an instruction ends. Nothing here assigns meaning to the opcode; that
//! is the shape pass in [`super::classes`].

use crate::bits::x86::{modrm_mod, modrm_reg, modrm_rm, sib_base};

/// Architectural limit on instruction length.
pub const MAX_INSTRUCTION_BYTES: usize = 15;

/// Legacy prefixes seen before the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Prefixes {
    /// `66`.
    pub operand_size: bool,
    /// `67`.
    pub address_size: bool,
    /// `F0`.
    pub lock: bool,
    /// `F3`.
    pub rep: bool,
    /// `F2`.
    pub repne: bool,
    /// Last segment override byte, if any.
    pub segment: Option<u8>,
    /// Number of prefix bytes.
    pub count: u8,
}

impl Prefixes {
    /// Records `byte` if it is a legacy prefix; returns false otherwise.
    pub fn absorb(&mut self, byte: u8) -> bool {
        match byte {
            0x66 => self.operand_size = true,
            0x67 => self.address_size = true,
            0xF0 => self.lock = true,
            0xF2 => self.repne = true,
            0xF3 => self.rep = true,
            0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 => self.segment = Some(byte),
            _ => return false,
        }
        self.count += 1;
        true
    }
}

/// Opcode map selected by escape bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeMap {
    /// No escape.
    OneByte,
    /// `0F xx`.
    TwoByte,
    /// `0F 38 xx`.
    ThreeByte38,
    /// `0F 3A xx`.
    ThreeByte3A,
}

/// Immediate operand forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImmediateKind {
    /// No immediate.
    None,
    /// `Ib`.
    Byte,
    /// `Iw`.
    Word,
    /// `Iz`: 4 bytes, or 2 under an operand-size prefix.
    Full,
    /// `Iw, Ib` (`ENTER`).
    WordByte,
    /// `Ap`: 6-byte far pointer, or 4 under an operand-size prefix.
    FarPointer,
    /// `moffs`: 4-byte offset, or 2 under an address-size prefix.
    MemoryOffset,
    /// `Ib` only for ModRM `reg` 0 and 1 (group 3 byte form).
    TestByte,
    /// `Iz` only for ModRM `reg` 0 and 1 (group 3 full form).
    TestFull,
}

/// Operand layout of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpcodeShape {
    /// A ModRM byte follows the opcode.
    pub modrm: bool,
    /// Immediate following ModRM and displacement.
    pub immediate: ImmediateKind,
}

impl OpcodeShape {
    const fn new(modrm: bool, immediate: ImmediateKind) -> Self {
        Self { modrm, immediate }
    }
}

const PLAIN: OpcodeShape = OpcodeShape::new(false, ImmediateKind::None);
const MODRM: OpcodeShape = OpcodeShape::new(true, ImmediateKind::None);
const MODRM_IB: OpcodeShape = OpcodeShape::new(true, ImmediateKind::Byte);
const MODRM_IZ: OpcodeShape = OpcodeShape::new(true, ImmediateKind::Full);
const IB: OpcodeShape = OpcodeShape::new(false, ImmediateKind::Byte);
const IW: OpcodeShape = OpcodeShape::new(false, ImmediateKind::Word);
const IZ: OpcodeShape = OpcodeShape::new(false, ImmediateKind::Full);

/// Operand layout of a one-byte opcode; `None` for prefixes, the `0F` escape
/// and undefined opcodes.
#[must_use]
pub const fn one_byte_shape(opcode: u8) -> Option<OpcodeShape> {
    let shape = match opcode {
        0x0F | 0x26 | 0x2E | 0x36 | 0x3E | 0x64..=0x67 | 0xF0 | 0xF2 | 0xF3 => return None,
        0xD6 | 0xF1 => return None,
        0x00..=0x3F => match opcode & 0x07 {
            0..=3 => MODRM,
            4 => IB,
            5 => IZ,
            _ => PLAIN,
        },
        0x40..=0x61 | 0x6C..=0x6F | 0x90..=0x99 | 0x9B..=0x9F | 0xA4..=0xA7 | 0xAA..=0xAF => {
            PLAIN
        }
        0x62 | 0x63 | 0x84..=0x8F | 0xC4 | 0xC5 | 0xD0..=0xD3 | 0xD8..=0xDF | 0xFE | 0xFF => {
            MODRM
        }
        0x68 | 0xA9 | 0xB8..=0xBF | 0xE8 | 0xE9 => IZ,
        0x69 | 0x81 | 0xC7 => MODRM_IZ,
        0x6A | 0x70..=0x7F | 0xA8 | 0xB0..=0xB7 | 0xCD | 0xD4 | 0xD5 | 0xE0..=0xE7 | 0xEB => IB,
        0x6B | 0x80 | 0x82 | 0x83 | 0xC0 | 0xC1 | 0xC6 => MODRM_IB,
        0x9A | 0xEA => OpcodeShape::new(false, ImmediateKind::FarPointer),
        0xA0..=0xA3 => OpcodeShape::new(false, ImmediateKind::MemoryOffset),
        0xC2 | 0xCA => IW,
        0xC8 => OpcodeShape::new(false, ImmediateKind::WordByte),
        0xC3 | 0xC9 | 0xCB | 0xCC | 0xCE | 0xCF | 0xD7 | 0xEC..=0xEF | 0xF4 | 0xF5 => PLAIN,
        0xF6 => OpcodeShape::new(true, ImmediateKind::TestByte),
        0xF7 => OpcodeShape::new(true, ImmediateKind::TestFull),
        0xF8..=0xFD => PLAIN,
    };
    Some(shape)
}

/// Operand layout of a `0F xx` opcode; `None` for undefined opcodes and the
/// three-byte escapes.
#[must_use]
pub const fn two_byte_shape(opcode: u8) -> Option<OpcodeShape> {
    let shape = match opcode {
        0x00..=0x03
        | 0x0D
        | 0x10..=0x23
        | 0x28..=0x2F
        | 0x40..=0x6F
        | 0x74..=0x76
        | 0x7C..=0x7F
        | 0x90..=0x9F
        | 0xA3
        | 0xA5
        | 0xAB
        | 0xAD..=0xAF
        | 0xB0..=0xB9
        | 0xBB..=0xC1
        | 0xC3
        | 0xC7
        | 0xD0..=0xFE => MODRM,
        0x70..=0x73 | 0xA4 | 0xAC | 0xBA | 0xC2 | 0xC4..=0xC6 => MODRM_IB,
        0x80..=0x8F => IZ,
        0x05..=0x09 | 0x0B | 0x30..=0x35 | 0x77 | 0xA0..=0xA2 | 0xA8..=0xAA | 0xC8..=0xCF => {
            PLAIN
        }
        _ => return None,
    };
    Some(shape)
}

/// Byte layout of one instruction as found by the length pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layout {
    /// Legacy prefixes.
    pub prefixes: Prefixes,
    /// Opcode map.
    pub map: OpcodeMap,
    /// Final opcode byte within `map`.
    pub opcode: u8,
    /// ModRM byte, if present.
    pub modrm: Option<u8>,
    /// SIB byte, if present.
    pub sib: Option<u8>,
    /// Displacement size in bytes.
    pub displacement_size: u8,
    /// Offset of the immediate from the first byte.
    pub immediate_offset: u8,
    /// Immediate size in bytes.
    pub immediate_size: u8,
    /// Total instruction length in bytes.
    pub length: u8,
}

impl Layout {
    /// ModRM `reg` field, or zero without ModRM.
    #[must_use]
    pub fn reg(&self) -> u8 {
        self.modrm.map_or(0, modrm_reg)
    }

    /// ModRM `rm` field, or zero without ModRM.
    #[must_use]
    pub fn rm(&self) -> u8 {
        self.modrm.map_or(0, modrm_rm)
    }

    /// True when ModRM selects a register operand (`mod == 3`).
    #[must_use]
    pub fn is_register_form(&self) -> bool {
        self.modrm.is_some_and(|modrm| modrm_mod(modrm) == 3)
    }

    /// True when ModRM selects a memory operand.
    #[must_use]
    pub fn has_memory_operand(&self) -> bool {
        self.modrm.is_some_and(|modrm| modrm_mod(modrm) != 3)
    }
}

/// Finds the layout of the instruction at the start of `bytes`.
///
/// Returns `None` for undefined opcodes, instructions longer than
/// [`MAX_INSTRUCTION_BYTES`], and instructions truncated by the end of `bytes`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn scan(bytes: &[u8]) -> Option<Layout> {
    let mut prefixes = Prefixes::default();
    let mut pos = 0usize;
    while prefixes.absorb(*bytes.get(pos)?) {
        pos += 1;
        if pos >= MAX_INSTRUCTION_BYTES {
            return None;
        }
    }

    let first = bytes[pos];
    pos += 1;
    let (map, opcode, shape) = if first == 0x0F {
        let second = *bytes.get(pos)?;
        pos += 1;
        match second {
            0x38 | 0x3A => {
                let third = *bytes.get(pos)?;
                pos += 1;
                if second == 0x38 {
                    (OpcodeMap::ThreeByte38, third, MODRM)
                } else {
                    (OpcodeMap::ThreeByte3A, third, MODRM_IB)
                }
            }
            _ => (OpcodeMap::TwoByte, second, two_byte_shape(second)?),
        }
    } else {
        (OpcodeMap::OneByte, first, one_byte_shape(first)?)
    };

    let mut modrm = None;
    let mut sib = None;
    let mut displacement_size = 0u8;
    if shape.modrm {
        let byte = *bytes.get(pos)?;
        pos += 1;
        modrm = Some(byte);
        let mode = modrm_mod(byte);
        let rm = modrm_rm(byte);
        if prefixes.address_size {
            displacement_size = match (mode, rm) {
                (0, 6) | (2, _) => 2,
                (1, _) => 1,
                _ => 0,
            };
        } else if mode != 3 {
            if rm == 4 {
                let byte = *bytes.get(pos)?;
                pos += 1;
                sib = Some(byte);
            }
            let sib_disp32 = sib.is_some_and(|sib| sib_base(sib) == 5);
            displacement_size = match mode {
                0 if rm == 5 || sib_disp32 => 4,
                1 => 1,
                2 => 4,
                _ => 0,
            };
        }
        pos += usize::from(displacement_size);
    }

    let full = if prefixes.operand_size { 2 } else { 4 };
    let group_selects_immediate = modrm.is_some_and(|modrm| modrm_reg(modrm) < 2);
    let immediate_size: u8 = match shape.immediate {
        ImmediateKind::None => 0,
        ImmediateKind::Byte => 1,
        ImmediateKind::Word => 2,
        ImmediateKind::Full => full,
        ImmediateKind::WordByte => 3,
        ImmediateKind::FarPointer => full + 2,
        ImmediateKind::MemoryOffset => {
            if prefixes.address_size {
                2
            } else {
                4
            }
        }
        ImmediateKind::TestByte if group_selects_immediate => 1,
        ImmediateKind::TestFull if group_selects_immediate => full,
        ImmediateKind::TestByte | ImmediateKind::TestFull => 0,
    };
    let immediate_offset = pos;
    pos += usize::from(immediate_size);

    if pos > MAX_INSTRUCTION_BYTES || pos > bytes.len() {
        return None;
    }

    Some(Layout {
        prefixes,
        map,
        opcode,
        modrm,
        sib,
        displacement_size,
        immediate_offset: immediate_offset as u8,
        immediate_size,
        length: pos as u8,
    })
}
