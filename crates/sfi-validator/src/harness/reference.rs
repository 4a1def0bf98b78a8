//! Reference x86-32 length decoder.
//!
//! Built from opcode range tables in the style of the architecture manual's
//! opcode maps rather than from the production decoder's match arms, so the
//! two can be checked against each other. It reports lengths only.

use super::{DecoderObservation, EnumeratorDecoder};

const DEFINED: u8 = 0x01;
const MODRM: u8 = 0x02;
const IMM8: u8 = 0x04;
const IMM16: u8 = 0x08;
const IMMZ: u8 = 0x10;
const FAR: u8 = 0x20;
const MOFFS: u8 = 0x40;
const GROUP3: u8 = 0x80;

const M: u8 = DEFINED | MODRM;
const MB: u8 = M | IMM8;
const MZ: u8 = M | IMMZ;
const P: u8 = DEFINED;
const B: u8 = DEFINED | IMM8;
const W: u8 = DEFINED | IMM16;
const Z: u8 = DEFINED | IMMZ;

const LIMIT: usize = 15;

const ONE_BYTE_RANGES: &[(u8, u8, u8)] = &[
    (0x00, 0x03, M),
    (0x04, 0x04, B),
    (0x05, 0x05, Z),
    (0x06, 0x07, P),
    (0x08, 0x0B, M),
    (0x0C, 0x0C, B),
    (0x0D, 0x0D, Z),
    (0x0E, 0x0E, P),
    (0x10, 0x13, M),
    (0x14, 0x14, B),
    (0x15, 0x15, Z),
    (0x16, 0x17, P),
    (0x18, 0x1B, M),
    (0x1C, 0x1C, B),
    (0x1D, 0x1D, Z),
    (0x1E, 0x1F, P),
    (0x20, 0x23, M),
    (0x24, 0x24, B),
    (0x25, 0x25, Z),
    (0x27, 0x27, P),
    (0x28, 0x2B, M),
    (0x2C, 0x2C, B),
    (0x2D, 0x2D, Z),
    (0x2F, 0x2F, P),
    (0x30, 0x33, M),
    (0x34, 0x34, B),
    (0x35, 0x35, Z),
    (0x37, 0x37, P),
    (0x38, 0x3B, M),
    (0x3C, 0x3C, B),
    (0x3D, 0x3D, Z),
    (0x3F, 0x3F, P),
    (0x40, 0x61, P),
    (0x62, 0x63, M),
    (0x68, 0x68, Z),
    (0x69, 0x69, MZ),
    (0x6A, 0x6A, B),
    (0x6B, 0x6B, MB),
    (0x6C, 0x6F, P),
    (0x70, 0x7F, B),
    (0x80, 0x80, MB),
    (0x81, 0x81, MZ),
    (0x82, 0x83, MB),
    (0x84, 0x8F, M),
    (0x90, 0x99, P),
    (0x9A, 0x9A, DEFINED | FAR),
    (0x9B, 0x9F, P),
    (0xA0, 0xA3, DEFINED | MOFFS),
    (0xA4, 0xA7, P),
    (0xA8, 0xA8, B),
    (0xA9, 0xA9, Z),
    (0xAA, 0xAF, P),
    (0xB0, 0xB7, B),
    (0xB8, 0xBF, Z),
    (0xC0, 0xC1, MB),
    (0xC2, 0xC2, W),
    (0xC3, 0xC3, P),
    (0xC4, 0xC5, M),
    (0xC6, 0xC6, MB),
    (0xC7, 0xC7, MZ),
    (0xC8, 0xC8, W | IMM8),
    (0xC9, 0xC9, P),
    (0xCA, 0xCA, W),
    (0xCB, 0xCC, P),
    (0xCD, 0xCD, B),
    (0xCE, 0xCF, P),
    (0xD0, 0xD3, M),
    (0xD4, 0xD5, B),
    (0xD7, 0xD7, P),
    (0xD8, 0xDF, M),
    (0xE0, 0xE7, B),
    (0xE8, 0xE9, Z),
    (0xEA, 0xEA, DEFINED | FAR),
    (0xEB, 0xEB, B),
    (0xEC, 0xEF, P),
    (0xF4, 0xF5, P),
    (0xF6, 0xF6, MB | GROUP3),
    (0xF7, 0xF7, MZ | GROUP3),
    (0xF8, 0xFD, P),
    (0xFE, 0xFF, M),
];

const TWO_BYTE_RANGES: &[(u8, u8, u8)] = &[
    (0x00, 0x03, M),
    (0x05, 0x09, P),
    (0x0B, 0x0B, P),
    (0x0D, 0x0D, M),
    (0x10, 0x23, M),
    (0x28, 0x2F, M),
    (0x30, 0x35, P),
    (0x40, 0x6F, M),
    (0x70, 0x73, MB),
    (0x74, 0x76, M),
    (0x77, 0x77, P),
    (0x7C, 0x7F, M),
    (0x80, 0x8F, Z),
    (0x90, 0x9F, M),
    (0xA0, 0xA2, P),
    (0xA3, 0xA3, M),
    (0xA4, 0xA4, MB),
    (0xA5, 0xA5, M),
    (0xA8, 0xAA, P),
    (0xAB, 0xAB, M),
    (0xAC, 0xAC, MB),
    (0xAD, 0xB9, M),
    (0xBA, 0xBA, MB),
    (0xBB, 0xC1, M),
    (0xC2, 0xC2, MB),
    (0xC3, 0xC3, M),
    (0xC4, 0xC6, MB),
    (0xC7, 0xC7, M),
    (0xC8, 0xCF, P),
    (0xD0, 0xFE, M),
];

const fn expand(ranges: &[(u8, u8, u8)]) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < ranges.len() {
        let (low, high, flags) = ranges[i];
        let mut opcode = low as usize;
        while opcode <= high as usize {
            table[opcode] = flags;
            opcode += 1;
        }
        i += 1;
    }
    table
}

static ONE_BYTE: [u8; 256] = expand(ONE_BYTE_RANGES);
static TWO_BYTE: [u8; 256] = expand(TWO_BYTE_RANGES);

const fn is_prefix(byte: u8) -> bool {
    matches!(
        byte,
        0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 | 0x66 | 0x67 | 0xF0 | 0xF2 | 0xF3
    )
}

/// Length-only x86-32 decoder driven by opcode range tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceX86Decoder;

impl ReferenceX86Decoder {
    /// Length of the instruction at the start of `bytes`, if it decodes.
    #[must_use]
    pub fn length(bytes: &[u8]) -> Option<usize> {
        let mut cursor = 0;
        let mut operand16 = false;
        let mut address16 = false;
        let mut opcode = *bytes.first()?;
        while is_prefix(opcode) {
            operand16 |= opcode == 0x66;
            address16 |= opcode == 0x67;
            cursor += 1;
            if cursor == LIMIT {
                return None;
            }
            opcode = *bytes.get(cursor)?;
        }
        cursor += 1;

        let flags = if opcode == 0x0F {
            let second = *bytes.get(cursor)?;
            cursor += 1;
            match second {
                0x38 => {
                    cursor += 1;
                    M
                }
                0x3A => {
                    cursor += 1;
                    MB
                }
                _ => TWO_BYTE[usize::from(second)],
            }
        } else {
            ONE_BYTE[usize::from(opcode)]
        };
        if flags & DEFINED == 0 {
            return None;
        }

        let mut reg = 0;
        if flags & MODRM != 0 {
            let modrm = *bytes.get(cursor)?;
            cursor += 1;
            let mode = modrm >> 6;
            let rm = modrm & 7;
            reg = (modrm >> 3) & 7;
            cursor += if address16 {
                match mode {
                    0 if rm == 6 => 2,
                    1 => 1,
                    2 => 2,
                    _ => 0,
                }
            } else {
                let mut extra = 0;
                let mut base = rm;
                if mode != 3 && rm == 4 {
                    base = *bytes.get(cursor)? & 7;
                    extra += 1;
                }
                extra
                    + match mode {
                        0 if base == 5 => 4,
                        1 => 1,
                        2 => 4,
                        _ => 0,
                    }
            };
        }

        let full = if operand16 { 2 } else { 4 };
        let group_immediate = flags & GROUP3 == 0 || reg < 2;
        if group_immediate {
            if flags & IMM8 != 0 {
                cursor += 1;
            }
            if flags & IMMZ != 0 {
                cursor += full;
            }
        }
        if flags & IMM16 != 0 {
            cursor += 2;
        }
        if flags & FAR != 0 {
            cursor += full + 2;
        }
        if flags & MOFFS != 0 {
            cursor += if address16 { 2 } else { 4 };
        }

        (cursor <= LIMIT && cursor <= bytes.len()).then_some(cursor)
    }
}

impl EnumeratorDecoder for ReferenceX86Decoder {
    fn name(&self) -> &'static str {
        "reference-x86"
    }

    fn decode(&self, bytes: &[u8]) -> DecoderObservation {
        DecoderObservation {
            length: Self::length(bytes),
            shape: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0x90], Some(1))]
    #[case(&[0x8B, 0x04, 0x25, 0, 0, 0, 0], Some(7))]
    #[case(&[0x67, 0x8B, 0x46, 0x10], Some(4))]
    #[case(&[0x66, 0xEA, 0, 0, 0, 0], Some(6))]
    #[case(&[0xF7, 0xC0, 0, 0, 0, 0], Some(6))]
    #[case(&[0xF7, 0xD8], Some(2))]
    #[case(&[0xC8, 0, 0, 0], Some(4))]
    #[case(&[0x0F, 0x3A, 0x0F, 0xC1, 0x08], Some(5))]
    #[case(&[0xD6], None)]
    #[case(&[0x0F, 0xFF], None)]
    #[case(&[0xE9, 0, 0], None)]
    fn table_lengths(#[case] bytes: &[u8], #[case] expected: Option<usize>) {
        assert_eq!(ReferenceX86Decoder::length(bytes), expected);
    }

    #[test]
    fn one_byte_table_defines_every_non_prefix_opcode_but_three() {
        let defined = (0..=0xFFu8)
            .filter(|opcode| !is_prefix(*opcode) && *opcode != 0x0F)
            .filter(|opcode| ONE_BYTE[usize::from(*opcode)] & DEFINED != 0)
            .count();
        assert_eq!(defined, 242);
    }
}
