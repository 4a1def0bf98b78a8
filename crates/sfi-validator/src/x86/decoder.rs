//! Shape pass for x86-32: a [`Layout`] and its bytes to [`X86Class`].

use super::classes::X86Class;
use super::length::{Layout, OpcodeMap};
use crate::bits::x86::signed_immediate;
use crate::registers::Register;

fn immediate(layout: &Layout, bytes: &[u8]) -> i32 {
    signed_immediate(
        bytes,
        usize::from(layout.immediate_offset),
        usize::from(layout.immediate_size),
    )
}

/// Classifies an instruction whose length pass produced `layout`.
///
/// `bytes` must hold the instruction's bytes, starting at its first prefix.
#[must_use]
pub fn classify(layout: &Layout, bytes: &[u8]) -> X86Class {
    match layout.map {
        OpcodeMap::OneByte => one_byte(layout, bytes),
        OpcodeMap::TwoByte => two_byte(layout, bytes),
        OpcodeMap::ThreeByte38 => three_byte_38(layout.opcode),
        OpcodeMap::ThreeByte3A => three_byte_3a(layout.opcode),
    }
}

#[allow(clippy::cast_sign_loss)]
fn one_byte(layout: &Layout, bytes: &[u8]) -> X86Class {
    let rel = immediate(layout, bytes);
    let reg = layout.reg();
    let register_form = layout.is_register_form();
    match layout.opcode {
        0xE9 | 0xEB => X86Class::DirectJump { rel },
        0x70..=0x7F | 0xE0..=0xE3 => X86Class::ConditionalJump { rel },
        0xE8 => X86Class::DirectCall { rel },
        0xFF => match reg {
            0 | 1 | 6 => X86Class::Plain,
            2 if register_form => X86Class::IndirectCall {
                target: Register::new(layout.rm()),
            },
            4 if register_form => X86Class::IndirectJump {
                target: Register::new(layout.rm()),
            },
            2 | 4 => X86Class::MemoryIndirectBranch,
            3 | 5 => X86Class::FarTransfer,
            _ => X86Class::Undefined,
        },
        0xFE if reg < 2 => X86Class::Plain,
        0xFE => X86Class::Undefined,
        // XABORT and XBEGIN sit in slot 7; slots 1 to 6 are unassigned.
        0xC6 | 0xC7 | 0x8F if reg != 0 => X86Class::Undefined,
        0xF6 | 0xF7 if reg == 1 => X86Class::Undefined,
        0xC0 | 0xC1 | 0xD0..=0xD3 if reg == 6 => X86Class::Undefined,
        0x8C if reg > 5 => X86Class::Undefined,
        0x8D if register_form => X86Class::Undefined,
        0x81 | 0x83 if reg == 4 && register_form && !layout.prefixes.operand_size => {
            X86Class::CodeMask {
                register: Register::new(layout.rm()),
                immediate: rel as u32,
            }
        }
        0xC2 | 0xC3 => X86Class::Return,
        0x9A | 0xCA | 0xCB | 0xCF | 0xEA => X86Class::FarTransfer,
        0xCC => X86Class::Trap,
        0x62 | 0xCD | 0xCE => X86Class::Interrupt,
        0xF4 => X86Class::Halt,
        0x07 | 0x17 | 0x1F | 0x8E | 0xC4 | 0xC5 => X86Class::SegmentWrite,
        0x63 | 0x6C..=0x6F | 0xE4..=0xE7 | 0xEC..=0xEF | 0xFA | 0xFB => X86Class::Privileged,
        0x9B | 0xD8..=0xDF => X86Class::ImplementationSafe,
        _ => X86Class::Plain,
    }
}

fn two_byte(layout: &Layout, bytes: &[u8]) -> X86Class {
    let reg = layout.reg();
    let register_form = layout.is_register_form();
    match layout.opcode {
        0x80..=0x8F => X86Class::ConditionalJump {
            rel: immediate(layout, bytes),
        },
        0x0B => X86Class::Trap,
        0x05 | 0x07 | 0x34 | 0x35 => X86Class::SystemCall,
        0x00 | 0x01 | 0x06 | 0x08 | 0x09 | 0x20..=0x23 | 0x30 | 0x32 | 0x33 | 0xAA => {
            X86Class::Privileged
        }
        0xA1 | 0xA9 | 0xB2 | 0xB4 | 0xB5 => X86Class::SegmentWrite,
        0xB9 => X86Class::Undefined,
        0xBA if reg < 4 => X86Class::Undefined,
        0x0D | 0xC3 if register_form => X86Class::Undefined,
        0xC7 => match reg {
            1 if !register_form => X86Class::Plain,
            6 | 7 if register_form => X86Class::ImplementationSafe,
            _ => X86Class::Undefined,
        },
        0xAE if register_form && reg < 5 => X86Class::Undefined,
        0x10..=0x17
        | 0x28..=0x2F
        | 0x31
        | 0x50..=0x7F
        | 0xA2
        | 0xAE
        | 0xC2..=0xC6
        | 0xD0..=0xFE => X86Class::ImplementationSafe,
        _ => X86Class::Plain,
    }
}

/// SSSE3, SSE4, AES-NI, `MOVBE` and `CRC32`.
const fn three_byte_38(opcode: u8) -> X86Class {
    match opcode {
        0x00..=0x0B
        | 0x10
        | 0x14
        | 0x15
        | 0x17
        | 0x1C..=0x1E
        | 0x20..=0x25
        | 0x28..=0x2B
        | 0x30..=0x35
        | 0x37..=0x41
        | 0xDB..=0xDF
        | 0xF0
        | 0xF1 => X86Class::ImplementationSafe,
        _ => X86Class::Undefined,
    }
}

/// SSSE3 `PALIGNR`, SSE4, `PCLMULQDQ` and `AESKEYGENASSIST`.
const fn three_byte_3a(opcode: u8) -> X86Class {
    match opcode {
        0x08..=0x0F | 0x14..=0x17 | 0x20..=0x22 | 0x40..=0x42 | 0x44 | 0x60..=0x63 | 0xDF => {
            X86Class::ImplementationSafe
        }
        _ => X86Class::Undefined,
    }
}
