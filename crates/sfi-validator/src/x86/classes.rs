//! Closed set of x86-32 instruction shapes and their safety rules.

use super::length::{scan, Layout, OpcodeMap, MAX_INSTRUCTION_BYTES};
use crate::registers::{Register, RegisterList};
use crate::safety::SafetyLevel;

/// Segment override allowed inside the sandbox (`GS`, the thread pointer).
pub const THREAD_SEGMENT_PREFIX: u8 = 0x65;

/// `eax` through `edi`.
const GENERAL_REGISTERS: RegisterList = RegisterList::from_bits(0xFF);

/// Instruction shapes recognised by the x86-32 decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum X86Class {
    /// Integer instruction with no control-flow or system effect.
    Plain,
    /// x87, SSE and `CPUID`: legal but outside the deterministic core.
    ImplementationSafe,
    /// `JMP rel8` and `JMP rel32`.
    DirectJump {
        /// Displacement from the end of the instruction.
        rel: i32,
    },
    /// `Jcc`, `LOOP` and `JCXZ`.
    ConditionalJump {
        /// Displacement from the end of the instruction.
        rel: i32,
    },
    /// `CALL rel32`.
    DirectCall {
        /// Displacement from the end of the instruction.
        rel: i32,
    },
    /// `JMP r32`.
    IndirectJump {
        /// Target register.
        target: Register,
    },
    /// `CALL r32`.
    IndirectCall {
        /// Target register.
        target: Register,
    },
    /// `JMP`/`CALL` through memory.
    MemoryIndirectBranch,
    /// `AND r32, imm` on a register.
    CodeMask {
        /// Masked register.
        register: Register,
        /// Sign-extended immediate.
        immediate: u32,
    },
    /// Far jumps, far calls, far returns and `IRET`.
    FarTransfer,
    /// Near `RET`.
    Return,
    /// `INT n`, `INTO` and `BOUND`.
    Interrupt,
    /// `SYSCALL`, `SYSENTER` and their returns.
    SystemCall,
    /// Port I/O, interrupt flag and system-table instructions.
    Privileged,
    /// Loads of segment registers.
    SegmentWrite,
    /// `HLT`.
    Halt,
    /// `INT3` and `UD2`.
    Trap,
    /// Defined length but no recognised meaning, or a malformed group member.
    Undefined,
}

impl X86Class {
    /// Stable shape tag used in listings and cross-checks.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Plain => "Plain",
            Self::ImplementationSafe => "ImplementationSafe",
            Self::DirectJump { .. } => "DirectJump",
            Self::ConditionalJump { .. } => "ConditionalJump",
            Self::DirectCall { .. } => "DirectCall",
            Self::IndirectJump { .. } => "IndirectJump",
            Self::IndirectCall { .. } => "IndirectCall",
            Self::MemoryIndirectBranch => "MemoryIndirectBranch",
            Self::CodeMask { .. } => "CodeMask",
            Self::FarTransfer => "FarTransfer",
            Self::Return => "Return",
            Self::Interrupt => "Interrupt",
            Self::SystemCall => "SystemCall",
            Self::Privileged => "Privileged",
            Self::SegmentWrite => "SegmentWrite",
            Self::Halt => "Halt",
            Self::Trap => "Trap",
            Self::Undefined => "Undefined",
        }
    }

    /// True for shapes that are never allowed regardless of operands.
    #[must_use]
    pub const fn is_always_forbidden(&self) -> bool {
        matches!(
            self,
            Self::MemoryIndirectBranch
                | Self::FarTransfer
                | Self::Return
                | Self::Interrupt
                | Self::SystemCall
                | Self::Privileged
                | Self::SegmentWrite
                | Self::Trap
        )
    }

    /// True for near transfers of control.
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(
            self,
            Self::DirectJump { .. }
                | Self::ConditionalJump { .. }
                | Self::DirectCall { .. }
                | Self::IndirectJump { .. }
                | Self::IndirectCall { .. }
                | Self::MemoryIndirectBranch
                | Self::Return
        )
    }
}

/// A decoded x86-32 instruction: its bytes, layout and shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct X86Instruction {
    raw: [u8; MAX_INSTRUCTION_BYTES],
    layout: Layout,
    class: X86Class,
}

impl X86Instruction {
    /// Decodes the instruction at the start of `bytes`.
    ///
    /// The first pass finds the length; the second re-scans exactly that many
    /// bytes and must reach the same layout. `None` when either pass fails or
    /// they disagree.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let layout = scan(bytes)?;
        let length = usize::from(layout.length);
        let capped = bytes.get(..length)?;
        if scan(capped)? != layout {
            return None;
        }
        let class = super::decoder::classify(&layout, capped);
        let mut raw = [0u8; MAX_INSTRUCTION_BYTES];
        raw[..length].copy_from_slice(capped);
        Some(Self { raw, layout, class })
    }

    /// Instruction bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.raw[..self.length()]
    }

    /// Length in bytes.
    #[must_use]
    pub const fn length(&self) -> usize {
        self.layout.length as usize
    }

    /// Byte layout from the length pass.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Recognised shape.
    #[must_use]
    pub const fn class(&self) -> &X86Class {
        &self.class
    }

    /// Stable shape tag.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        self.class.shape()
    }

    /// Verdict from the architecture's own rules alone.
    #[must_use]
    pub fn baseline_safety(&self) -> SafetyLevel {
        if self.class == X86Class::Undefined
            || (self.layout.prefixes.lock && !self.is_lockable())
        {
            SafetyLevel::Undefined
        } else {
            SafetyLevel::Safe
        }
    }

    /// Extra restriction the sandbox places on top of the baseline.
    #[must_use]
    pub fn sandbox_restriction(&self) -> SafetyLevel {
        let prefixes = &self.layout.prefixes;
        let mut level = match self.class {
            X86Class::ImplementationSafe => SafetyLevel::ImplementationSafe,
            class if class.is_always_forbidden() => SafetyLevel::Forbidden,
            _ => SafetyLevel::Safe,
        };
        let foreign_segment = prefixes
            .segment
            .is_some_and(|segment| segment != THREAD_SEGMENT_PREFIX);
        if prefixes.address_size || foreign_segment {
            level = level.narrow(SafetyLevel::ForbiddenOperands);
        }
        if prefixes.operand_size && self.class.is_branch() {
            level = level.narrow(SafetyLevel::ForbiddenOperands);
        }
        level
    }

    /// Final verdict: the baseline narrowed by the sandbox restriction.
    #[must_use]
    pub fn safety(&self) -> SafetyLevel {
        self.baseline_safety().narrow(self.sandbox_restriction())
    }

    /// Registers this instruction may write.
    ///
    /// Forms whose effect is not modelled register by register report every
    /// general register and the flags.
    #[must_use]
    pub fn defs(&self) -> RegisterList {
        let eip = RegisterList::single(Register::EIP);
        let flags = RegisterList::single(Register::CONDITIONS);
        let everything = GENERAL_REGISTERS.union(flags);
        match self.class {
            X86Class::DirectCall { .. } | X86Class::IndirectCall { .. } | X86Class::Return => {
                eip.with(Register::ESP)
            }
            // LOOP, LOOPE and LOOPNE count down in ecx.
            X86Class::ConditionalJump { .. }
                if self.layout.map == OpcodeMap::OneByte
                    && matches!(self.layout.opcode, 0xE0..=0xE2) =>
            {
                eip.with(Register::ECX)
            }
            X86Class::DirectJump { .. }
            | X86Class::ConditionalJump { .. }
            | X86Class::IndirectJump { .. }
            | X86Class::MemoryIndirectBranch => eip,
            X86Class::FarTransfer | X86Class::Interrupt => {
                eip.with(Register::ESP).with(Register::CONDITIONS)
            }
            X86Class::SystemCall | X86Class::Privileged | X86Class::Undefined => {
                everything.with(Register::EIP)
            }
            X86Class::SegmentWrite => self.segment_load_defs(),
            X86Class::CodeMask { register, .. } => flags.with(register),
            X86Class::ImplementationSafe => self.extension_defs(),
            X86Class::Plain => match self.layout.map {
                OpcodeMap::OneByte => self.one_byte_defs(),
                OpcodeMap::TwoByte => self.two_byte_defs(),
                OpcodeMap::ThreeByte38 | OpcodeMap::ThreeByte3A => everything,
            },
            X86Class::Halt | X86Class::Trap => RegisterList::EMPTY,
        }
    }

    /// True for `CALL` forms.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(
            self.class,
            X86Class::DirectCall { .. } | X86Class::IndirectCall { .. }
        )
    }

    /// Register holding the target of a register-indirect branch.
    #[must_use]
    pub const fn indirect_branch_register(&self) -> Option<Register> {
        match self.class {
            X86Class::IndirectJump { target } | X86Class::IndirectCall { target } => Some(target),
            _ => None,
        }
    }

    /// Absolute target of a direct branch located at `address`.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub const fn branch_target(&self, address: u32) -> Option<u32> {
        match self.class {
            X86Class::DirectJump { rel }
            | X86Class::ConditionalJump { rel }
            | X86Class::DirectCall { rel } => Some(
                address
                    .wrapping_add(self.layout.length as u32)
                    .wrapping_add(rel as u32),
            ),
            _ => None,
        }
    }

    /// Register left with every bit of `clear` zeroed by this `AND`.
    #[must_use]
    pub const fn masked_register(&self, clear: u32) -> Option<Register> {
        match self.class {
            X86Class::CodeMask { register, immediate } if immediate & clear == 0 => {
                Some(register)
            }
            _ => None,
        }
    }

    fn is_lockable(&self) -> bool {
        let layout = &self.layout;
        if !layout.has_memory_operand() {
            return false;
        }
        let reg = layout.reg();
        match (layout.map, layout.opcode) {
            (OpcodeMap::OneByte, op @ 0x00..=0x33) => op & 0x06 == 0 && op & 0x38 != 0x38,
            (OpcodeMap::OneByte, 0x80..=0x83) => reg != 7,
            (OpcodeMap::OneByte, 0x86 | 0x87) => true,
            (OpcodeMap::OneByte, 0xF6 | 0xF7) => reg == 2 || reg == 3,
            (OpcodeMap::OneByte, 0xFE | 0xFF) => reg < 2,
            (OpcodeMap::TwoByte, 0xAB | 0xB3 | 0xBB | 0xB0 | 0xB1 | 0xC0 | 0xC1) => true,
            (OpcodeMap::TwoByte, 0xBA) => reg >= 5,
            (OpcodeMap::TwoByte, 0xC7) => reg == 1,
            _ => false,
        }
    }

    fn reg_operand(&self) -> Register {
        Register::new(self.layout.reg())
    }

    /// The ModRM `rm` register, or nothing for a memory operand.
    fn rm_operand(&self) -> RegisterList {
        if self.layout.is_register_form() {
            RegisterList::single(Register::new(self.layout.rm()))
        } else {
            RegisterList::EMPTY
        }
    }

    fn one_byte_defs(&self) -> RegisterList {
        let layout = &self.layout;
        let flags = RegisterList::single(Register::CONDITIONS);
        let stack = RegisterList::single(Register::ESP);
        let accumulator = RegisterList::single(Register::EAX);
        let reg = self.reg_operand();
        let rm = self.rm_operand();
        let low = Register::new(layout.opcode & 0x07);
        let count = layout.prefixes.rep || layout.prefixes.repne;
        let string = |list: RegisterList| list.with_if(count, Register::ECX);
        match layout.opcode {
            // ALU r/m,r and r,r/m; CMP only writes flags.
            op @ 0x00..=0x3F if op & 0x07 <= 3 => {
                if op & 0x38 == 0x38 {
                    flags
                } else if op & 0x02 != 0 {
                    flags.with(reg)
                } else {
                    flags.union(rm)
                }
            }
            op @ 0x00..=0x3F if op & 0x07 <= 5 => {
                if op & 0x38 == 0x38 {
                    flags
                } else {
                    flags.union(accumulator)
                }
            }
            0x06 | 0x0E | 0x16 | 0x1E | 0x50..=0x57 | 0x60 | 0x68 | 0x6A | 0x9C => stack,
            0x27 | 0x2F | 0x37 | 0x3F | 0xD4 | 0xD5 => flags.union(accumulator),
            0x40..=0x4F => flags.with(low),
            0x58..=0x5F => stack.with(low),
            0x61 => GENERAL_REGISTERS,
            0x69 | 0x6B => flags.with(reg),
            0x80..=0x83 => {
                if layout.reg() == 7 {
                    flags
                } else {
                    flags.union(rm)
                }
            }
            0x84 | 0x85 | 0xA8 | 0xA9 | 0x9E | 0xF5 | 0xF8 | 0xF9 | 0xFC | 0xFD => flags,
            0x86 | 0x87 => rm.with(reg),
            0x88 | 0x89 | 0x8C | 0xC6 | 0xC7 => rm,
            0x8A | 0x8B | 0x8D => RegisterList::single(reg),
            0x8F => stack.union(rm),
            0x91..=0x97 => accumulator.with(low),
            0x98 | 0x9F | 0xA0 | 0xA1 | 0xD7 => accumulator,
            0x99 => RegisterList::single(Register::EDX),
            0x9D => stack.union(flags),
            0xA4 | 0xA5 => string(RegisterList::single(Register::ESI).with(Register::EDI)),
            0xA6 | 0xA7 => string(flags.with(Register::ESI).with(Register::EDI)),
            0xAA | 0xAB => string(RegisterList::single(Register::EDI)),
            0xAC | 0xAD => string(accumulator.with(Register::ESI)),
            0xAE | 0xAF => string(flags.with(Register::EDI)),
            0xB0..=0xBF => RegisterList::single(low),
            0xC0 | 0xC1 | 0xD0..=0xD3 => flags.union(rm),
            0xC8 | 0xC9 => stack.with(Register::EBP),
            0xF6 | 0xF7 => match layout.reg() {
                0 | 1 => flags,
                2 => rm,
                3 => flags.union(rm),
                _ => flags
                    .union(accumulator)
                    .with_if(layout.opcode == 0xF7, Register::EDX),
            },
            0xFE | 0xFF => match layout.reg() {
                0 | 1 => flags.union(rm),
                6 => stack,
                _ => GENERAL_REGISTERS.union(flags),
            },
            0x90 | 0xA2 | 0xA3 => RegisterList::EMPTY,
            _ => GENERAL_REGISTERS.union(flags),
        }
    }

    fn two_byte_defs(&self) -> RegisterList {
        let layout = &self.layout;
        let flags = RegisterList::single(Register::CONDITIONS);
        let reg = self.reg_operand();
        let rm = self.rm_operand();
        match layout.opcode {
            0x02 | 0x03 | 0xAF | 0xB8 | 0xBC | 0xBD => flags.with(reg),
            0x0D | 0x18..=0x1F => RegisterList::EMPTY,
            0x40..=0x4F | 0xB6 | 0xB7 | 0xBE | 0xBF => RegisterList::single(reg),
            0x90..=0x9F => rm,
            0xA0 | 0xA8 => RegisterList::single(Register::ESP),
            0xA3 => flags,
            0xA4 | 0xA5 | 0xAB | 0xAC | 0xAD | 0xB3 | 0xBB => flags.union(rm),
            0xB0 | 0xB1 => flags.union(rm).with(Register::EAX),
            0xBA => {
                if layout.reg() == 4 {
                    flags
                } else {
                    flags.union(rm)
                }
            }
            0xC0 | 0xC1 => flags.union(rm).with(reg),
            0xC7 => flags.with(Register::EAX).with(Register::EDX),
            0xC8..=0xCF => RegisterList::single(Register::new(layout.opcode & 0x07)),
            _ => GENERAL_REGISTERS.union(flags),
        }
    }

    /// x87 and SSE forms that write general registers or the flags.
    fn extension_defs(&self) -> RegisterList {
        let layout = &self.layout;
        let flags = RegisterList::single(Register::CONDITIONS);
        let reg = RegisterList::single(self.reg_operand());
        let rm = self.rm_operand();
        match (layout.map, layout.opcode) {
            (OpcodeMap::OneByte, 0xDF) if layout.modrm == Some(0xE0) => {
                RegisterList::single(Register::EAX)
            }
            (OpcodeMap::OneByte, 0xDB | 0xDF)
                if layout.is_register_form() && matches!(layout.reg(), 5 | 6) =>
            {
                flags
            }
            (OpcodeMap::TwoByte, 0x31) => RegisterList::single(Register::EAX).with(Register::EDX),
            (OpcodeMap::TwoByte, 0xA2) => RegisterList::from_bits(0x0F),
            (OpcodeMap::TwoByte, 0x2C | 0x2D | 0x50 | 0xC5 | 0xD7)
            | (OpcodeMap::ThreeByte38, 0xF0 | 0xF1) => reg,
            (OpcodeMap::TwoByte, 0x7E) if !layout.prefixes.rep => rm,
            (OpcodeMap::TwoByte, 0x2E | 0x2F) | (OpcodeMap::ThreeByte38, 0x17) => flags,
            (OpcodeMap::TwoByte, 0xC7) => flags.union(rm),
            (OpcodeMap::ThreeByte3A, 0x14 | 0x16 | 0x17) => rm,
            (OpcodeMap::ThreeByte3A, 0x60..=0x63) => flags.with(Register::ECX),
            _ => RegisterList::EMPTY,
        }
    }

    fn segment_load_defs(&self) -> RegisterList {
        match (self.layout.map, self.layout.opcode) {
            (OpcodeMap::OneByte, 0x8E) => RegisterList::EMPTY,
            (OpcodeMap::OneByte, 0xC4 | 0xC5) | (OpcodeMap::TwoByte, 0xB2 | 0xB4 | 0xB5) => {
                RegisterList::single(self.reg_operand())
            }
            _ => RegisterList::single(Register::ESP),
        }
    }
}
