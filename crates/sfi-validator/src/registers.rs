//! Register identities and the per-instruction definition sets.

use std::ops::BitOr;

use crate::config::Architecture;

/// Number of register slots tracked by a [`RegisterList`].
pub const REGISTER_SLOTS: u8 = 17;

/// An architectural register, or one of the pseudo registers shared by both
/// encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Register(u8);

impl Register {
    /// A32 `r9`, reserved as the sandbox thread pointer.
    pub const THREAD_POINTER: Self = Self(9);
    /// A32 stack pointer (`r13`).
    pub const SP: Self = Self(13);
    /// A32 link register (`r14`).
    pub const LR: Self = Self(14);
    /// A32 program counter (`r15`).
    pub const PC: Self = Self(15);

    /// x86-32 `eax`.
    pub const EAX: Self = Self(0);
    /// x86-32 `ecx`.
    pub const ECX: Self = Self(1);
    /// x86-32 `edx`.
    pub const EDX: Self = Self(2);
    /// x86-32 `ebx`.
    pub const EBX: Self = Self(3);
    /// x86-32 stack pointer.
    pub const ESP: Self = Self(4);
    /// x86-32 frame pointer.
    pub const EBP: Self = Self(5);
    /// x86-32 `esi`.
    pub const ESI: Self = Self(6);
    /// x86-32 `edi`.
    pub const EDI: Self = Self(7);
    /// x86-32 instruction pointer, written by every control transfer.
    pub const EIP: Self = Self(8);

    /// Pseudo register standing for the condition flags.
    pub const CONDITIONS: Self = Self(16);

    /// Register with the given slot index; indices wrap into the tracked range.
    #[must_use]
    pub const fn new(index: u8) -> Self {
        Self(index % REGISTER_SLOTS)
    }

    /// Register named by a 4-bit A32 register field.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_field(value: u32) -> Self {
        Self((value & 0xF) as u8)
    }

    /// Slot index of this register.
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// Conventional assembler name on `architecture`.
    #[must_use]
    pub const fn name(self, architecture: Architecture) -> &'static str {
        const ARM: [&str; 17] = [
            "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp",
            "lr", "pc", "flags",
        ];
        const X86: [&str; 17] = [
            "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "eip", "?9", "?10", "?11",
            "?12", "?13", "?14", "?15", "flags",
        ];
        let slot = (self.0 % REGISTER_SLOTS) as usize;
        match architecture {
            Architecture::Arm => ARM[slot],
            Architecture::X86 => X86[slot],
        }
    }

    /// Stack pointer of `architecture`.
    #[must_use]
    pub const fn stack_pointer(architecture: Architecture) -> Self {
        match architecture {
            Architecture::Arm => Self::SP,
            Architecture::X86 => Self::ESP,
        }
    }

    /// Program counter of `architecture`.
    #[must_use]
    pub const fn program_counter(architecture: Architecture) -> Self {
        match architecture {
            Architecture::Arm => Self::PC,
            Architecture::X86 => Self::EIP,
        }
    }

    const fn bit(self) -> u32 {
        match 1u32.checked_shl(self.0 as u32) {
            Some(bit) => bit,
            None => 0,
        }
    }
}

/// A set of registers, created fresh for each instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterList(u32);

impl RegisterList {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Set with one member per set bit of `bits`; bits past the tracked slots are dropped.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & ((1 << REGISTER_SLOTS) - 1))
    }

    /// Set containing only `register`.
    #[must_use]
    pub const fn single(register: Register) -> Self {
        Self(register.bit())
    }

    /// Raw membership bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Copy of this set with `register` added.
    #[must_use]
    pub const fn with(self, register: Register) -> Self {
        Self(self.0 | register.bit())
    }

    /// Copy of this set with `register` added when `condition` holds.
    #[must_use]
    pub const fn with_if(self, condition: bool, register: Register) -> Self {
        if condition {
            self.with(register)
        } else {
            self
        }
    }

    /// Union of both sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Registers present in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Membership test.
    #[must_use]
    pub const fn contains(self, register: Register) -> bool {
        self.0 & register.bit() != 0
    }

    /// True when the set has no members.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of members.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// True when the set holds the program counter of `architecture`.
    #[must_use]
    pub const fn contains_program_counter(self, architecture: Architecture) -> bool {
        self.contains(Register::program_counter(architecture))
    }

    /// True when the set holds the stack pointer of `architecture`.
    #[must_use]
    pub const fn contains_stack_pointer(self, architecture: Architecture) -> bool {
        self.contains(Register::stack_pointer(architecture))
    }

    /// Lowest-numbered member, if any.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn lowest(self) -> Option<Register> {
        if self.0 == 0 {
            None
        } else {
            Some(Register(self.0.trailing_zeros() as u8))
        }
    }

    /// Members in ascending slot order.
    pub fn iter(self) -> impl Iterator<Item = Register> {
        (0..REGISTER_SLOTS)
            .map(Register)
            .filter(move |register| self.contains(*register))
    }

    /// Comma-separated register names on `architecture`, in braces.
    #[must_use]
    pub fn describe(self, architecture: Architecture) -> String {
        let names: Vec<&str> = self.iter().map(|r| r.name(architecture)).collect();
        format!("{{{}}}", names.join(", "))
    }
}

impl BitOr for RegisterList {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl FromIterator<Register> for RegisterList {
    fn from_iter<T: IntoIterator<Item = Register>>(iter: T) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}
