//! Variable-length x86-32 decoding and classification.

/// Instruction shapes and per-shape safety rules.
pub mod classes;
pub use classes::{X86Class, X86Instruction, THREAD_SEGMENT_PREFIX};

/// Shape pass from a layout to [`X86Class`].
pub mod decoder;
pub use decoder::classify;

/// Length pass over prefixes, opcode, ModRM/SIB, displacement and immediate.
pub mod length;
pub use length::{scan, Layout, OpcodeMap, Prefixes, MAX_INSTRUCTION_BYTES};
