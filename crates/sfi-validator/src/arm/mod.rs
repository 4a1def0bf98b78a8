//! Fixed-width A32 decoding and classification.

/// Instruction shapes and per-shape safety rules.
pub mod classes;
pub use classes::{
    ArmClass, ArmInstruction, BitFieldOp, DataOp, ForbiddenReason, LongMultiplyOp, MoveOp,
    MultiplyOp, Offset, Operand, TestOp, TransferSize, LITERAL_POOL_HEAD,
};

/// Decode tree from raw words to shapes.
pub mod decoder;
pub use decoder::classify;

/// Size of every A32 instruction in bytes.
pub const INSTRUCTION_BYTES: usize = 4;
