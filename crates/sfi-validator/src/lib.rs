//! Static machine-code validator for software fault isolation sandboxes.

/// Bit-field extraction over raw instruction words and bytes.
pub mod bits;
pub use bits::{bit, sign_extend, BitField};

/// Ordered safety verdicts.
pub mod safety;
pub use safety::SafetyLevel;

/// Validator configuration and architecture constants.
pub mod config;
pub use config::{
    Architecture, BranchTargetPolicy, ValidationMode, ValidatorConfig, MAX_BUNDLE_SIZE,
    MAX_SANDBOX_ADDRESS_BITS, MIN_SANDBOX_ADDRESS_BITS,
};

/// Error taxonomy for rejected segments and invalid settings.
pub mod fault;
pub use fault::{AlignmentFault, ConfigError, PairingFault, ValidationError, ViolationClass};

/// Register identities and definition sets.
pub mod registers;
pub use registers::{Register, RegisterList, REGISTER_SLOTS};

/// Fixed-width A32 decoder and classifiers.
pub mod arm;
pub use arm::{ArmClass, ArmInstruction};

/// Variable-length x86-32 decoder and classifiers.
pub mod x86;
pub use x86::{X86Class, X86Instruction};

/// Architecture-neutral instruction decoding.
pub mod decoder;
pub use decoder::{DecodedInstruction, InstructionForm, Instructions, UNDECODABLE_SHAPE};

/// Register-definition tracker for in-bundle pairing rules.
pub mod tracker;
pub use tracker::{
    InstructionFacts, MemoryAccess, Observation, RegisterTracker, UnmetObligation,
};

/// Verdicts, diagnostics and scan statistics.
pub mod report;
pub use report::{Diagnostic, ScanState, ValidationReport, ValidationStats, Verdict};

/// Bundle/segment validator.
pub mod validator;
pub use validator::{Segment, Validator};

/// Decoder cross-check harness.
pub mod harness;
pub use harness::{
    cross_check, cross_check_all, CrossCheckRecord, CrossCheckSummary, DecoderObservation,
    Disagreement, EnumeratorDecoder, ExhaustiveEnumerator, ProductionArmDecoder,
    ProductionX86Decoder, RandomEnumerator, ReferenceX86Decoder,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
