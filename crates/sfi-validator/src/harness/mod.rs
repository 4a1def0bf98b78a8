//! Decoder cross-check harness.
//!
//! Two decoders walk the same byte sequence instruction by instruction; the
//! first place where their lengths (or, when both report one, their shape
//! tags) differ is returned as a [`Disagreement`]. Development tooling only:
//! nothing here is consulted by [`crate::Validator`].

use rayon::prelude::*;

use crate::arm::{ArmInstruction, INSTRUCTION_BYTES};
use crate::x86::X86Instruction;

/// Enumerators of synthetic byte patterns.
pub mod enumerate;
pub use enumerate::{ExhaustiveEnumerator, RandomEnumerator};

/// Independent table-driven x86-32 length decoder.
pub mod reference;
pub use reference::ReferenceX86Decoder;

/// What one decoder made of the bytes at the start of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DecoderObservation {
    /// Instruction length, `None` when the bytes do not decode.
    pub length: Option<usize>,
    /// Shape tag, `None` when undecodable or when the decoder does not classify.
    pub shape: Option<&'static str>,
}

impl DecoderObservation {
    /// Observation of undecodable bytes.
    pub const UNDECODABLE: Self = Self {
        length: None,
        shape: None,
    };

    fn agrees_with(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }
        match (self.shape, other.shape) {
            (Some(first), Some(second)) => first == second,
            _ => true,
        }
    }
}

/// A decoder that can take part in a cross-check.
pub trait EnumeratorDecoder: Sync {
    /// Name used in reports.
    fn name(&self) -> &'static str;

    /// Decodes the instruction at the start of `bytes`.
    fn decode(&self, bytes: &[u8]) -> DecoderObservation;
}

/// The validator's own x86-32 decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductionX86Decoder;

impl EnumeratorDecoder for ProductionX86Decoder {
    fn name(&self) -> &'static str {
        "production-x86"
    }

    fn decode(&self, bytes: &[u8]) -> DecoderObservation {
        X86Instruction::decode(bytes).map_or(DecoderObservation::UNDECODABLE, |instruction| {
            DecoderObservation {
                length: Some(instruction.length()),
                shape: Some(instruction.shape()),
            }
        })
    }
}

/// The validator's own A32 decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductionArmDecoder;

impl EnumeratorDecoder for ProductionArmDecoder {
    fn name(&self) -> &'static str {
        "production-arm"
    }

    fn decode(&self, bytes: &[u8]) -> DecoderObservation {
        bytes
            .first_chunk::<INSTRUCTION_BYTES>()
            .map_or(DecoderObservation::UNDECODABLE, |word| {
                let instruction = ArmInstruction::decode(u32::from_le_bytes(*word));
                DecoderObservation {
                    length: Some(INSTRUCTION_BYTES),
                    shape: Some(instruction.shape()),
                }
            })
    }
}

/// First point where two decoders disagree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Disagreement {
    /// Index of the instruction within the sequence.
    pub instruction_index: usize,
    /// Byte offset of that instruction.
    pub offset: usize,
    /// The sequence being walked.
    pub bytes: Vec<u8>,
    /// First decoder's view.
    pub first: DecoderObservation,
    /// Second decoder's view.
    pub second: DecoderObservation,
}

/// Result of walking one byte sequence with two decoders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CrossCheckRecord {
    /// Both decoders agreed on every instruction.
    Match {
        /// Instructions walked before both stopped decoding.
        instructions: usize,
        /// Shared view of the first instruction.
        first: DecoderObservation,
    },
    /// The decoders diverged.
    Disagreement(Disagreement),
}

impl CrossCheckRecord {
    /// True for [`CrossCheckRecord::Match`].
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

/// Walks `bytes` with both decoders until they disagree or stop decoding.
pub fn cross_check<A, B>(first: &A, second: &B, bytes: &[u8]) -> CrossCheckRecord
where
    A: EnumeratorDecoder + ?Sized,
    B: EnumeratorDecoder + ?Sized,
{
    let mut offset = 0;
    let mut instructions = 0;
    let mut leading = DecoderObservation::UNDECODABLE;
    while let Some(rest) = bytes.get(offset..).filter(|rest| !rest.is_empty()) {
        let a = first.decode(rest);
        let b = second.decode(rest);
        if !a.agrees_with(&b) {
            return CrossCheckRecord::Disagreement(Disagreement {
                instruction_index: instructions,
                offset,
                bytes: bytes.to_vec(),
                first: a,
                second: b,
            });
        }
        if instructions == 0 {
            leading = a;
        }
        let Some(length) = a.length.filter(|length| *length > 0) else {
            break;
        };
        instructions += 1;
        offset += length;
    }
    CrossCheckRecord::Match {
        instructions,
        first: leading,
    }
}

/// Totals of a batch of cross-check trials.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrossCheckSummary {
    /// Trials run.
    pub trials: usize,
    /// Trials where the decoders agreed throughout.
    pub matches: usize,
    /// One record per disagreeing trial, in no particular order.
    pub disagreements: Vec<Disagreement>,
}

impl CrossCheckSummary {
    /// True when no trial disagreed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.disagreements.is_empty()
    }
}

/// Runs every trial in parallel.
pub fn cross_check_all<A, B>(first: &A, second: &B, trials: &[Vec<u8>]) -> CrossCheckSummary
where
    A: EnumeratorDecoder + ?Sized,
    B: EnumeratorDecoder + ?Sized,
{
    let disagreements: Vec<Disagreement> = trials
        .par_iter()
        .filter_map(|bytes| match cross_check(first, second, bytes) {
            CrossCheckRecord::Match { .. } => None,
            CrossCheckRecord::Disagreement(disagreement) => Some(disagreement),
        })
        .collect();
    log::info!(
        "cross-check {} vs {}: {} trial(s), {} disagreement(s)",
        first.name(),
        second.name(),
        trials.len(),
        disagreements.len()
    );
    CrossCheckSummary {
        trials: trials.len(),
        matches: trials.len() - disagreements.len(),
        disagreements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLength(usize);

    impl EnumeratorDecoder for FixedLength {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn decode(&self, bytes: &[u8]) -> DecoderObservation {
            DecoderObservation {
                length: (bytes.len() >= self.0).then_some(self.0),
                shape: None,
            }
        }
    }

    #[test]
    fn identical_decoders_match() {
        let record = cross_check(&ProductionX86Decoder, &ProductionX86Decoder, &[0x90, 0xEB, 0x00]);
        assert_eq!(
            record,
            CrossCheckRecord::Match {
                instructions: 2,
                first: DecoderObservation {
                    length: Some(1),
                    shape: Some("Plain")
                }
            }
        );
    }

    #[test]
    fn reports_first_divergent_instruction() {
        let record = cross_check(&ProductionX86Decoder, &FixedLength(1), &[0x90, 0xEB, 0x00]);
        let CrossCheckRecord::Disagreement(disagreement) = record else {
            panic!("expected a disagreement");
        };
        assert_eq!(disagreement.instruction_index, 1);
        assert_eq!(disagreement.offset, 1);
        assert_eq!(disagreement.first.length, Some(2));
        assert_eq!(disagreement.second.length, Some(1));
    }

    #[test]
    fn shapes_compare_only_when_both_decoders_classify() {
        let word = 0xE281_0001u32.to_le_bytes();
        assert!(cross_check(&ProductionArmDecoder, &FixedLength(4), &word).is_match());
    }

    #[test]
    fn summary_counts_disagreeing_trials() {
        let trials = vec![vec![0x90], vec![0xEB, 0x00], vec![0x90, 0x90]];
        let summary = cross_check_all(&ProductionX86Decoder, &FixedLength(1), &trials);
        assert_eq!(summary.trials, 3);
        assert_eq!(summary.matches, 2);
        assert_eq!(summary.disagreements.len(), 1);
        assert!(!summary.is_clean());
    }
}
