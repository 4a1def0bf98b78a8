//! Register-definition tracker for pairing rules inside one bundle.
//!
//! The tracker sees one [`InstructionFacts`] per decoded instruction, in
//! address order. It keeps the running union of defined registers and, per
//! register, where its last definition happened and whether that definition
//! was a recognised mask. Pairing checks read that state before the current
//! instruction's own definitions are applied.

use crate::bits::arm::{CONDITION_ALWAYS, CONDITION_EQUAL};
use crate::config::{Architecture, ValidatorConfig};
use crate::fault::PairingFault;
use crate::registers::{Register, RegisterList, REGISTER_SLOTS};

const SLOTS: usize = REGISTER_SLOTS as usize;

/// Memory operand of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAccess {
    /// Base address register.
    pub base: Register,
    /// Writes memory (otherwise reads).
    pub is_store: bool,
    /// Base register updated by the access.
    pub writeback: bool,
    /// Offset is an immediate rather than a register.
    pub immediate_offset: bool,
}

/// Per-instruction facts the tracker and segment walker consume.
///
/// Built from a decoded instruction and the validator configuration; holds
/// no reference to the instruction itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstructionFacts {
    /// Offset of the instruction from the segment start.
    pub offset: usize,
    /// Length in bytes.
    pub length: usize,
    /// A32 condition code; `None` on x86.
    pub condition: Option<u8>,
    /// Registers written.
    pub defs: RegisterList,
    /// Register left masked for use as a branch target.
    pub code_mask: Option<Register>,
    /// Register left masked for use as a data address.
    pub data_mask: Option<Register>,
    /// Register whose sandbox bits are clear whenever Z is set afterwards.
    pub zero_test: Option<Register>,
    /// Target register of an indirect branch.
    pub indirect_branch: Option<Register>,
    /// Memory operand.
    pub memory: Option<MemoryAccess>,
    /// Stack pointer update that keeps it inside the sandbox.
    pub stack_adjustment: bool,
    /// Instruction is a call.
    pub is_call: bool,
    /// Absolute target of a direct branch.
    pub direct_target: Option<u32>,
    /// Word marking the start of a literal pool.
    pub literal_pool_head: bool,
}

impl InstructionFacts {
    /// True when the instruction executes regardless of the flags.
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        is_unconditional(self.condition)
    }
}

fn is_unconditional(condition: Option<u8>) -> bool {
    condition.map_or(true, |condition| condition == CONDITION_ALWAYS)
}

/// Outcome of a successful observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No guard was needed.
    Standalone,
    /// The instruction relied on a guard at `guard_offset`; entering between
    /// the two would bypass it.
    Guarded {
        /// Offset of the mask or test instruction.
        guard_offset: usize,
    },
}

/// Obligation still open when a bundle or segment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmetObligation {
    /// Offset of the instruction that created it.
    pub offset: usize,
    /// Rule that was left unsatisfied.
    pub fault: PairingFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MaskFact {
    offset: usize,
    index: usize,
    condition: Option<u8>,
    code: bool,
    data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ZeroTest {
    register: Register,
    offset: usize,
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingMask {
    register: Register,
    offset: usize,
}

/// Tracks register definitions across the instructions of one bundle.
#[derive(Debug, Clone)]
pub struct RegisterTracker {
    architecture: Architecture,
    confines_memory: bool,
    index: usize,
    defined: RegisterList,
    last_def: [Option<usize>; SLOTS],
    masks: [Option<MaskFact>; SLOTS],
    flags_defined_at: Option<usize>,
    zero_test: Option<ZeroTest>,
    pending_mask: Option<PendingMask>,
    stack_obligation: Option<usize>,
}

impl RegisterTracker {
    /// Creates an empty tracker for `config`.
    #[must_use]
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            architecture: config.architecture,
            confines_memory: config.architecture == Architecture::Arm && config.data_mask() != 0,
            index: 0,
            defined: RegisterList::EMPTY,
            last_def: [None; SLOTS],
            masks: [None; SLOTS],
            flags_defined_at: None,
            zero_test: None,
            pending_mask: None,
            stack_obligation: None,
        }
    }

    /// Union of registers defined so far in this bundle.
    #[must_use]
    pub const fn defined(&self) -> RegisterList {
        self.defined
    }

    /// Offset of the last in-bundle definition of `register`.
    #[must_use]
    pub fn last_definition(&self, register: Register) -> Option<usize> {
        self.last_def[usize::from(register.index())]
    }

    /// Number of instructions observed in this bundle.
    #[must_use]
    pub const fn instructions(&self) -> usize {
        self.index
    }

    /// Feeds one instruction, checking pairing rules against the state left
    /// by the instructions before it.
    ///
    /// State is updated even when a rule fails, so later instructions are
    /// judged against what the faulty one actually wrote.
    pub fn observe(&mut self, facts: &InstructionFacts) -> Result<Observation, PairingFault> {
        let result = self.check_indirect_branch(facts).and_then(|branch| {
            let memory = self.check_memory(facts)?;
            Ok(branch.or(memory))
        });
        self.apply(facts);
        result.map(|guard| {
            guard.map_or(Observation::Standalone, |guard_offset| Observation::Guarded {
                guard_offset,
            })
        })
    }

    /// Closes the bundle: an unmasked stack pointer is reported, every other
    /// piece of state is dropped.
    pub fn end_bundle(&mut self) -> Result<(), UnmetObligation> {
        let obligation = self.stack_obligation.map(|offset| UnmetObligation {
            offset,
            fault: PairingFault::StackPointerNotRemasked,
        });
        *self = Self {
            architecture: self.architecture,
            confines_memory: self.confines_memory,
            ..Self::blank()
        };
        obligation.map_or(Ok(()), Err)
    }

    /// Closes the segment: a code mask whose branch never came is reported.
    pub fn finish(&mut self) -> Result<(), UnmetObligation> {
        match self.pending_mask.take() {
            Some(pending) => Err(UnmetObligation {
                offset: pending.offset,
                fault: PairingFault::MaskWithoutBranch {
                    architecture: self.architecture,
                    register: pending.register,
                },
            }),
            None => Ok(()),
        }
    }

    const fn blank() -> Self {
        Self {
            architecture: Architecture::Arm,
            confines_memory: false,
            index: 0,
            defined: RegisterList::EMPTY,
            last_def: [None; SLOTS],
            masks: [None; SLOTS],
            flags_defined_at: None,
            zero_test: None,
            pending_mask: None,
            stack_obligation: None,
        }
    }

    fn mask_of(&self, register: Register) -> Option<MaskFact> {
        self.masks[usize::from(register.index())]
    }

    fn guard_holds(&self, mask: &MaskFact, condition: Option<u8>) -> bool {
        if is_unconditional(mask.condition) {
            return true;
        }
        mask.condition == condition && self.flags_defined_at.map_or(true, |at| at < mask.index)
    }

    fn check_indirect_branch(
        &self,
        facts: &InstructionFacts,
    ) -> Result<Option<usize>, PairingFault> {
        let Some(register) = facts.indirect_branch else {
            return Ok(None);
        };
        let adjacent = |mask: &MaskFact| {
            self.architecture != Architecture::X86 || mask.index + 1 == self.index
        };
        match self.mask_of(register) {
            Some(mask)
                if mask.code && adjacent(&mask) && self.guard_holds(&mask, facts.condition) =>
            {
                Ok(Some(mask.offset))
            }
            _ => Err(PairingFault::UnmaskedIndirectBranch {
                architecture: self.architecture,
                register,
            }),
        }
    }

    fn check_memory(&self, facts: &InstructionFacts) -> Result<Option<usize>, PairingFault> {
        let Some(access) = facts.memory else {
            return Ok(None);
        };
        if !self.confines_memory {
            return Ok(None);
        }
        let base = access.base;
        let unmasked = PairingFault::UnmaskedMemoryBase {
            architecture: self.architecture,
            register: base,
        };
        if base == Register::stack_pointer(self.architecture) {
            return match self.stack_obligation {
                None => Ok(None),
                Some(_) => Err(unmasked),
            };
        }
        if base == Register::program_counter(self.architecture) {
            return if !access.is_store && !access.writeback && access.immediate_offset {
                Ok(None)
            } else {
                Err(unmasked)
            };
        }
        if let Some(mask) = self.mask_of(base) {
            if mask.data && self.guard_holds(&mask, facts.condition) {
                return Ok(Some(mask.offset));
            }
        }
        match self.zero_test {
            Some(test)
                if test.register == base
                    && test.index + 1 == self.index
                    && facts.condition == Some(CONDITION_EQUAL) =>
            {
                Ok(Some(test.offset))
            }
            _ => Err(unmasked),
        }
    }

    fn apply(&mut self, facts: &InstructionFacts) {
        for register in facts.defs.iter() {
            let slot = usize::from(register.index());
            self.last_def[slot] = Some(facts.offset);
            self.masks[slot] = None;
        }
        self.defined = self.defined.union(facts.defs);
        if facts.defs.contains(Register::CONDITIONS) {
            self.flags_defined_at = Some(self.index);
        }

        let masked = facts.code_mask.or(facts.data_mask);
        if let Some(register) = masked {
            self.masks[usize::from(register.index())] = Some(MaskFact {
                offset: facts.offset,
                index: self.index,
                condition: facts.condition,
                code: facts.code_mask == Some(register),
                data: facts.data_mask == Some(register),
            });
        }
        // A skipped test leaves Z from some earlier instruction.
        self.zero_test = facts
            .zero_test
            .filter(|_| facts.is_unconditional())
            .map(|register| ZeroTest {
                register,
                offset: facts.offset,
                index: self.index,
            });

        let consumed = facts
            .indirect_branch
            .or(facts.memory.map(|access| access.base));
        if let (Some(pending), Some(register)) = (self.pending_mask, consumed) {
            if pending.register == register {
                self.pending_mask = None;
            }
        }
        if let Some(register) = facts.code_mask {
            self.pending_mask = Some(PendingMask {
                register,
                offset: facts.offset,
            });
        }

        if self.architecture == Architecture::Arm && facts.defs.contains(Register::SP) {
            let remask = facts.data_mask == Some(Register::SP) && facts.is_unconditional();
            if remask {
                self.stack_obligation = None;
            } else if !facts.stack_adjustment {
                self.stack_obligation = Some(facts.offset);
            }
        }

        self.index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm() -> RegisterTracker {
        RegisterTracker::new(&ValidatorConfig::arm())
    }

    fn x86() -> RegisterTracker {
        RegisterTracker::new(&ValidatorConfig::x86_32())
    }

    fn r(index: u8) -> Register {
        Register::new(index)
    }

    fn facts(offset: usize) -> InstructionFacts {
        InstructionFacts {
            offset,
            length: 4,
            condition: Some(CONDITION_ALWAYS),
            ..InstructionFacts::default()
        }
    }

    fn code_mask(offset: usize, register: Register) -> InstructionFacts {
        InstructionFacts {
            defs: RegisterList::single(register),
            code_mask: Some(register),
            data_mask: Some(register),
            ..facts(offset)
        }
    }

    fn branch(offset: usize, register: Register) -> InstructionFacts {
        InstructionFacts {
            defs: RegisterList::single(Register::PC),
            indirect_branch: Some(register),
            ..facts(offset)
        }
    }

    fn load(offset: usize, base: Register, rt: Register) -> InstructionFacts {
        InstructionFacts {
            defs: RegisterList::single(rt),
            memory: Some(MemoryAccess {
                base,
                is_store: false,
                writeback: false,
                immediate_offset: true,
            }),
            ..facts(offset)
        }
    }

    #[test]
    fn masked_branch_is_guarded() {
        let mut tracker = arm();
        assert_eq!(tracker.observe(&code_mask(0, r(0))), Ok(Observation::Standalone));
        assert_eq!(
            tracker.observe(&branch(4, r(0))),
            Ok(Observation::Guarded { guard_offset: 0 })
        );
        assert!(tracker.finish().is_ok());
        assert!(tracker.end_bundle().is_ok());
    }

    #[test]
    fn branch_before_mask_is_unmasked() {
        let mut tracker = arm();
        assert_eq!(
            tracker.observe(&branch(0, r(0))),
            Err(PairingFault::UnmaskedIndirectBranch {
                architecture: Architecture::Arm,
                register: r(0)
            })
        );
        assert!(tracker.observe(&code_mask(4, r(0))).is_ok());
        assert_eq!(
            tracker.finish(),
            Err(UnmetObligation {
                offset: 4,
                fault: PairingFault::MaskWithoutBranch {
                    architecture: Architecture::Arm,
                    register: r(0)
                }
            })
        );
    }

    #[test]
    fn redefinition_between_mask_and_branch_breaks_the_pair() {
        let mut tracker = arm();
        tracker.observe(&code_mask(0, r(1))).expect("mask");
        let add = InstructionFacts {
            defs: RegisterList::single(r(1)),
            ..facts(4)
        };
        tracker.observe(&add).expect("add");
        assert_eq!(tracker.last_definition(r(1)), Some(4));
        assert!(tracker.observe(&branch(8, r(1))).is_err());
    }

    #[test]
    fn conditional_mask_needs_matching_condition_and_stable_flags() {
        let mut tracker = arm();
        let mask = InstructionFacts {
            condition: Some(CONDITION_EQUAL),
            ..code_mask(0, r(2))
        };
        tracker.observe(&mask).expect("mask");
        let same = InstructionFacts {
            condition: Some(CONDITION_EQUAL),
            ..branch(4, r(2))
        };
        assert!(tracker.clone().observe(&same).is_ok());
        assert!(tracker.clone().observe(&branch(4, r(2))).is_err());

        let cmp = InstructionFacts {
            defs: RegisterList::single(Register::CONDITIONS),
            ..facts(4)
        };
        tracker.observe(&cmp).expect("cmp");
        let late = InstructionFacts {
            condition: Some(CONDITION_EQUAL),
            ..branch(8, r(2))
        };
        assert!(tracker.observe(&late).is_err());
    }

    #[test]
    fn x86_mask_must_immediately_precede_the_branch() {
        let mut tracker = x86();
        let mask = InstructionFacts {
            condition: None,
            defs: RegisterList::single(Register::EAX).with(Register::CONDITIONS),
            code_mask: Some(Register::EAX),
            ..facts(0)
        };
        let nop = InstructionFacts {
            condition: None,
            ..facts(3)
        };
        let jmp = InstructionFacts {
            condition: None,
            defs: RegisterList::single(Register::EIP),
            indirect_branch: Some(Register::EAX),
            ..facts(4)
        };
        let mut adjacent = tracker.clone();
        adjacent.observe(&mask).expect("mask");
        assert!(adjacent.observe(&InstructionFacts { offset: 3, ..jmp }).is_ok());

        tracker.observe(&mask).expect("mask");
        tracker.observe(&nop).expect("nop");
        assert!(tracker.observe(&jmp).is_err());
    }

    #[test]
    fn memory_base_rules() {
        let mut tracker = arm();
        assert!(tracker.observe(&load(0, Register::SP, r(0))).is_ok());
        assert!(tracker.observe(&load(4, Register::PC, r(0))).is_ok());
        assert_eq!(
            tracker.observe(&load(8, r(3), r(0))),
            Err(PairingFault::UnmaskedMemoryBase {
                architecture: Architecture::Arm,
                register: r(3)
            })
        );

        let data_mask = InstructionFacts {
            defs: RegisterList::single(r(3)),
            data_mask: Some(r(3)),
            ..facts(12)
        };
        tracker.observe(&data_mask).expect("bic");
        assert_eq!(
            tracker.observe(&load(16, r(3), r(0))),
            Ok(Observation::Guarded { guard_offset: 12 })
        );
    }

    #[test]
    fn zero_test_guards_only_the_next_eq_access() {
        let mut tracker = arm();
        let tst = InstructionFacts {
            defs: RegisterList::single(Register::CONDITIONS),
            zero_test: Some(r(4)),
            ..facts(0)
        };
        tracker.observe(&tst).expect("tst");
        let guarded = InstructionFacts {
            condition: Some(CONDITION_EQUAL),
            ..load(4, r(4), r(0))
        };
        assert_eq!(
            tracker.clone().observe(&guarded),
            Ok(Observation::Guarded { guard_offset: 0 })
        );
        assert!(tracker.clone().observe(&load(4, r(4), r(0))).is_err());

        tracker.observe(&facts(4)).expect("nop");
        assert!(tracker.observe(&InstructionFacts { offset: 8, ..guarded }).is_err());
    }

    #[test]
    fn conditional_zero_test_guards_nothing() {
        let mut tracker = arm();
        let tstne = InstructionFacts {
            condition: Some(0x1),
            defs: RegisterList::single(Register::CONDITIONS),
            zero_test: Some(r(3)),
            ..facts(0)
        };
        tracker.observe(&tstne).expect("tstne");
        let ldreq = InstructionFacts {
            condition: Some(CONDITION_EQUAL),
            ..load(4, r(3), r(1))
        };
        assert_eq!(
            tracker.observe(&ldreq),
            Err(PairingFault::UnmaskedMemoryBase {
                architecture: Architecture::Arm,
                register: r(3)
            })
        );
    }

    #[test]
    fn stack_pointer_must_be_remasked_within_the_bundle() {
        let mut tracker = arm();
        let add_sp = InstructionFacts {
            defs: RegisterList::single(Register::SP),
            ..facts(0)
        };
        tracker.observe(&add_sp).expect("add sp");
        assert!(tracker.observe(&load(4, Register::SP, r(0))).is_err());
        assert_eq!(
            tracker.end_bundle(),
            Err(UnmetObligation {
                offset: 0,
                fault: PairingFault::StackPointerNotRemasked
            })
        );

        tracker.observe(&add_sp).expect("add sp");
        let bic_sp = InstructionFacts {
            defs: RegisterList::single(Register::SP),
            data_mask: Some(Register::SP),
            ..facts(4)
        };
        tracker.observe(&bic_sp).expect("bic sp");
        assert!(tracker.end_bundle().is_ok());

        let push = InstructionFacts {
            defs: RegisterList::single(Register::SP),
            stack_adjustment: true,
            ..facts(0)
        };
        tracker.observe(&push).expect("push");
        assert!(tracker.end_bundle().is_ok());
    }

    #[test]
    fn bundle_end_drops_masks() {
        let mut tracker = arm();
        tracker.observe(&code_mask(0, r(0))).expect("mask");
        assert!(tracker.defined().contains(r(0)));
        assert!(tracker.end_bundle().is_ok());
        assert_eq!(tracker.instructions(), 0);
        assert!(tracker.defined().is_empty());
        assert!(tracker.finish().is_ok());
        assert!(tracker.observe(&branch(16, r(0))).is_err());
    }

    #[test]
    fn memory_through_a_code_mask_consumes_it() {
        let mut tracker = arm();
        tracker.observe(&code_mask(0, r(5))).expect("mask");
        tracker.observe(&load(4, r(5), r(1))).expect("load");
        assert!(tracker.finish().is_ok());
    }

    #[test]
    fn full_width_sandbox_does_not_confine_memory() {
        let config = ValidatorConfig {
            sandbox_address_bits: 32,
            ..ValidatorConfig::arm()
        };
        let mut tracker = RegisterTracker::new(&config);
        assert!(tracker.observe(&load(0, r(3), r(0))).is_ok());
    }
}
