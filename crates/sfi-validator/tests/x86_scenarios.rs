//! x86-32 segment scenarios.

use log as _;
use proptest as _;
use rand as _;
use rand_chacha as _;
use rayon as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

use rstest::rstest;
use sfi_validator::{
    AlignmentFault, Architecture, PairingFault, Register, SafetyLevel, ValidationError,
    ValidationMode, Validator, ValidatorConfig, Verdict, ViolationClass,
};

const BASE: u32 = 0x0001_0000;
const NOP: u8 = 0x90;

fn validator(bundle_size: u32, mode: ValidationMode) -> Validator {
    Validator::new(
        ValidatorConfig::x86_32()
            .with_bundle_size(bundle_size)
            .with_mode(mode),
    )
    .expect("supported geometry")
}

fn padded(code: &[u8], length: usize) -> Vec<u8> {
    let mut bytes = code.to_vec();
    bytes.resize(length, NOP);
    bytes
}

#[rstest]
fn short_jump_into_bundle_interior_is_rejected(
    #[values(ValidationMode::Strict, ValidationMode::Diagnostic)] mode: ValidationMode,
) {
    // jmp .+2 with 16-byte bundles.
    let verdict = validator(16, mode).validate(BASE, &[0xEB, 0x00]);
    let diagnostic = verdict.first().expect("rejected");
    assert_eq!(diagnostic.error.class(), ViolationClass::BundleAlignment);
    assert_eq!(
        diagnostic.error,
        AlignmentFault::MisalignedBranchTarget { target: BASE + 2 }.into()
    );
}

#[rstest]
fn masked_indirect_jump_is_accepted(
    #[values(ValidationMode::Strict, ValidationMode::Diagnostic)] mode: ValidationMode,
) {
    // and eax, 0xffffffe0; jmp eax
    let code = [0x83, 0xE0, 0xE0, 0xFF, 0xE0];
    assert_eq!(validator(32, mode).validate(BASE, &code), Verdict::Accept);
}

#[test]
fn mask_must_match_the_bundle_size() {
    // and eax, 0xfffffff0 clears too few bits for 32-byte bundles.
    let code = [0x83, 0xE0, 0xF0, 0xFF, 0xE0];
    assert_eq!(
        validator(16, ValidationMode::Strict).validate(BASE, &code),
        Verdict::Accept
    );
    let verdict = validator(32, ValidationMode::Strict).validate(BASE, &code);
    assert_eq!(
        verdict.first().map(|diagnostic| diagnostic.error),
        Some(
            PairingFault::UnmaskedIndirectBranch {
                architecture: Architecture::X86,
                register: Register::EAX
            }
            .into()
        )
    );
    let message = verdict.first().map(ToString::to_string).unwrap_or_default();
    assert!(message.contains("indirect branch through eax"), "{message}");
}

#[test]
fn mask_and_branch_must_be_adjacent() {
    let code = [0x83, 0xE0, 0xE0, NOP, 0xFF, 0xE0];
    let verdict = validator(32, ValidationMode::Strict).validate(BASE, &code);
    assert_eq!(verdict.first().map(|diagnostic| diagnostic.offset), Some(4));
}

#[test]
fn indirect_call_must_end_the_bundle() {
    // and ecx, 0xffffffe0; call ecx, placed at the end of the bundle.
    let mut code = vec![NOP; 27];
    code.extend_from_slice(&[0x83, 0xE1, 0xE0, 0xFF, 0xD1]);
    assert_eq!(
        validator(32, ValidationMode::Strict).validate(BASE, &code),
        Verdict::Accept
    );

    let early = padded(&[0x83, 0xE1, 0xE0, 0xFF, 0xD1], 32);
    let verdict = validator(32, ValidationMode::Strict).validate(BASE, &early);
    assert_eq!(
        verdict.first().map(|diagnostic| (diagnostic.offset, diagnostic.error)),
        Some((3, AlignmentFault::CallNotAtBundleEnd.into()))
    );
}

#[test]
fn direct_call_to_bundle_start_is_accepted() {
    let mut code = vec![NOP; 27];
    // call .-32+5 lands at the start of the segment.
    code.extend_from_slice(&[0xE8, 0xE0, 0xFF, 0xFF, 0xFF]);
    assert_eq!(
        validator(32, ValidationMode::Strict).validate(BASE, &code),
        Verdict::Accept
    );
}

#[rstest]
#[case::syscall(&[0x0F, 0x05], SafetyLevel::Forbidden)]
#[case::int80(&[0xCD, 0x80], SafetyLevel::Forbidden)]
#[case::ret(&[0xC3], SafetyLevel::Forbidden)]
#[case::fs_override(&[0x64, 0x8B, 0x00], SafetyLevel::ForbiddenOperands)]
#[case::lock_on_register(&[0xF0, 0x01, 0xC8], SafetyLevel::Undefined)]
fn unsafe_instructions_are_safety_violations(#[case] code: &[u8], #[case] level: SafetyLevel) {
    let verdict = validator(32, ValidationMode::Strict).validate(BASE, code);
    let diagnostic = verdict.first().expect("rejected");
    assert_eq!(diagnostic.error, ValidationError::SafetyViolation { level });
}

#[rstest]
#[case::xbegin(&[0xC7, 0xF8, 0x03, 0x00, 0x00, 0x00])]
#[case::xabort(&[0xC6, 0xF8, 0x00])]
#[case::mov_group_slot1(&[0xC6, 0xC8, 0x00])]
#[case::pop_group_slot1(&[0x8F, 0xC8])]
#[case::unassigned_0f38(&[0x0F, 0x38, 0xFF, 0xC0])]
#[case::unassigned_0f3a(&[0x0F, 0x3A, 0xFF, 0xC0, 0x00])]
#[case::bt_group_slot0(&[0x0F, 0xBA, 0xC0, 0x00])]
fn unassigned_encodings_are_undefined(#[case] code: &[u8]) {
    let verdict = validator(32, ValidationMode::Strict).validate(BASE, &padded(code, 32));
    let diagnostic = verdict.first().expect("rejected");
    assert_eq!(diagnostic.offset, 0);
    assert_eq!(
        diagnostic.error,
        ValidationError::SafetyViolation {
            level: SafetyLevel::Undefined
        }
    );
}

#[test]
fn undecodable_bytes_fail_closed() {
    let verdict = validator(32, ValidationMode::Strict).validate(BASE, &[0xD6]);
    let diagnostic = verdict.first().expect("rejected");
    assert_eq!(diagnostic.error, ValidationError::DecodeUndefined);
    assert_eq!(diagnostic.safety, SafetyLevel::Undefined);
}

#[test]
fn x87_and_sse_are_implementation_safe_and_accepted() {
    // fadd st, st(1); movaps xmm0, xmm1
    let code = [0xD8, 0xC1, 0x0F, 0x28, 0xC1];
    assert_eq!(
        validator(32, ValidationMode::Strict).validate(BASE, &code),
        Verdict::Accept
    );
}

#[test]
fn gs_relative_load_is_accepted() {
    // mov eax, gs:[0]
    let code = [0x65, 0xA1, 0x00, 0x00, 0x00, 0x00];
    assert_eq!(
        validator(32, ValidationMode::Strict).validate(BASE, &code),
        Verdict::Accept
    );
}
