#![no_main]

use libfuzzer_sys::fuzz_target;
use sfi_validator::{
    cross_check, Architecture, CrossCheckRecord, Instructions, ProductionX86Decoder,
    ReferenceX86Decoder, ValidationMode, Validator, ValidatorConfig,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let base = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) & !0xFFF;
    let code = &data[4..];

    for config in [ValidatorConfig::arm(), ValidatorConfig::x86_32()] {
        for mode in [ValidationMode::Strict, ValidationMode::Diagnostic] {
            let Ok(validator) = Validator::new(config.with_mode(mode)) else {
                return;
            };
            let report = validator.validate_with_report(base, code);
            if !report.verdict.is_accept() {
                continue;
            }
            if config.architecture == Architecture::X86 {
                for instruction in Instructions::new(Architecture::X86, code) {
                    assert!(instruction.is_decoded(), "accepted undecodable bytes");
                    assert!(instruction.safety().is_acceptable());
                }
            }
        }
    }

    if let CrossCheckRecord::Disagreement(disagreement) =
        cross_check(&ProductionX86Decoder, &ReferenceX86Decoder, code)
    {
        panic!("decoders disagree: {disagreement:x?}");
    }
});
