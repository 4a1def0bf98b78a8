//! Verdict fingerprint over a fixed segment corpus, compared across hosts in CI.

use log as _;
use proptest as _;
use rand as _;
use rand_chacha as _;
use rayon as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

use sfi_validator::{ValidationMode, ValidationReport, Validator, ValidatorConfig, Verdict};

fn arm_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn hash_report(hash: &mut u64, report: &ValidationReport) {
    match &report.verdict {
        Verdict::Accept => hash_bytes(hash, &[0x01]),
        Verdict::Reject(diagnostics) => {
            hash_bytes(hash, &[0x02]);
            for diagnostic in diagnostics {
                hash_bytes(hash, &diagnostic.offset.to_le_bytes());
                hash_bytes(hash, &diagnostic.address.to_le_bytes());
                hash_bytes(
                    hash,
                    &[diagnostic.safety.as_u8(), diagnostic.error.class().as_u8()],
                );
            }
        }
    }
    hash_bytes(hash, &report.stats.instructions.to_le_bytes());
    hash_bytes(hash, &report.stats.bundles.to_le_bytes());
    hash_bytes(hash, &report.stats.violations().to_le_bytes());
}

fn fingerprint() -> String {
    let arm_corpus = [
        arm_words(&[0xE281_0001, 0xE320_F000, 0xE320_F000, 0xE320_F000]),
        arm_words(&[0xE3C0_02FC, 0xE12F_FF10]),
        arm_words(&[0xE12F_FF10, 0xE3C0_02FC]),
        arm_words(&[0xE281_F004, 0xEF00_0000, 0xEAFF_FFFF]),
        arm_words(&[0xE92D_4010, 0xE8BD_4010, 0xE593_1000]),
    ];
    let x86_corpus = [
        vec![0x83, 0xE0, 0xE0, 0xFF, 0xE0],
        vec![0xEB, 0x00],
        vec![0x0F, 0x05, 0xC3, 0xD6],
        vec![0x65, 0xA1, 0x00, 0x00, 0x00, 0x00, 0xD8, 0xC1],
    ];

    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for (config, corpus) in [
        (ValidatorConfig::arm(), &arm_corpus[..]),
        (ValidatorConfig::x86_32(), &x86_corpus[..]),
    ] {
        let validator = Validator::new(config.with_mode(ValidationMode::Diagnostic))
            .expect("default geometry is valid");
        for code in corpus {
            hash_report(&mut hash, &validator.validate_with_report(0x0002_0000, code));
        }
    }

    format!("{hash:016x}")
}

fn main() {
    println!("{}", fingerprint());
}
