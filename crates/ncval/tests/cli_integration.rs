//! Integration tests for the ncval CLI.

use clap as _;
use env_logger as _;
use log as _;
use ncval as _;
use serde as _;
use sfi_validator as _;
use thiserror as _;
use toml as _;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("ncval")
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn arm_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

fn run(args: &[&str]) -> Output {
    Command::new(binary_path())
        .args(args)
        .output()
        .expect("failed to run ncval")
}

#[test]
fn accepted_segment_exits_zero() {
    let temp_dir = tempfile::tempdir().unwrap();
    let code = write_file(temp_dir.path(), "ok.bin", &arm_words(&[0xE281_0001]));

    let output = run(&["validate", code.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("ACCEPT"));
}

#[test]
fn rejected_segment_exits_one_with_diagnostics() {
    let temp_dir = tempfile::tempdir().unwrap();
    let code = write_file(
        temp_dir.path(),
        "bad.bin",
        &arm_words(&[0xE281_F004, 0xE12F_FF10]),
    );

    let output = run(&["validate", code.to_str().unwrap(), "--mode", "diagnostic"]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("REJECT (2 violation(s))"));
    assert!(stdout.contains("+0x0"));
    assert!(stdout.contains("+0x4"));
}

#[test]
fn settings_file_selects_x86_and_flags_override_it() {
    let temp_dir = tempfile::tempdir().unwrap();
    let settings = write_file(
        temp_dir.path(),
        "ncval.toml",
        b"architecture = \"x86-32\"\nbundle_size = 32\nbase = 0x10000\n",
    );
    // jmp .+2 is fine only when any instruction start is a valid target.
    let code = write_file(temp_dir.path(), "jump.bin", &[0xEB, 0x00, 0x90]);

    let strict = run(&[
        "validate",
        code.to_str().unwrap(),
        "--config",
        settings.to_str().unwrap(),
    ]);
    assert_eq!(strict.status.code(), Some(1));

    let relaxed = run(&[
        "validate",
        code.to_str().unwrap(),
        "--config",
        settings.to_str().unwrap(),
        "--targets",
        "instruction-boundary",
    ]);
    assert_eq!(relaxed.status.code(), Some(0));
}

#[test]
fn invalid_settings_exit_two() {
    let temp_dir = tempfile::tempdir().unwrap();
    let code = write_file(temp_dir.path(), "ok.bin", &arm_words(&[0xE281_0001]));
    let settings = write_file(temp_dir.path(), "bad.toml", b"bundle = 16\n");

    let unknown_key = run(&[
        "validate",
        code.to_str().unwrap(),
        "--config",
        settings.to_str().unwrap(),
    ]);
    assert_eq!(unknown_key.status.code(), Some(2));

    let bad_geometry = run(&["validate", code.to_str().unwrap(), "--bundle-size", "24"]);
    assert_eq!(bad_geometry.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&bad_geometry.stderr).contains("not a power of two"));

    let missing = run(&["validate", temp_dir.path().join("nope.bin").to_str().unwrap()]);
    assert_eq!(missing.status.code(), Some(2));
}

#[test]
fn usage_errors_exit_two() {
    let output = run(&["validate"]);
    assert_eq!(output.status.code(), Some(2));

    let output = run(&["validate", "x.bin", "--arch", "mips"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn decode_prints_one_line_per_instruction() {
    let temp_dir = tempfile::tempdir().unwrap();
    let code = write_file(temp_dir.path(), "mask.bin", &[0x83, 0xE0, 0xE0, 0xFF, 0xE0]);

    let output = run(&[
        "decode",
        code.to_str().unwrap(),
        "--arch",
        "x86-32",
        "--base",
        "0x1000",
    ]);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("0x00001000"));
    assert!(lines[0].contains("CodeMask"));
    assert!(lines[1].starts_with("0x00001003"));
    assert!(lines[1].contains("IndirectJump"));
}

#[test]
fn cross_check_of_one_byte_space_is_clean() {
    let output = run(&["cross-check", "--random", "500", "--seed", "7"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout)
        .starts_with("756 trial(s), 756 match(es), 0 disagreement(s)"));
}
