//! Plain-text rendering of decode listings, verdicts and cross-check summaries.

use std::fmt::Write as _;

use sfi_validator::{
    Architecture, CrossCheckSummary, DecodedInstruction, Instructions, ValidationReport, Verdict,
};

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[allow(clippy::cast_possible_truncation)]
fn render_instruction(
    out: &mut String,
    architecture: Architecture,
    code: &[u8],
    base: u32,
    instruction: &DecodedInstruction,
) {
    let end = (instruction.offset + instruction.length).min(code.len());
    let bytes = hex_bytes(&code[instruction.offset..end]);
    let _ = writeln!(
        out,
        "{:#010x} +{:<6x} {bytes:<24} {:<36} {:<20} defs={}",
        base.wrapping_add(instruction.offset as u32),
        instruction.offset,
        instruction.shape(),
        instruction.safety().to_string(),
        instruction.defs().describe(architecture),
    );
}

/// One line per instruction: address, offset, bytes, shape, safety and the
/// registers it writes.
#[must_use]
pub fn render_listing(architecture: Architecture, code: &[u8], base: u32) -> String {
    let mut out = String::new();
    for instruction in Instructions::new(architecture, code) {
        render_instruction(&mut out, architecture, code, base, &instruction);
    }
    out
}

/// Verdict line, one line per diagnostic, then scan counters.
#[must_use]
pub fn render_report(report: &ValidationReport) -> String {
    let mut out = String::new();
    match &report.verdict {
        Verdict::Accept => out.push_str("ACCEPT\n"),
        Verdict::Reject(diagnostics) => {
            let _ = writeln!(out, "REJECT ({} violation(s))", diagnostics.len());
            for diagnostic in diagnostics {
                let _ = writeln!(out, "  {diagnostic}");
            }
        }
    }
    let stats = &report.stats;
    let _ = writeln!(
        out,
        "{} instruction(s) in {} bundle(s), {} literal pool(s), scan {:?}",
        stats.instructions, stats.bundles, stats.literal_pools, report.final_state
    );
    out
}

/// Trial totals and the first `limit` disagreements.
#[must_use]
pub fn render_cross_check(summary: &CrossCheckSummary, limit: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} trial(s), {} match(es), {} disagreement(s)",
        summary.trials,
        summary.matches,
        summary.disagreements.len()
    );
    let mut disagreements: Vec<_> = summary.disagreements.iter().collect();
    disagreements.sort_by(|a, b| a.bytes.cmp(&b.bytes));
    for disagreement in disagreements.into_iter().take(limit) {
        let _ = writeln!(
            out,
            "  [{}] instruction {} at +{:#x}: {:?} vs {:?}",
            hex_bytes(&disagreement.bytes),
            disagreement.instruction_index,
            disagreement.offset,
            disagreement.first,
            disagreement.second
        );
    }
    out
}
