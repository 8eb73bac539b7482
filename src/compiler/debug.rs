//! Debug utilities for TAC→x86 lowering
//!
//! Tools for inspecting the IR, the storage-location table and the register
//! map while code is being generated.

use super::ir::Tac;
use super::x86_codegen::X86Codegen;
use super::CompileOptions;
use crate::Result;

/// One line per instruction, no indices
pub fn format_tac_listing(instructions: &[Tac]) -> String {
    let mut out = String::new();
    for tac in instructions {
        out.push_str(&format_tac(tac));
        out.push('\n');
    }
    out
}

/// Format a single instruction, with its source position when known
pub fn format_tac(tac: &Tac) -> String {
    tac.to_string()
}

/// Numbered listing with source positions, for humans
pub fn format_tac_numbered(instructions: &[Tac]) -> String {
    let mut out = String::new();
    for (i, tac) in instructions.iter().enumerate() {
        match tac.loc {
            Some(loc) => out.push_str(&format!("{:04}: {:<40} ; {}\n", i, tac.to_string(), loc)),
            None => out.push_str(&format!("{:04}: {}\n", i, tac)),
        }
    }
    out
}

/// Print the IR in human-readable format
pub fn dump_ir(instructions: &[Tac]) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    TAC DUMP");
    println!("═══════════════════════════════════════════════════════════");
    println!("Instructions: {}", instructions.len());
    println!("───────────────────────────────────────────────────────────");
    print!("{}", format_tac_numbered(instructions));
    println!("═══════════════════════════════════════════════════════════\n");
}

/// Export the IR as pretty-printed JSON (loadable with `parse_listing`)
pub fn export_json(instructions: &[Tac]) -> Result<String> {
    Ok(serde_json::to_string_pretty(instructions)?)
}

/// Current storage locations and register bindings of a generator
pub fn format_codegen_state(codegen: &X86Codegen) -> String {
    let alloc = codegen.allocator();
    let mut out = alloc.locations().dump();
    out.push_str(&alloc.dump());
    let stats = alloc.stats();
    out.push_str(&format!(
        ";; depth {}  frame {}  spills {}  reloads {}  evictions {}\n",
        alloc.depth(),
        alloc.frame_offset(),
        stats.spills,
        stats.reloads,
        stats.evictions
    ));
    out
}

/// Full debug dump of a lowering: IR, assembly, final allocator state
pub fn debug_compile(instructions: &[Tac]) {
    dump_ir(instructions);

    let options = CompileOptions {
        annotate: true,
        ..CompileOptions::default()
    };
    let mut codegen = X86Codegen::new(&options);
    if let Err(e) = codegen.lower_all(instructions) {
        println!("Lowering failed: {}", e);
    }

    println!("═══════════════════════════════════════════════════════════");
    println!("                    x86 OUTPUT");
    println!("═══════════════════════════════════════════════════════════");
    print!("{}", codegen.output().to_text());
    println!("───────────────────────────────────────────────────────────");
    print!("{}", format_codegen_state(&codegen));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{parse_listing, SourceLoc, TacOp, Value};

    fn sample() -> Vec<Tac> {
        vec![
            Tac::three(
                TacOp::Mul,
                Value::name("~t0"),
                Some(Value::name("a")),
                Some(Value::imm(2)),
            )
            .unwrap()
            .with_loc(Some(SourceLoc { line: 4, col: 9 })),
            Tac::three(TacOp::Write, Value::name("~t0"), None, None).unwrap(),
        ]
    }

    #[test]
    fn test_listing_has_one_line_per_instruction() {
        assert_eq!(format_tac_listing(&sample()), "mul ~t0, a, 2\nwrite ~t0\n");
        assert_eq!(format_tac_listing(&[]), "");
    }

    #[test]
    fn test_numbered_listing_shows_positions() {
        let text = format_tac_numbered(&sample());
        let first = text.lines().next().unwrap();
        assert!(first.starts_with("0000: mul ~t0, a, 2"));
        assert!(first.ends_with("; 4:9"));
        assert_eq!(text.lines().nth(1), Some("0001: write ~t0"));
    }

    #[test]
    fn test_json_export_reloads() {
        let json = export_json(&sample()).unwrap();
        assert_eq!(parse_listing(&json).unwrap(), sample());
    }

    #[test]
    fn test_codegen_state_reports_frame() {
        let codegen = X86Codegen::new(&CompileOptions::default());
        let state = format_codegen_state(&codegen);
        assert!(state.contains("Symbol Table"));
        assert!(state.contains("register mapping"));
        assert!(state.ends_with(";; depth 0  frame 0  spills 0  reloads 0  evictions 0\n"));
    }
}
