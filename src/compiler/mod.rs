//! # PL/0 Compiler Backend - TAC to x86 Assembly
//!
//! This module lowers the three-address code produced by the PL/0 front end
//! to 32-bit x86 assembly, allocating registers on demand and addressing
//! variables of enclosing procedures through the static-link chain.
//!
//! ## Architecture
//!
//! ```text
//! IrBuilder → [Tac] → X86Codegen ──→ SimpleAllocator ──→ AsmOut (.asm)
//!                          │                 │
//!                   ScopedEnv<Symbol>   ScopedEnv<Loc>
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! compiler/
//! ├── mod.rs          # This file - CompileOptions, Compiler, CompileResult
//! ├── env.rs          # ScopedEnv: scoped symbol table
//! ├── symbols.rs      # Symbol descriptors, storage locations
//! ├── ir/             # TAC values, instructions, builder
//! ├── asm.rs          # AsmOut: annotated assembly line buffer
//! ├── regalloc.rs     # RegisterAllocator trait, SimpleAllocator
//! ├── x86_codegen.rs  # X86Codegen: per-instruction lowering
//! └── debug.rs        # Listings, dumps, JSON export
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use pl0c::compiler::{Compiler, CompileOptions, IrBuilder};
//!
//! let mut builder = IrBuilder::new();
//! // ... front end emits TAC ...
//! let compiler = Compiler::new(CompileOptions::default());
//! let result = compiler.compile(builder.instructions())?;
//! std::fs::write("program.asm", result.asm)?;
//! ```

pub mod asm;
pub mod debug;
pub mod env;
pub mod ir;
pub mod regalloc;
pub mod symbols;
pub mod x86_codegen;

pub use asm::AsmOut;
pub use debug::{debug_compile, dump_ir, export_json, format_tac_listing};
pub use env::{Named, ScopedEnv};
pub use ir::{parse_listing, Arg, DataType, IrBuilder, Operands, SourceLoc, Tac, TacOp, Value};
pub use regalloc::{
    Address, AllocStats, EvictionPolicy, Register, RegisterAllocator, SimpleAllocator,
};
pub use symbols::{Function, Loc, Procedure, Symbol, VarKind, Variable};
pub use x86_codegen::X86Codegen;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// The only machine word size the x86 backend emits
pub const WORD_SIZE: u32 = 4;

/// Compilation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Bytes per stack slot
    pub word_size: u32,
    /// Victim selection under register pressure
    pub eviction: EvictionPolicy,
    /// Suffix each assembly line with the TAC it came from
    pub annotate: bool,
    /// Append the storage-location table as comments after each routine
    pub dump_symbols: bool,
    /// Append the register map as comments after each routine
    pub dump_registers: bool,
    /// Emit `section`/`extern`/`global` directives around the code
    pub directives: bool,
    /// Routine exported with `global` when directives are on
    pub entry: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            word_size: WORD_SIZE,
            eviction: EvictionPolicy::Lru,
            annotate: true,
            dump_symbols: false,
            dump_registers: false,
            directives: false,
            entry: None,
        }
    }
}

impl CompileOptions {
    /// Parse options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reject options the backend cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.word_size != WORD_SIZE {
            return Err(Error::Config(format!(
                "word_size must be {}, got {}",
                WORD_SIZE, self.word_size
            )));
        }
        if let Some(entry) = &self.entry {
            if entry.is_empty() {
                return Err(Error::Config("entry routine name is empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Compilation result with metadata
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Assembly text, newline-terminated
    pub asm: String,
    /// Assembly lines (same content as `asm`)
    pub lines: Vec<String>,
    /// Number of TAC instructions lowered
    pub tac_count: usize,
    /// Number of assembly lines emitted
    pub asm_line_count: usize,
    /// Allocator spill/reload counters
    pub stats: AllocStats,
}

/// TAC to x86 compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Options this compiler was built with
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Lower a TAC stream to assembly
    pub fn compile(&self, program: &[Tac]) -> Result<CompileResult> {
        self.options.validate()?;

        let mut codegen = X86Codegen::new(&self.options);
        codegen.lower_all(program)?;
        let stats = codegen.allocator().stats();

        let mut lines = Vec::new();
        if self.options.directives {
            lines.extend(self.prelude());
        }
        lines.extend(codegen.finish().take());

        tracing::debug!(
            tac = program.len(),
            lines = lines.len(),
            spills = stats.spills,
            reloads = stats.reloads,
            "compilation finished"
        );

        let mut asm = String::new();
        for line in &lines {
            asm.push_str(line);
            asm.push('\n');
        }
        Ok(CompileResult {
            asm,
            tac_count: program.len(),
            asm_line_count: lines.len(),
            lines,
            stats,
        })
    }

    /// Load a JSON listing and lower it
    pub fn compile_json(&self, json: &str) -> Result<CompileResult> {
        let program = parse_listing(json)?;
        self.compile(&program)
    }

    fn prelude(&self) -> Vec<String> {
        let mut lines = vec!["bits 32".to_string(), "section .text".to_string()];
        for symbol in x86_codegen::runtime::ALL {
            lines.push(format!("extern {}", symbol));
        }
        if let Some(entry) = &self.options.entry {
            lines.push(format!("global {}", x86_codegen::routine_label(entry)));
        }
        lines
    }
}
