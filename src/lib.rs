//! # pl0c - PL/0 Compiler Backend
//!
//! The back half of a PL/0 compiler: a lexically scoped symbol environment,
//! a three-address code (TAC) intermediate representation with its builder,
//! and an on-demand x86 register allocator that spills to the stack and
//! reaches variables of enclosing procedures through the static-link chain.
//!
//! ## Quick Start
//!
//! ```rust
//! use pl0c::compiler::{CompileOptions, Compiler, IrBuilder, TacOp, Value};
//!
//! # fn main() -> pl0c::Result<()> {
//! let mut ir = IrBuilder::new();
//! ir.emit_call(TacOp::Proc, Value::name("main"), vec![], None)?;
//! ir.emit(TacOp::Var, Value::name("x"), None, None)?;
//! ir.emit(TacOp::Begin, Value::name("main"), None, None)?;
//!
//! // x := x * 2
//! let t = ir.make_temp();
//! ir.emit(TacOp::Mul, Value::name(&t), Some(Value::name("x")), Some(Value::imm(2)))?;
//! ir.emit(TacOp::Assign, Value::name("x"), Some(Value::name(&t)), None)?;
//! ir.emit(TacOp::End, Value::name("main"), None, None)?;
//!
//! let options = CompileOptions { annotate: false, ..CompileOptions::default() };
//! let result = Compiler::new(options).compile(ir.instructions())?;
//! assert!(result.asm.contains("imul ecx, 2"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`compiler::env`] - `ScopedEnv`, one table with LIFO scope tags
//! - [`compiler::ir`] - `Value`, `Tac`, `IrBuilder`
//! - [`compiler::regalloc`] - `RegisterAllocator`, `SimpleAllocator`
//! - [`compiler::x86_codegen`] - `X86Codegen`, TAC to NASM lowering
//! - [`error`] - `Error` and `Result`
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events (evictions, frames, per-routine
//! statistics) and installs no subscriber.

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;

pub use compiler::{
    CompileOptions, CompileResult, Compiler, IrBuilder, ScopedEnv, SimpleAllocator, Tac, TacOp,
    Value, X86Codegen,
};
pub use error::{Error, Result};
