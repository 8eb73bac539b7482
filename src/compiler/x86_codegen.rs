//! # x86 Code Generator
//!
//! Prints 32-bit x86 assembly (NASM syntax) for a TAC stream, one
//! instruction at a time, asking the [`SimpleAllocator`] to materialize
//! every named operand.
//!
//! ## Key Technical Details
//! - `eax` is never allocated: static-link walks, division, call results
//!   and the runtime I/O calls all use it
//! - Registers are flushed before every label, jump, branch and call, so
//!   control flow never has to reconcile register maps
//! - Every label resets `esp` from `ebp` and the current frame offset
//! - Program variables live in memory: each definition is written back
//!   through the static link and the register released
//! - Routine `f` sees its static link at `[ebp+8]`; a function's result
//!   slot is its first local and is moved to `eax` on return

use super::asm::AsmOut;
use super::env::ScopedEnv;
use super::ir::{DataType, Tac, TacOp, Value};
use super::regalloc::{Register, RegisterAllocator, SimpleAllocator, RETURN_VALUE};
use super::symbols::{Function, Procedure, Symbol, VarKind, Variable};
use super::CompileOptions;
use crate::{Error, Result};

/// Binding name of the register an arithmetic result is computed in
const ACCUMULATOR: &str = "~acc";

// =============================================================================
// RUNTIME INTERFACE
// =============================================================================

/// Runtime routines the generated code calls (cdecl, one word argument)
pub mod runtime {
    /// Reads an integer, returned in `eax`
    pub const READ_INT: &str = "_read_int";
    /// Reads a character, returned in `eax`
    pub const READ_CHAR: &str = "_read_char";
    /// Writes the integer argument
    pub const WRITE_INT: &str = "_write_int";
    /// Writes the character argument
    pub const WRITE_CHAR: &str = "_write_char";

    /// Every runtime symbol, for `extern` declarations
    pub const ALL: [&str; 4] = [READ_INT, READ_CHAR, WRITE_INT, WRITE_CHAR];
}

/// Assembly label of a routine
pub fn routine_label(name: &str) -> String {
    format!("_{}", name)
}

/// Assembly label of a TAC label number
pub fn jump_label(n: u32) -> String {
    format!("L{}", n)
}

fn condition_code(op: TacOp) -> Option<&'static str> {
    match op {
        TacOp::Jlt => Some("jl"),
        TacOp::Jle => Some("jle"),
        TacOp::Jgt => Some("jg"),
        TacOp::Jge => Some("jge"),
        TacOp::Jeq => Some("je"),
        TacOp::Jne => Some("jne"),
        _ => None,
    }
}

/// Routine opened by `proc`/`func` and not yet closed by `end`
#[derive(Debug, Clone)]
struct OpenRoutine {
    name: String,
    is_function: bool,
    /// `begin` emitted the prologue
    begun: bool,
}

// =============================================================================
// CODE GENERATOR
// =============================================================================

/// Lowers TAC to x86 assembly
///
/// Storage slots are found by exact name. Routine lookups in the symbol
/// table keep the mangled-suffix rule of [`name_matches`](super::env::name_matches),
/// so a `call x` made while a variable `my_x` is in scope fails with
/// [`Error::UnknownRoutine`].
#[derive(Debug, Clone)]
pub struct X86Codegen {
    /// Register allocator; owns the output listing
    alloc: SimpleAllocator,
    /// Routine and variable descriptors, scoped like the source
    symbols: ScopedEnv<Symbol>,
    /// Routines currently open, innermost last
    open: Vec<OpenRoutine>,
    dump_symbols: bool,
    dump_registers: bool,
    annotate: bool,
}

impl X86Codegen {
    /// Code generator with the given options
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            alloc: SimpleAllocator::with_options(options),
            symbols: ScopedEnv::new(),
            open: Vec::new(),
            dump_symbols: options.dump_symbols,
            dump_registers: options.dump_registers,
            annotate: options.annotate,
        }
    }

    /// Lower a whole instruction stream
    pub fn lower_all(&mut self, program: &[Tac]) -> Result<()> {
        for tac in program {
            self.lower(tac)?;
        }
        if let Some(routine) = self.open.last() {
            tracing::warn!(routine = %routine.name, "stream ended inside an open routine");
        }
        Ok(())
    }

    /// Lower one instruction
    ///
    /// Errors are tagged with the instruction's source location.
    pub fn lower(&mut self, tac: &Tac) -> Result<()> {
        let origin = self.annotate.then(|| tac.to_string());
        self.alloc.out_mut().set_origin(origin);
        let result = self.lower_inner(tac).map_err(|e| e.at(tac.loc));
        self.alloc.out_mut().set_origin(None);
        result
    }

    fn lower_inner(&mut self, tac: &Tac) -> Result<()> {
        match tac.op {
            TacOp::Label => self.lower_label(tac.label()?),
            TacOp::Jmp => {
                self.alloc.spill_all()?;
                self.out().emit(format!("jmp {}", jump_label(tac.label()?)));
                Ok(())
            }
            TacOp::Jlt | TacOp::Jle | TacOp::Jgt | TacOp::Jge | TacOp::Jeq | TacOp::Jne => {
                let (lhs, rhs) = Self::sources(tac)?;
                self.lower_branch(tac.op, tac.label()?, lhs, rhs)
            }
            TacOp::Assign => {
                let (src, _) = Self::sources(tac)?;
                self.lower_assign(Self::dst_name(tac)?, src)
            }
            TacOp::Add | TacOp::Sub | TacOp::Mul => {
                let (lhs, rhs) = Self::sources(tac)?;
                let rhs = rhs.ok_or_else(|| Error::malformed(tac.op.mnemonic(), "missing rhs"))?;
                self.lower_arith(tac.op, Self::dst_name(tac)?, lhs, rhs)
            }
            TacOp::Div => {
                let (lhs, rhs) = Self::sources(tac)?;
                let rhs = rhs.ok_or_else(|| Error::malformed("div", "missing rhs"))?;
                self.lower_div(Self::dst_name(tac)?, lhs, rhs)
            }
            TacOp::Neg => {
                let (src, _) = Self::sources(tac)?;
                self.lower_neg(Self::dst_name(tac)?, src)
            }
            TacOp::Var => {
                let name = Self::dst_name(tac)?;
                self.alloc.declare(name);
                self.symbols.push(Symbol::Variable(Variable::new(
                    name,
                    tac.dst().dtype(),
                    VarKind::Var,
                )));
                Ok(())
            }
            TacOp::Proc | TacOp::Func => self.open_routine(tac),
            TacOp::Begin => self.lower_begin(Self::dst_name(tac)?),
            TacOp::End => self.lower_end(Self::dst_name(tac)?),
            TacOp::Call => self.lower_call(tac),
            TacOp::Read => self.lower_read(Self::dst_name(tac)?, tac.dst().dtype()),
            TacOp::Write => self.lower_write(tac.dst()),
        }
    }

    fn dst_name(tac: &Tac) -> Result<&str> {
        tac.dst()
            .as_name()
            .ok_or_else(|| Error::malformed(tac.op.mnemonic(), "destination must be a name"))
    }

    fn sources(tac: &Tac) -> Result<(&Value, Option<&Value>)> {
        let lhs = tac
            .lhs()
            .ok_or_else(|| Error::malformed(tac.op.mnemonic(), "missing lhs"))?;
        Ok((lhs, tac.rhs()))
    }

    fn out(&mut self) -> &mut AsmOut {
        self.alloc.out_mut()
    }

    // -------------------------------------------------------------------------
    // Operand helpers
    // -------------------------------------------------------------------------

    /// Source operand text: immediate, register, or `dword [..]`
    fn operand(&mut self, value: &Value) -> Result<String> {
        match value {
            Value::Imm { value, .. } => Ok(value.to_string()),
            Value::Name { name, .. } => match self.alloc.resident(name) {
                Some(reg) => Ok(reg.to_string()),
                None => self
                    .alloc
                    .locate(name)?
                    .ok_or_else(|| Error::NoStorage { name: name.clone() }),
            },
        }
    }

    /// Put `value` into `target`
    fn materialize(&mut self, value: &Value, target: Register) -> Result<()> {
        match value {
            Value::Imm { value, .. } => {
                self.out().emit(format!("mov {}, {}", target, value));
            }
            Value::Name { name, .. } => {
                self.alloc.load(name, target)?;
            }
        }
        Ok(())
    }

    /// Temporaries die at their single use
    fn consume(&mut self, value: &Value) {
        if value.is_temporary() {
            if let Some(name) = value.as_name() {
                self.alloc.release(name);
            }
        }
    }

    /// Bind the freshly computed `reg` to `dst` and write variables back
    fn define(&mut self, reg: Register, dst: &str) -> Result<()> {
        self.alloc.release(dst);
        self.alloc.release_register(reg);
        self.alloc.remap(reg, dst);

        let is_variable = !dst.starts_with(super::ir::GENERATED_PREFIX);
        if is_variable && self.alloc.has_slot(dst) {
            self.alloc.store(dst)?;
            self.alloc.release(dst);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Data
    // -------------------------------------------------------------------------

    fn lower_assign(&mut self, dst: &str, src: &Value) -> Result<()> {
        let transferable = src.is_temporary()
            && src
                .as_name()
                .and_then(|n| self.alloc.resident(n))
                .is_some_and(|r| r != Register::SCRATCH);

        let reg = match (transferable, src.as_name()) {
            (true, Some(name)) => match self.alloc.resident(name) {
                Some(reg) => reg,
                None => self.alloc.alloc(ACCUMULATOR)?,
            },
            _ => {
                let reg = self.alloc.alloc(ACCUMULATOR)?;
                self.materialize(src, reg)?;
                reg
            }
        };
        self.consume(src);
        self.define(reg, dst)
    }

    fn lower_arith(&mut self, op: TacOp, dst: &str, lhs: &Value, rhs: &Value) -> Result<()> {
        let mnemonic = match op {
            TacOp::Add => "add",
            TacOp::Sub => "sub",
            _ => "imul",
        };
        let reg = self.alloc.alloc(ACCUMULATOR)?;
        self.materialize(lhs, reg)?;
        let operand = self.operand(rhs)?;
        self.out().emit(format!("{} {}, {}", mnemonic, reg, operand));

        self.consume(lhs);
        self.consume(rhs);
        self.define(reg, dst)
    }

    fn lower_neg(&mut self, dst: &str, src: &Value) -> Result<()> {
        let reg = self.alloc.alloc(ACCUMULATOR)?;
        self.materialize(src, reg)?;
        self.out().emit(format!("neg {}", reg));
        self.consume(src);
        self.define(reg, dst)
    }

    /// `idiv` takes the dividend in `edx:eax` and leaves the quotient in `eax`
    fn lower_div(&mut self, dst: &str, lhs: &Value, rhs: &Value) -> Result<()> {
        // cdq overwrites edx, so nothing may live there until idiv is done
        self.alloc.spill(Register::Edx)?;
        self.alloc.pin(Register::Edx);
        let quotient = self.divide(lhs, rhs);
        self.alloc.unpin(Register::Edx);
        let reg = quotient?;

        self.consume(lhs);
        self.consume(rhs);
        self.define(reg, dst)
    }

    /// Emit `cdq; idiv` with `edx` pinned, leaving the quotient in the
    /// returned register
    fn divide(&mut self, lhs: &Value, rhs: &Value) -> Result<Register> {
        let reg = self.alloc.alloc(ACCUMULATOR)?;
        let divisor = match rhs
            .as_name()
            .and_then(|n| self.alloc.resident(n))
            .filter(|r| *r != Register::SCRATCH)
        {
            Some(resident) => resident,
            None => {
                self.materialize(rhs, reg)?;
                reg
            }
        };

        self.materialize(lhs, Register::Eax)?;
        self.out().emit("cdq");
        self.out().emit(format!("idiv {}", divisor));
        self.out().emit(format!("mov {}, eax", reg));
        Ok(reg)
    }

    // -------------------------------------------------------------------------
    // Control flow
    // -------------------------------------------------------------------------

    fn lower_label(&mut self, n: u32) -> Result<()> {
        self.alloc.spill_all()?;
        self.out().label(jump_label(n));
        let offset = self.alloc.frame_offset();
        self.out().emit(format!("lea esp, [ebp{:+}]", offset));
        Ok(())
    }

    fn lower_branch(&mut self, op: TacOp, target: u32, lhs: &Value, rhs: Option<&Value>) -> Result<()> {
        let cc = condition_code(op)
            .ok_or_else(|| Error::malformed(op.mnemonic(), "not a conditional jump"))?;
        let rhs = rhs.ok_or_else(|| Error::malformed(op.mnemonic(), "missing rhs"))?;
        self.alloc.spill_all()?;

        // rhs first: loading it may walk the static link through eax
        let rhs_operand = match rhs {
            Value::Imm { value, .. } => value.to_string(),
            Value::Name { .. } => {
                self.materialize(rhs, Register::Edx)?;
                Register::Edx.to_string()
            }
        };
        self.materialize(lhs, Register::Eax)?;
        self.out().emit(format!("cmp eax, {}", rhs_operand));
        self.out().emit(format!("{} {}", cc, jump_label(target)));

        self.consume(lhs);
        self.consume(rhs);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Routines
    // -------------------------------------------------------------------------

    fn open_routine(&mut self, tac: &Tac) -> Result<()> {
        let name = Self::dst_name(tac)?.to_string();
        let is_function = tac.op == TacOp::Func;
        let params: Vec<DataType> = tac.args().iter().map(|a| a.value.dtype()).collect();

        let symbol = if is_function {
            Symbol::Function(Function {
                name: name.clone(),
                ret: tac.dst().dtype(),
                params,
            })
        } else {
            Symbol::Procedure(Procedure {
                name: name.clone(),
                params,
            })
        };
        self.symbols.push(symbol);
        self.symbols.tag();
        self.alloc.enter_frame();

        for (index, arg) in tac.args().iter().enumerate() {
            let pname = arg
                .value
                .as_name()
                .ok_or_else(|| Error::malformed(tac.op.mnemonic(), "parameters must be names"))?;
            self.alloc.bind_param(pname, index, arg.by_ref);
            let kind = if arg.by_ref {
                VarKind::RefParam
            } else {
                VarKind::Param
            };
            self.symbols
                .push(Symbol::Variable(Variable::new(pname, arg.value.dtype(), kind)));
        }
        if is_function {
            self.alloc.declare(&name);
        }

        self.open.push(OpenRoutine {
            name,
            is_function,
            begun: false,
        });
        Ok(())
    }

    fn lower_begin(&mut self, name: &str) -> Result<()> {
        match self.open.last_mut() {
            Some(routine) if routine.name == name => routine.begun = true,
            _ => tracing::warn!(routine = name, "begin outside its proc/func"),
        }

        self.out().label(routine_label(name));
        self.out().emit("push ebp");
        self.out().emit("mov ebp, esp");
        let reserved = -self.alloc.frame_offset();
        if reserved > 0 {
            self.out().emit(format!("sub esp, {}", reserved));
        }
        Ok(())
    }

    fn lower_end(&mut self, name: &str) -> Result<()> {
        let routine = match self.open.last() {
            Some(routine) if routine.name == name => routine.clone(),
            _ => return Err(Error::malformed("end", format!("`{}` is not the open routine", name))),
        };
        if !routine.begun {
            tracing::warn!(routine = name, "end without begin");
        }

        if routine.is_function {
            self.alloc.release_all();
            self.alloc.load(name, Register::Eax)?;
        }
        self.out().emit("mov esp, ebp");
        self.out().emit("pop ebp");
        self.out().emit("ret");

        if self.dump_symbols {
            let dump = self.alloc.locations().dump();
            self.out().comment_block(&dump);
        }
        if self.dump_registers {
            let dump = self.alloc.dump();
            self.out().comment_block(&dump);
        }

        let stats = self.alloc.stats();
        tracing::debug!(
            routine = name,
            frame_bytes = -self.alloc.frame_offset(),
            spills = stats.spills,
            reloads = stats.reloads,
            "routine lowered"
        );

        self.alloc.leave_frame();
        self.symbols.detag();
        self.open.pop();
        Ok(())
    }

    fn lower_call(&mut self, tac: &Tac) -> Result<()> {
        let name = Self::dst_name(tac)?;
        let is_routine = self.symbols.find(name, true).is_some_and(Symbol::is_routine);
        let declared = match self.symbols.depth_of(name) {
            Some(depth) if is_routine => depth,
            _ => {
                return Err(Error::UnknownRoutine {
                    name: name.to_string(),
                })
            }
        };

        self.alloc.spill_all()?;
        let word = self.alloc.word_size();
        for arg in tac.args().iter().rev() {
            match (&arg.value, arg.by_ref) {
                (Value::Name { name, .. }, true) => {
                    let addr = self.alloc.addr(name)?;
                    self.out().emit(format!("lea eax, {}", addr));
                    self.out().emit("push eax");
                }
                (value, _) => {
                    let operand = self.operand(value)?;
                    self.out().emit(format!("push {}", operand));
                }
            }
        }

        let distance = self.alloc.depth().saturating_sub(declared);
        let link = self.alloc.frame_at(distance)?;
        self.out().emit(format!("push {}", link));
        self.out().emit(format!("call {}", routine_label(name)));
        let pushed = word * (tac.args().len() as i32 + 1);
        self.out().emit(format!("add esp, {}", pushed));

        for arg in tac.args() {
            self.consume(&arg.value);
        }
        if let Some(result) = tac.extra() {
            let result = result
                .as_name()
                .ok_or_else(|| Error::malformed("call", "result slot must be a name"))?;
            self.take_return_value(result)?;
        }
        Ok(())
    }

    fn take_return_value(&mut self, dst: &str) -> Result<()> {
        let reg = self.alloc.alloc(ACCUMULATOR)?;
        self.alloc.load(RETURN_VALUE, reg)?;
        self.define(reg, dst)
    }

    // -------------------------------------------------------------------------
    // Runtime I/O
    // -------------------------------------------------------------------------

    fn lower_read(&mut self, dst: &str, dtype: DataType) -> Result<()> {
        self.alloc.spill_all()?;
        let routine = match dtype {
            DataType::Integer => runtime::READ_INT,
            DataType::Char => runtime::READ_CHAR,
        };
        self.out().emit(format!("call {}", routine));
        self.take_return_value(dst)
    }

    fn lower_write(&mut self, value: &Value) -> Result<()> {
        self.alloc.spill_all()?;
        let routine = match value.dtype() {
            DataType::Integer => runtime::WRITE_INT,
            DataType::Char => runtime::WRITE_CHAR,
        };
        let operand = self.operand(value)?;
        self.out().emit(format!("push {}", operand));
        self.out().emit(format!("call {}", routine));
        let word = self.alloc.word_size();
        self.out().emit(format!("add esp, {}", word));
        self.consume(value);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Register allocator (bindings, locations, statistics)
    pub fn allocator(&self) -> &SimpleAllocator {
        &self.alloc
    }

    /// Routine and variable descriptors currently in scope
    pub fn symbols(&self) -> &ScopedEnv<Symbol> {
        &self.symbols
    }

    /// Assembly emitted so far
    pub fn output(&self) -> &AsmOut {
        self.alloc.out()
    }

    /// Consume the generator, keeping the listing
    pub fn finish(self) -> AsmOut {
        self.alloc.into_output()
    }
}
