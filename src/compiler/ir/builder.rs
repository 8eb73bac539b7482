//! IR builder: append-only TAC sequence plus fresh-name counters

use super::instruction::{Arg, Operands, SourceLoc, Tac, TacOp};
use super::value::{Value, GENERATED_PREFIX};
use crate::Result;

/// Builds the linear TAC stream of one compilation unit
///
/// Each builder owns its label, temporary and return-slot counters, so two
/// builders never share state and every minted name is unique within one.
#[derive(Debug, Default, Clone)]
pub struct IrBuilder {
    /// Next label number
    label_counter: u32,
    /// Next temporary number
    temp_counter: u32,
    /// Next return-slot number
    ret_counter: u32,
    /// Location stamped on newly emitted instructions
    current_loc: Option<SourceLoc>,
    /// Emitted instructions, in program order
    instructions: Vec<Tac>,
}

impl IrBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source location stamped on subsequent instructions
    pub fn set_loc(&mut self, loc: Option<SourceLoc>) {
        self.current_loc = loc;
    }

    /// Append a label definition
    pub fn emit_label(&mut self, label: u32) {
        // Saturates past i32::MAX
        let value = i32::try_from(label).unwrap_or(i32::MAX);
        self.instructions.push(Tac {
            op: TacOp::Label,
            operands: Operands::Three {
                dst: Value::imm(value),
                lhs: None,
                rhs: None,
            },
            loc: self.current_loc,
        });
    }

    /// Append a three-address instruction
    pub fn emit(
        &mut self,
        op: TacOp,
        dst: Value,
        lhs: Option<Value>,
        rhs: Option<Value>,
    ) -> Result<()> {
        let tac = Tac::three(op, dst, lhs, rhs)
            .map_err(|e| e.at(self.current_loc))?
            .with_loc(self.current_loc);
        self.instructions.push(tac);
        Ok(())
    }

    /// Append a call-style instruction
    pub fn emit_call(
        &mut self,
        op: TacOp,
        dst: Value,
        args: Vec<Arg>,
        extra: Option<Value>,
    ) -> Result<()> {
        let tac = Tac::list(op, dst, args, extra)
            .map_err(|e| e.at(self.current_loc))?
            .with_loc(self.current_loc);
        self.instructions.push(tac);
        Ok(())
    }

    /// Append an already-built instruction (validated again)
    pub fn emit_tac(&mut self, tac: Tac) -> Result<()> {
        tac.validate().map_err(|e| e.at(tac.loc))?;
        self.instructions.push(tac);
        Ok(())
    }

    /// Fresh label number
    pub fn make_label(&mut self) -> u32 {
        let label = self.label_counter;
        self.label_counter += 1;
        label
    }

    /// Fresh temporary name (`~t<n>`)
    pub fn make_temp(&mut self) -> String {
        let name = format!("{}t{}", GENERATED_PREFIX, self.temp_counter);
        self.temp_counter += 1;
        name
    }

    /// Fresh return-slot name (`~r<n>`)
    pub fn make_return_slot(&mut self) -> String {
        let name = format!("{}r{}", GENERATED_PREFIX, self.ret_counter);
        self.ret_counter += 1;
        name
    }

    /// Emitted instructions
    pub fn instructions(&self) -> &[Tac] {
        &self.instructions
    }

    /// Consume the builder, keeping the instructions
    pub fn into_instructions(self) -> Vec<Tac> {
        self.instructions
    }

    /// Number of emitted instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True if nothing was emitted
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Render the stream, one self-contained line per instruction
    pub fn dump(&self) -> String {
        crate::compiler::debug::format_tac_listing(&self.instructions)
    }

    /// Serialize the stream as a JSON listing
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.instructions)?)
    }
}
