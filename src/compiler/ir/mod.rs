//! # Three-Address Code (TAC) Intermediate Representation
//!
//! The tree-walking generator lowers each statement to a flat, append-only
//! sequence of TAC instructions; the x86 lowering then prints that sequence
//! as assembly, materializing operands through the register allocator.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition, re-exports, listing loader
//! ├── value.rs        # DataType, Value (immediate-or-named operand)
//! ├── instruction.rs  # TacOp, Operands, Arg, Tac, SourceLoc
//! └── builder.rs      # IrBuilder (label/temporary/return-slot counters)
//! ```
//!
//! ## Key Types
//!
//! - [`Value`] - Operand; compares by payload, the type tag is metadata
//! - [`Tac`] - One instruction, either `dst, lhs, rhs` or `dst, args, extra`
//! - [`IrBuilder`] - Owns the instruction stream and the fresh-name counters

mod builder;
mod instruction;
mod value;

pub use builder::IrBuilder;
pub use instruction::{Arg, Operands, SourceLoc, Tac, TacOp};
pub use value::{DataType, Value, GENERATED_PREFIX};

use crate::Result;

/// Load a JSON listing produced by [`IrBuilder::to_json`]
///
/// Every instruction is validated; an unknown operand kind or opcode fails
/// the whole listing.
pub fn parse_listing(json: &str) -> Result<Vec<Tac>> {
    let instructions: Vec<Tac> = serde_json::from_str(json)?;
    for tac in &instructions {
        tac.validate().map_err(|e| e.at(tac.loc))?;
    }
    Ok(instructions)
}
