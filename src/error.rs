//! Error types for the pl0c backend

use crate::compiler::ir::SourceLoc;
use thiserror::Error;

/// Backend errors
///
/// Every variant is fatal for the compilation pass: the partially emitted
/// instruction stream is discarded by the caller. Name lookups that find
/// nothing are not errors; they are reported through `Option`/`bool`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // IR construction errors
    /// Operand built from a kind tag the IR does not know
    ///
    /// **Triggered by:** `Value::from_raw("str", ..)` or an immediate payload
    /// that is not a 32-bit integer
    #[error("Malformed operand: unknown kind or payload `{kind}`")]
    MalformedOperand {
        /// Offending kind tag (and payload, when the payload is the problem)
        kind: String,
    },

    /// Unknown TAC mnemonic
    #[error("Unknown TAC mnemonic: {mnemonic}")]
    UnknownMnemonic {
        /// Text that failed to parse
        mnemonic: String,
    },

    /// Unknown primitive type name (only `integer` and `char` exist)
    #[error("Unknown primitive type: {name}")]
    UnknownType {
        /// Type name as written
        name: String,
    },

    /// Instruction whose operand shape does not match its opcode
    ///
    /// **Triggered by:** passing an argument list to a three-address op, a
    /// non-immediate jump target, a missing source operand, etc.
    #[error("Malformed instruction `{op}`: {reason}")]
    MalformedInstruction {
        /// Opcode mnemonic
        op: String,
        /// What is wrong with it
        reason: String,
    },

    /// JSON listing could not be decoded into TAC
    #[error("Invalid IR listing: {0}")]
    InvalidListing(String),

    // Lowering errors
    /// Address requested for a name that has no stack slot
    #[error("No storage location for `{name}`")]
    NoStorage {
        /// Name without a location
        name: String,
    },

    /// Every allocatable register is pinned
    #[error("No allocatable register left")]
    NoFreeRegister,

    /// `eax` is needed as scratch but its occupant cannot be moved
    ///
    /// **Triggered by:** binding `eax` with `remap` while every other
    /// register holds a name that is itself only reachable through `eax`
    #[error("Scratch register holds `{name}` and no register can take it")]
    ScratchBusy {
        /// Name bound to `eax`
        name: String,
    },

    /// Call to a routine that was never opened with `proc`/`func`
    #[error("Call to unknown routine `{name}`")]
    UnknownRoutine {
        /// Routine name
        name: String,
    },

    /// Invalid compile options
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error annotated with the source location of the TAC that caused it
    #[error("{loc}: {source}")]
    Located {
        /// Source position of the failing instruction
        loc: SourceLoc,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a malformed-instruction error
    pub fn malformed(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedInstruction {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Attach a source location, if one is known
    pub fn at(self, loc: Option<SourceLoc>) -> Self {
        match (loc, self) {
            (_, located @ Error::Located { .. }) => located,
            (Some(loc), err) => Error::Located {
                loc,
                source: Box::new(err),
            },
            (None, err) => err,
        }
    }

    /// Strip any location wrapper and return the underlying error
    pub fn root(&self) -> &Error {
        match self {
            Error::Located { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidListing(err.to_string())
    }
}

/// Result type for pl0c operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_located_wraps_once() {
        let loc = SourceLoc { line: 3, col: 7 };
        let err = Error::NoStorage {
            name: "x".to_string(),
        }
        .at(Some(loc))
        .at(Some(SourceLoc { line: 9, col: 1 }));

        assert_eq!(err.to_string(), "3:7: No storage location for `x`");
        assert!(matches!(err.root(), Error::NoStorage { .. }));
    }

    #[test]
    fn test_at_without_location_is_identity() {
        let err = Error::malformed("jmp", "target must be a label");
        assert_eq!(err.clone().at(None), err);
    }
}
