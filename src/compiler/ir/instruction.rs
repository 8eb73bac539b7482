//! TAC instruction definitions

use super::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source position (line, column) of the construct an instruction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLoc {
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub col: u32,
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Operation of a TAC instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TacOp {
    // Control flow
    /// Label definition: dst = label number
    Label,
    /// Unconditional jump to label dst
    Jmp,
    /// Jump to dst if lhs < rhs
    Jlt,
    /// Jump to dst if lhs <= rhs
    Jle,
    /// Jump to dst if lhs > rhs
    Jgt,
    /// Jump to dst if lhs >= rhs
    Jge,
    /// Jump to dst if lhs == rhs
    Jeq,
    /// Jump to dst if lhs != rhs
    Jne,

    // Data
    /// dst = lhs
    Assign,
    /// dst = lhs + rhs
    Add,
    /// dst = lhs - rhs
    Sub,
    /// dst = lhs * rhs
    Mul,
    /// dst = lhs / rhs (truncating)
    Div,
    /// dst = -lhs
    Neg,

    // Declarations and frames
    /// Reserve a slot for variable dst in the current frame
    Var,
    /// Open procedure dst; args are its parameters
    Proc,
    /// Open function dst (typed by its return type); args are its parameters
    Func,
    /// Entry label and prologue of routine dst
    Begin,
    /// Epilogue of routine dst; closes the scope opened by proc/func
    End,
    /// Call routine dst with args, result (functions only) into extra
    Call,

    // Runtime I/O
    /// Read a value into dst
    Read,
    /// Write the value of dst
    Write,
}

impl TacOp {
    /// Every opcode, in declaration order
    pub const ALL: [TacOp; 22] = [
        TacOp::Label,
        TacOp::Jmp,
        TacOp::Jlt,
        TacOp::Jle,
        TacOp::Jgt,
        TacOp::Jge,
        TacOp::Jeq,
        TacOp::Jne,
        TacOp::Assign,
        TacOp::Add,
        TacOp::Sub,
        TacOp::Mul,
        TacOp::Div,
        TacOp::Neg,
        TacOp::Var,
        TacOp::Proc,
        TacOp::Func,
        TacOp::Begin,
        TacOp::End,
        TacOp::Call,
        TacOp::Read,
        TacOp::Write,
    ];

    /// Textual mnemonic
    pub fn mnemonic(&self) -> &'static str {
        match self {
            TacOp::Label => "label",
            TacOp::Jmp => "jmp",
            TacOp::Jlt => "jlt",
            TacOp::Jle => "jle",
            TacOp::Jgt => "jgt",
            TacOp::Jge => "jge",
            TacOp::Jeq => "jeq",
            TacOp::Jne => "jne",
            TacOp::Assign => "assign",
            TacOp::Add => "add",
            TacOp::Sub => "sub",
            TacOp::Mul => "mul",
            TacOp::Div => "div",
            TacOp::Neg => "neg",
            TacOp::Var => "var",
            TacOp::Proc => "proc",
            TacOp::Func => "func",
            TacOp::Begin => "begin",
            TacOp::End => "end",
            TacOp::Call => "call",
            TacOp::Read => "read",
            TacOp::Write => "write",
        }
    }

    /// Parses a mnemonic
    pub fn from_mnemonic(s: &str) -> Result<Self> {
        TacOp::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic() == s)
            .ok_or_else(|| Error::UnknownMnemonic {
                mnemonic: s.to_string(),
            })
    }

    /// True for ops whose payload is an argument list
    pub fn takes_arg_list(&self) -> bool {
        matches!(self, TacOp::Call | TacOp::Proc | TacOp::Func)
    }

    /// True for compare-and-branch ops
    pub fn is_conditional_jump(&self) -> bool {
        matches!(
            self,
            TacOp::Jlt | TacOp::Jle | TacOp::Jgt | TacOp::Jge | TacOp::Jeq | TacOp::Jne
        )
    }

    /// Number of source operands a three-address op requires
    pub fn source_arity(&self) -> usize {
        match self {
            TacOp::Add | TacOp::Sub | TacOp::Mul | TacOp::Div => 2,
            op if op.is_conditional_jump() => 2,
            TacOp::Assign | TacOp::Neg => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for TacOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Argument of a call-style instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arg {
    /// Argument value (or, for by-reference passing, the variable)
    pub value: Value,
    /// Pass the address instead of the value
    #[serde(default)]
    pub by_ref: bool,
}

impl Arg {
    /// By-value argument
    pub fn val(value: Value) -> Self {
        Self {
            value,
            by_ref: false,
        }
    }

    /// By-reference argument
    pub fn by_ref(value: Value) -> Self {
        Self {
            value,
            by_ref: true,
        }
    }
}

/// Operand payload: exactly one of the two shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum Operands {
    /// dst, lhs, rhs
    Three {
        /// Destination (or label / routine name)
        dst: Value,
        /// Left source
        #[serde(default)]
        lhs: Option<Value>,
        /// Right source
        #[serde(default)]
        rhs: Option<Value>,
    },
    /// dst plus an ordered argument list (call-style ops)
    List {
        /// Routine name
        dst: Value,
        /// Arguments or parameters
        args: Vec<Arg>,
        /// Result slot (calls to functions)
        #[serde(default)]
        extra: Option<Value>,
    },
}

/// Three-address code instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tac {
    /// Operation
    pub op: TacOp,
    /// Operand payload
    pub operands: Operands,
    /// Source position, when known
    #[serde(default)]
    pub loc: Option<SourceLoc>,
}

impl Tac {
    /// Three-address instruction, validated against the op
    pub fn three(op: TacOp, dst: Value, lhs: Option<Value>, rhs: Option<Value>) -> Result<Self> {
        let tac = Self {
            op,
            operands: Operands::Three { dst, lhs, rhs },
            loc: None,
        };
        tac.validate()?;
        Ok(tac)
    }

    /// Call-style instruction, validated against the op
    pub fn list(op: TacOp, dst: Value, args: Vec<Arg>, extra: Option<Value>) -> Result<Self> {
        let tac = Self {
            op,
            operands: Operands::List { dst, args, extra },
            loc: None,
        };
        tac.validate()?;
        Ok(tac)
    }

    /// Same instruction stamped with a source location
    pub fn with_loc(mut self, loc: Option<SourceLoc>) -> Self {
        self.loc = loc;
        self
    }

    /// Destination operand (present in both shapes)
    pub fn dst(&self) -> &Value {
        match &self.operands {
            Operands::Three { dst, .. } | Operands::List { dst, .. } => dst,
        }
    }

    /// Left source operand (three-address shape only)
    pub fn lhs(&self) -> Option<&Value> {
        match &self.operands {
            Operands::Three { lhs, .. } => lhs.as_ref(),
            Operands::List { .. } => None,
        }
    }

    /// Right source operand (three-address shape only)
    pub fn rhs(&self) -> Option<&Value> {
        match &self.operands {
            Operands::Three { rhs, .. } => rhs.as_ref(),
            Operands::List { .. } => None,
        }
    }

    /// Argument list (call shape only; empty otherwise)
    pub fn args(&self) -> &[Arg] {
        match &self.operands {
            Operands::List { args, .. } => args,
            Operands::Three { .. } => &[],
        }
    }

    /// Result slot of a call
    pub fn extra(&self) -> Option<&Value> {
        match &self.operands {
            Operands::List { extra, .. } => extra.as_ref(),
            Operands::Three { .. } => None,
        }
    }

    /// Label number carried in dst (label and jump ops)
    pub fn label(&self) -> Result<u32> {
        self.dst()
            .as_imm()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| Error::malformed(self.op.mnemonic(), "target must be a label number"))
    }

    /// Checks the operand shape against the op
    pub fn validate(&self) -> Result<()> {
        let op = self.op.mnemonic();
        match (&self.operands, self.op.takes_arg_list()) {
            (Operands::List { .. }, false) => {
                return Err(Error::malformed(op, "argument list on a three-address op"))
            }
            (Operands::Three { .. }, true) => {
                return Err(Error::malformed(op, "call-style op needs an argument list"))
            }
            _ => {}
        }

        if let Operands::Three { dst, lhs, rhs } = &self.operands {
            let arity = self.op.source_arity();
            let given = usize::from(lhs.is_some()) + usize::from(rhs.is_some());
            if given != arity || (arity == 1 && lhs.is_none()) {
                return Err(Error::malformed(
                    op,
                    format!("expected {} source operand(s), got {}", arity, given),
                ));
            }
            let needs_name = !matches!(
                self.op,
                TacOp::Label | TacOp::Jmp | TacOp::Write
            ) && !self.op.is_conditional_jump();
            if needs_name && dst.as_name().is_none() {
                return Err(Error::malformed(op, "destination must be a name"));
            }
        }

        match self.op {
            TacOp::Label | TacOp::Jmp => {
                self.label()?;
            }
            op if op.is_conditional_jump() => {
                self.label()?;
            }
            TacOp::Call | TacOp::Proc | TacOp::Func => {
                if self.dst().as_name().is_none() {
                    return Err(Error::malformed(op, "routine must be named"));
                }
                if self.op != TacOp::Call {
                    if self.args().iter().any(|a| a.value.as_name().is_none()) {
                        return Err(Error::malformed(op, "parameters must be names"));
                    }
                    if self.extra().is_some() {
                        return Err(Error::malformed(op, "declarations have no result slot"));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Display for Tac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operands {
            Operands::Three { dst, lhs, rhs } => {
                match self.op {
                    TacOp::Label => return write!(f, "label L{}", dst),
                    TacOp::Jmp => return write!(f, "jmp L{}", dst),
                    op if op.is_conditional_jump() => {
                        write!(f, "{} L{}", op, dst)?;
                    }
                    op => write!(f, "{} {}", op, dst)?,
                }
                for src in [lhs, rhs].into_iter().flatten() {
                    write!(f, ", {}", src)?;
                }
                Ok(())
            }
            Operands::List { dst, args, extra } => {
                write!(f, "{} {}(", self.op, dst)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if arg.by_ref {
                        f.write_str("&")?;
                    }
                    write!(f, "{}", arg.value)?;
                }
                f.write_str(")")?;
                if let Some(extra) = extra {
                    write!(f, " -> {}", extra)?;
                }
                if self.op == TacOp::Func {
                    write!(f, " : {}", dst.dtype())?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonic_round_trip() {
        for op in TacOp::ALL {
            assert_eq!(TacOp::from_mnemonic(op.mnemonic()).unwrap(), op);
        }
        assert!(matches!(
            TacOp::from_mnemonic("lea"),
            Err(Error::UnknownMnemonic { .. })
        ));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let err = Tac::list(TacOp::Add, Value::name("x"), vec![], None).unwrap_err();
        assert!(matches!(err, Error::MalformedInstruction { .. }));

        let err = Tac::three(TacOp::Call, Value::name("p"), None, None).unwrap_err();
        assert!(matches!(err, Error::MalformedInstruction { .. }));
    }

    #[test]
    fn test_arity_is_checked() {
        assert!(Tac::three(TacOp::Add, Value::name("t"), Some(Value::imm(1)), None).is_err());
        assert!(Tac::three(TacOp::Assign, Value::name("t"), None, Some(Value::imm(1))).is_err());
        assert!(Tac::three(TacOp::Neg, Value::name("t"), Some(Value::name("a")), None).is_ok());
    }

    #[test]
    fn test_jump_target_must_be_label() {
        assert!(Tac::three(TacOp::Jmp, Value::name("L1"), None, None).is_err());
        assert!(Tac::three(
            TacOp::Jlt,
            Value::imm(-1),
            Some(Value::imm(1)),
            Some(Value::imm(2))
        )
        .is_err());
        assert!(Tac::three(TacOp::Jmp, Value::imm(4), None, None).is_ok());
    }

    #[test]
    fn test_display() {
        let add = Tac::three(
            TacOp::Add,
            Value::name("~t0"),
            Some(Value::name("a")),
            Some(Value::imm(1)),
        )
        .unwrap();
        assert_eq!(add.to_string(), "add ~t0, a, 1");

        let call = Tac::list(
            TacOp::Call,
            Value::name("swap"),
            vec![Arg::by_ref(Value::name("x")), Arg::val(Value::imm(2))],
            Some(Value::name("~r0")),
        )
        .unwrap();
        assert_eq!(call.to_string(), "call swap(&x, 2) -> ~r0");

        let jge = Tac::three(
            TacOp::Jge,
            Value::imm(3),
            Some(Value::name("i")),
            Some(Value::imm(10)),
        )
        .unwrap();
        assert_eq!(jge.to_string(), "jge L3, i, 10");
    }
}
