//! Symbol descriptors and storage locations

use super::env::Named;
use super::ir::DataType;
use std::fmt;

/// How a variable was introduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Declared with `var`
    Var,
    /// By-value parameter
    Param,
    /// By-reference (`var`) parameter
    RefParam,
}

impl VarKind {
    fn as_str(&self) -> &'static str {
        match self {
            VarKind::Var => "variable",
            VarKind::Param => "parameter",
            VarKind::RefParam => "reference",
        }
    }
}

/// Variable or parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Name
    pub name: String,
    /// Element type
    pub dtype: DataType,
    /// Declaration kind
    pub kind: VarKind,
}

impl Variable {
    /// Scalar variable
    pub fn new(name: impl Into<String>, dtype: DataType, kind: VarKind) -> Self {
        Self {
            name: name.into(),
            dtype,
            kind,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind.as_str(), self.name, self.dtype)
    }
}

/// Procedure signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    /// Name
    pub name: String,
    /// Parameter types, in order
    pub params: Vec<DataType>,
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ::", self.name)?;
        for p in &self.params {
            write!(f, " {} ->", p)?;
        }
        Ok(())
    }
}

/// Function signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Name
    pub name: String,
    /// Return type
    pub ret: DataType,
    /// Parameter types, in order
    pub params: Vec<DataType>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ::", self.name)?;
        for p in &self.params {
            write!(f, " {} ->", p)?;
        }
        write!(f, " {}", self.ret)
    }
}

/// Any compile-time symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    /// Variable or parameter
    Variable(Variable),
    /// Procedure
    Procedure(Procedure),
    /// Function
    Function(Function),
}

impl Symbol {
    /// True for procedures and functions
    pub fn is_routine(&self) -> bool {
        matches!(self, Symbol::Procedure(_) | Symbol::Function(_))
    }

    /// Return type, for functions
    pub fn return_type(&self) -> Option<DataType> {
        match self {
            Symbol::Function(func) => Some(func.ret),
            _ => None,
        }
    }
}

impl Named for Symbol {
    fn name(&self) -> &str {
        match self {
            Symbol::Variable(v) => &v.name,
            Symbol::Procedure(p) => &p.name,
            Symbol::Function(f) => &f.name,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Variable(v) => v.fmt(f),
            Symbol::Procedure(p) => p.fmt(f),
            Symbol::Function(func) => func.fmt(f),
        }
    }
}

/// Storage location of a name in its activation record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loc {
    /// Name
    pub name: String,
    /// Byte offset from the frame pointer
    pub offset: i32,
    /// The slot holds the address of the value (by-reference parameter)
    pub is_ref: bool,
    /// The current value lives in the slot rather than a register
    pub in_mem: bool,
}

impl Loc {
    /// Slot at `offset` holding the value itself
    pub fn new(name: impl Into<String>, offset: i32) -> Self {
        Self {
            name: name.into(),
            offset,
            is_ref: false,
            in_mem: false,
        }
    }

    /// Slot at `offset` holding the address of the value
    pub fn reference(name: impl Into<String>, offset: i32) -> Self {
        Self {
            is_ref: true,
            ..Self::new(name, offset)
        }
    }

    /// Offset with an explicit sign, ready to splice into `[ebp..]`
    pub fn signed_offset(&self) -> String {
        format!("{:+}", self.offset)
    }
}

/// Storage is looked up by exact name, so `x` never resolves to `my_x`'s slot
impl Named for Loc {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, query: &str) -> bool {
        self.name == query
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} is_ref: {} in_mem: {}",
            self.name,
            self.signed_offset(),
            u8::from(self.is_ref),
            u8::from(self.in_mem)
        )
    }
}
