//! Operands of three-address code

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Prefix shared by every compiler-generated name (temporaries, return slots)
pub const GENERATED_PREFIX: char = '~';

/// Primitive data type of an operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 32-bit signed integer
    #[default]
    Integer,
    /// Character, stored in a full machine word
    Char,
}

impl DataType {
    /// Parses a type from its source spelling (`integer` / `char`)
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "integer" => Ok(DataType::Integer),
            "char" => Ok(DataType::Char),
            _ => Err(Error::UnknownType {
                name: s.to_string(),
            }),
        }
    }

    /// Source spelling of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Char => "char",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TAC operand: an immediate or a named value
///
/// Equality, ordering and hashing look only at the payload; the data type is
/// metadata carried along for the code generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Value {
    /// Integer immediate
    Imm {
        /// Immediate value
        value: i32,
        /// Declared type
        #[serde(default)]
        dtype: DataType,
    },
    /// Variable, temporary, routine or return slot, by name
    Name {
        /// Name key
        name: String,
        /// Declared type
        #[serde(default)]
        dtype: DataType,
    },
}

impl Value {
    /// Integer immediate
    pub fn imm(value: i32) -> Self {
        Value::Imm {
            value,
            dtype: DataType::Integer,
        }
    }

    /// Character immediate
    pub fn char(c: char) -> Self {
        Value::Imm {
            value: c as i32,
            dtype: DataType::Char,
        }
    }

    /// Named integer operand
    pub fn name(name: impl Into<String>) -> Self {
        Value::Name {
            name: name.into(),
            dtype: DataType::Integer,
        }
    }

    /// Named operand with an explicit type
    pub fn typed(name: impl Into<String>, dtype: DataType) -> Self {
        Value::Name {
            name: name.into(),
            dtype,
        }
    }

    /// Builds an operand from textual parts, validating the kind tag
    ///
    /// `kind` is `imm` or `name`; anything else is fatal.
    pub fn from_raw(kind: &str, payload: &str, dtype: &str) -> Result<Self> {
        let dtype = DataType::parse(dtype)?;
        match kind {
            "imm" => payload
                .parse::<i32>()
                .map(|value| Value::Imm { value, dtype })
                .map_err(|_| Error::MalformedOperand {
                    kind: format!("imm {}", payload),
                }),
            "name" if !payload.is_empty() => Ok(Value::Name {
                name: payload.to_string(),
                dtype,
            }),
            _ => Err(Error::MalformedOperand {
                kind: kind.to_string(),
            }),
        }
    }

    /// Declared type
    pub fn dtype(&self) -> DataType {
        match self {
            Value::Imm { dtype, .. } | Value::Name { dtype, .. } => *dtype,
        }
    }

    /// Immediate payload, if any
    pub fn as_imm(&self) -> Option<i32> {
        match self {
            Value::Imm { value, .. } => Some(*value),
            Value::Name { .. } => None,
        }
    }

    /// Name payload, if any
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Name { name, .. } => Some(name),
            Value::Imm { .. } => None,
        }
    }

    /// True for names minted by the IR builder
    pub fn is_temporary(&self) -> bool {
        self.as_name()
            .is_some_and(|n| n.starts_with(GENERATED_PREFIX))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Imm { value: a, .. }, Value::Imm { value: b, .. }) => a.cmp(b),
            (Value::Name { name: a, .. }, Value::Name { name: b, .. }) => a.cmp(b),
            (Value::Imm { .. }, Value::Name { .. }) => Ordering::Less,
            (Value::Name { .. }, Value::Imm { .. }) => Ordering::Greater,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Imm { value, .. } => {
                0u8.hash(state);
                value.hash(state);
            }
            Value::Name { name, .. } => {
                1u8.hash(state);
                name.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Imm { value, .. } => write!(f, "{}", value),
            Value::Name { name, .. } => f.write_str(name),
        }
    }
}
