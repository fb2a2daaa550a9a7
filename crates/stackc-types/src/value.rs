use serde::{Deserialize, Serialize};
use std::fmt;

/// The four value kinds of the source instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    I32,
    I64,
    F32,
    F64,
}

impl ValueKind {
    /// All kinds in declaration order.
    pub const ALL: [ValueKind; 4] = [ValueKind::I32, ValueKind::I64, ValueKind::F32, ValueKind::F64];

    /// Dense index, usable as an array slot.
    pub fn index(self) -> usize {
        match self {
            Self::I32 => 0,
            Self::I64 => 1,
            Self::F32 => 2,
            Self::F64 => 3,
        }
    }

    /// Size of a value of this kind in bytes.
    pub fn byte_width(self) -> u32 {
        match self {
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Mnemonic prefix used in opcode names (`i32`, `f64`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One slot of the abstract operand stack.
///
/// `None` is the wildcard kind, only ever produced while compiling
/// unreachable code.
pub type StackSlot = Option<ValueKind>;

// ══════════════════════════════════════════════════════════════════════════════
// BlockType
// ══════════════════════════════════════════════════════════════════════════════

/// The type a structured block leaves on the stack when control reaches its
/// `end` (or `else`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    #[default]
    Empty,
    Value(ValueKind),
}

impl BlockType {
    /// The value kind carried by the block, if any.
    pub fn kind(self) -> Option<ValueKind> {
        match self {
            Self::Empty => None,
            Self::Value(kind) => Some(kind),
        }
    }

    /// Number of values the block yields (0 or 1).
    pub fn arity(self) -> usize {
        usize::from(self.kind().is_some())
    }
}

impl From<Option<ValueKind>> for BlockType {
    fn from(kind: Option<ValueKind>) -> Self {
        kind.map_or(Self::Empty, Self::Value)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("[]"),
            Self::Value(kind) => write!(f, "[{kind}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_indices_are_unique() {
        let mut seen = [false; 4];
        for kind in ValueKind::ALL {
            assert!(!seen[kind.index()]);
            seen[kind.index()] = true;
        }
    }

    #[test]
    fn block_type_from_optional_kind() {
        assert_eq!(BlockType::from(None), BlockType::Empty);
        assert_eq!(BlockType::from(Some(ValueKind::F32)), BlockType::Value(ValueKind::F32));
        assert_eq!(BlockType::Value(ValueKind::I64).arity(), 1);
        assert_eq!(BlockType::Empty.arity(), 0);
    }

    #[test]
    fn display_names() {
        assert_eq!(ValueKind::F64.to_string(), "f64");
        assert_eq!(BlockType::Value(ValueKind::I32).to_string(), "[i32]");
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&ValueKind::I64).unwrap();
        assert_eq!(json, "\"i64\"");
    }
}
