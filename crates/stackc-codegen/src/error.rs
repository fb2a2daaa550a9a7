//! Codegen error types.

use serde::{Deserialize, Serialize};
use stackc_types::ValueKind;
use std::fmt;
use thiserror::Error;

/// Index spaces an instruction immediate can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSpace {
    Local,
    Global,
    Function,
    Type,
}

impl fmt::Display for IndexSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Global => write!(f, "global"),
            Self::Function => write!(f, "function"),
            Self::Type => write!(f, "type"),
        }
    }
}

/// Broad grouping of codegen errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Operand count or operand kind violations.
    Stack,
    /// Block, label or function-body structure violations.
    Control,
    /// References to module entities that are missing or misused.
    Module,
    /// Inconsistencies inside the emitted target code.
    Emission,
}

/// Errors that abort the compilation of a single function.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum CodegenError {
    /// A reachable instruction needed more operands than the block holds.
    #[error("{opcode}: stack underflow, expected {expected} operand(s)")]
    StackUnderflow { opcode: String, expected: usize },

    /// An operand's kind differs from the kind the instruction or block requires.
    #[error("{opcode}: stack type mismatch, expected {expected}, found {actual}")]
    StackTypeMismatch {
        opcode: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// Operands were left over at a block boundary.
    #[error("{opcode}: expected stack height {expected} at block boundary, found {actual}")]
    StackHeightMismatch {
        opcode: String,
        expected: usize,
        actual: usize,
    },

    /// Depth or label bookkeeping is inconsistent with the instruction stream.
    #[error("{opcode}: invalid control state: {reason}")]
    InvalidControlState { opcode: String, reason: String },

    /// An immediate names an entity the function or module does not have.
    #[error("{opcode}: {space} index {index} out of range")]
    IndexOutOfRange {
        opcode: String,
        space: IndexSpace,
        index: u32,
    },

    /// A memory instruction was used in a module without linear memory.
    #[error("{opcode}: module declares no linear memory")]
    MissingMemory { opcode: String },

    /// An indirect call was used in a module without a table.
    #[error("{opcode}: module declares no table")]
    MissingTable { opcode: String },

    /// `global.set` on an immutable global.
    #[error("{opcode}: global {index} is immutable")]
    ImmutableGlobal { opcode: String, index: u32 },

    /// A memory access declares more than its natural alignment.
    #[error("{opcode}: alignment 2^{align} exceeds natural alignment of {natural} byte(s)")]
    InvalidAlignment {
        opcode: String,
        align: u32,
        natural: u32,
    },

    /// A numeric operator was paired with a kind it is not defined for.
    #[error("{opcode}: operator is not defined for its operand kind")]
    UnsupportedOperator { opcode: String },

    /// Target code jumps to a label that was never marked.
    #[error("label L{label} is referenced but never marked")]
    UnresolvedLabel { label: u32 },
}

impl CodegenError {
    /// Shorthand for [`CodegenError::InvalidControlState`].
    pub fn control(opcode: &str, reason: impl Into<String>) -> Self {
        Self::InvalidControlState {
            opcode: opcode.to_string(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StackUnderflow { .. }
            | Self::StackTypeMismatch { .. }
            | Self::StackHeightMismatch { .. } => ErrorCategory::Stack,
            Self::InvalidControlState { .. } => ErrorCategory::Control,
            Self::IndexOutOfRange { .. }
            | Self::MissingMemory { .. }
            | Self::MissingTable { .. }
            | Self::ImmutableGlobal { .. }
            | Self::InvalidAlignment { .. }
            | Self::UnsupportedOperator { .. } => ErrorCategory::Module,
            Self::UnresolvedLabel { .. } => ErrorCategory::Emission,
        }
    }
}

/// Codegen result type alias.
pub type CodegenResult<T> = Result<T, CodegenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_opcode() {
        let err = CodegenError::StackTypeMismatch {
            opcode: "i32.add".into(),
            expected: ValueKind::I32,
            actual: ValueKind::F64,
        };
        assert_eq!(
            err.to_string(),
            "i32.add: stack type mismatch, expected i32, found f64"
        );
        assert_eq!(err.category(), ErrorCategory::Stack);
    }

    #[test]
    fn control_shorthand() {
        let err = CodegenError::control("else", "else without matching if");
        assert_eq!(err.category(), ErrorCategory::Control);
        assert!(err.to_string().contains("else without matching if"));
    }

    #[test]
    fn json_is_tagged() {
        let err = CodegenError::StackUnderflow {
            opcode: "drop".into(),
            expected: 1,
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"error\":\"stack_underflow\""));
        let back: CodegenError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
