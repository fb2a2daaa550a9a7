//! Target operations.
//!
//! The target is a typed stack machine with explicit jumps. Operands live on
//! the machine's own stack; jumps leave the stack untouched, so the context
//! unwinds surplus operands before a branch that needs it. `Return` takes the
//! function results from the top of the stack and discards anything below.

use serde::{Deserialize, Serialize};
use stackc_types::{CallTarget, ValueKind};
use std::fmt;

use crate::emitter::{HelperHandle, Label, LocalSlot};
use crate::ops::{BinaryOp, CompareOp, ConvertOp, LoadOp, StoreOp, UnaryOp};

/// Reasons the target machine can abort execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapCode {
    /// An `unreachable` instruction was executed.
    Unreachable,
    /// A float-to-integer conversion received NaN.
    InvalidConversion,
    /// A float-to-integer conversion received an out-of-range value.
    IntegerOverflow,
}

/// A literal operand. Floats are carried as raw bit patterns so NaN payloads
/// survive serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
}

impl Literal {
    pub fn kind(self) -> ValueKind {
        match self {
            Self::I32(_) => ValueKind::I32,
            Self::I64(_) => ValueKind::I64,
            Self::F32(_) => ValueKind::F32,
            Self::F64(_) => ValueKind::F64,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "i32 {v}"),
            Self::I64(v) => write!(f, "i64 {v}"),
            Self::F32(bits) => write!(f, "f32 {}", f32::from_bits(*bits)),
            Self::F64(bits) => write!(f, "f64 {}", f64::from_bits(*bits)),
        }
    }
}

/// One operation of the target machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOp {
    Nop,
    Trap(TrapCode),
    Jump(Label),
    /// Pops an `i32`; jumps when it is zero.
    JumpIfZero(Label),
    /// Pops an `i32`; jumps when it is non-zero.
    JumpIfNonZero(Label),
    /// Pops an `i32` index; jumps to `targets[index]` or to `default`.
    JumpTable {
        targets: Vec<Label>,
        default: Label,
    },
    Return,
    Call(CallTarget),
    /// Pops a table index, then calls through the module table.
    CallIndirect {
        type_index: u32,
    },
    CallHelper(HelperHandle),
    Drop,
    Dup,
    Select,
    LoadArg(u32),
    StoreArg(u32),
    LoadLocal(LocalSlot),
    StoreLocal(LocalSlot),
    LoadGlobal(u32),
    StoreGlobal(u32),
    Load {
        op: LoadOp,
        offset: u64,
    },
    Store {
        op: StoreOp,
        offset: u64,
    },
    MemorySize,
    MemoryGrow,
    Const(Literal),
    Eqz(ValueKind),
    Unary(ValueKind, UnaryOp),
    Binary(ValueKind, BinaryOp),
    Compare(ValueKind, CompareOp),
    Convert(ConvertOp),
}

impl TargetOp {
    /// Labels this operation may transfer control to.
    pub fn jump_targets(&self) -> Vec<Label> {
        match self {
            Self::Jump(label) | Self::JumpIfZero(label) | Self::JumpIfNonZero(label) => vec![*label],
            Self::JumpTable { targets, default } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for TargetOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "nop"),
            Self::Trap(code) => write!(f, "trap {code:?}"),
            Self::Jump(label) => write!(f, "jump {label}"),
            Self::JumpIfZero(label) => write!(f, "jump_if_zero {label}"),
            Self::JumpIfNonZero(label) => write!(f, "jump_if_non_zero {label}"),
            Self::JumpTable { targets, default } => {
                let names: Vec<String> = targets.iter().map(Label::to_string).collect();
                write!(f, "jump_table [{}] {default}", names.join(" "))
            }
            Self::Return => write!(f, "return"),
            Self::Call(CallTarget::Import(index)) => write!(f, "call import{index}"),
            Self::Call(CallTarget::Defined(index)) => write!(f, "call func{index}"),
            Self::CallIndirect { type_index } => write!(f, "call_indirect type{type_index}"),
            Self::CallHelper(handle) => write!(f, "call {handle}"),
            Self::Drop => write!(f, "drop"),
            Self::Dup => write!(f, "dup"),
            Self::Select => write!(f, "select"),
            Self::LoadArg(index) => write!(f, "load arg{index}"),
            Self::StoreArg(index) => write!(f, "store arg{index}"),
            Self::LoadLocal(slot) => write!(f, "load {slot}"),
            Self::StoreLocal(slot) => write!(f, "store {slot}"),
            Self::LoadGlobal(index) => write!(f, "load global{index}"),
            Self::StoreGlobal(index) => write!(f, "store global{index}"),
            Self::Load { op, offset } => write!(f, "{} +{offset}", op.name()),
            Self::Store { op, offset } => write!(f, "{} +{offset}", op.name()),
            Self::MemorySize => write!(f, "memory.size"),
            Self::MemoryGrow => write!(f, "memory.grow"),
            Self::Const(literal) => write!(f, "const {literal}"),
            Self::Eqz(kind) => write!(f, "{kind}.eqz"),
            Self::Unary(kind, op) => write!(f, "{kind}.{}", op.name()),
            Self::Binary(kind, op) => write!(f, "{kind}.{}", op.name()),
            Self::Compare(kind, op) => write!(f, "{kind}.{}", op.name()),
            Self::Convert(op) => write!(f, "{}", op.name()),
        }
    }
}
