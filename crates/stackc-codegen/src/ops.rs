//! Operator tables shared by source instructions and target operations.
//!
//! Each numeric family is a fieldless operator paired with the operand kind
//! at the use site, so `i32.add` and `f64.add` share [`BinaryOp::Add`].

use serde::{Deserialize, Serialize};
use stackc_types::ValueKind;

// ══════════════════════════════════════════════════════════════════════════════
// Memory access
// ══════════════════════════════════════════════════════════════════════════════

/// Immediates of a memory access: alignment exponent and static byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemArg {
    /// Alignment as a power of two (`2^align` bytes).
    pub align: u32,
    pub offset: u64,
}

impl MemArg {
    pub fn new(align: u32, offset: u64) -> Self {
        Self { align, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOp {
    I32Load,
    I64Load,
    F32Load,
    F64Load,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I64Load8S,
    I64Load8U,
    I64Load16S,
    I64Load16U,
    I64Load32S,
    I64Load32U,
}

impl LoadOp {
    /// Kind pushed by the load.
    pub fn result(self) -> ValueKind {
        match self {
            Self::I32Load | Self::I32Load8S | Self::I32Load8U | Self::I32Load16S | Self::I32Load16U => {
                ValueKind::I32
            }
            Self::I64Load
            | Self::I64Load8S
            | Self::I64Load8U
            | Self::I64Load16S
            | Self::I64Load16U
            | Self::I64Load32S
            | Self::I64Load32U => ValueKind::I64,
            Self::F32Load => ValueKind::F32,
            Self::F64Load => ValueKind::F64,
        }
    }

    /// Bytes read from memory.
    pub fn width(self) -> u32 {
        match self {
            Self::I32Load8S | Self::I32Load8U | Self::I64Load8S | Self::I64Load8U => 1,
            Self::I32Load16S | Self::I32Load16U | Self::I64Load16S | Self::I64Load16U => 2,
            Self::I64Load32S | Self::I64Load32U => 4,
            Self::I32Load | Self::I64Load | Self::F32Load | Self::F64Load => self.result().byte_width(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::I32Load => "i32.load",
            Self::I64Load => "i64.load",
            Self::F32Load => "f32.load",
            Self::F64Load => "f64.load",
            Self::I32Load8S => "i32.load8_s",
            Self::I32Load8U => "i32.load8_u",
            Self::I32Load16S => "i32.load16_s",
            Self::I32Load16U => "i32.load16_u",
            Self::I64Load8S => "i64.load8_s",
            Self::I64Load8U => "i64.load8_u",
            Self::I64Load16S => "i64.load16_s",
            Self::I64Load16U => "i64.load16_u",
            Self::I64Load32S => "i64.load32_s",
            Self::I64Load32U => "i64.load32_u",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    I32Store,
    I64Store,
    F32Store,
    F64Store,
    I32Store8,
    I32Store16,
    I64Store8,
    I64Store16,
    I64Store32,
}

impl StoreOp {
    /// Kind of the value operand.
    pub fn value(self) -> ValueKind {
        match self {
            Self::I32Store | Self::I32Store8 | Self::I32Store16 => ValueKind::I32,
            Self::I64Store | Self::I64Store8 | Self::I64Store16 | Self::I64Store32 => ValueKind::I64,
            Self::F32Store => ValueKind::F32,
            Self::F64Store => ValueKind::F64,
        }
    }

    /// Bytes written to memory; narrow stores truncate the value.
    pub fn width(self) -> u32 {
        match self {
            Self::I32Store8 | Self::I64Store8 => 1,
            Self::I32Store16 | Self::I64Store16 => 2,
            Self::I64Store32 => 4,
            Self::I32Store | Self::I64Store | Self::F32Store | Self::F64Store => self.value().byte_width(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::I32Store => "i32.store",
            Self::I64Store => "i64.store",
            Self::F32Store => "f32.store",
            Self::F64Store => "f64.store",
            Self::I32Store8 => "i32.store8",
            Self::I32Store16 => "i32.store16",
            Self::I64Store8 => "i64.store8",
            Self::I64Store16 => "i64.store16",
            Self::I64Store32 => "i64.store32",
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Numeric operators
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Clz,
    Ctz,
    Popcnt,
    Abs,
    Neg,
    Sqrt,
    Ceil,
    Floor,
    Trunc,
    Nearest,
}

impl UnaryOp {
    pub fn is_defined_for(self, kind: ValueKind) -> bool {
        match self {
            Self::Clz | Self::Ctz | Self::Popcnt => kind.is_integer(),
            _ => kind.is_float(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Clz => "clz",
            Self::Ctz => "ctz",
            Self::Popcnt => "popcnt",
            Self::Abs => "abs",
            Self::Neg => "neg",
            Self::Sqrt => "sqrt",
            Self::Ceil => "ceil",
            Self::Floor => "floor",
            Self::Trunc => "trunc",
            Self::Nearest => "nearest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
    Div,
    Min,
    Max,
    Copysign,
}

impl BinaryOp {
    pub fn is_defined_for(self, kind: ValueKind) -> bool {
        match self {
            Self::Add | Self::Sub | Self::Mul => true,
            Self::Div | Self::Min | Self::Max | Self::Copysign => kind.is_float(),
            _ => kind.is_integer(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::DivS => "div_s",
            Self::DivU => "div_u",
            Self::RemS => "rem_s",
            Self::RemU => "rem_u",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::ShrS => "shr_s",
            Self::ShrU => "shr_u",
            Self::Rotl => "rotl",
            Self::Rotr => "rotr",
            Self::Div => "div",
            Self::Min => "min",
            Self::Max => "max",
            Self::Copysign => "copysign",
        }
    }
}

/// Comparisons always produce an `i32` truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub fn is_defined_for(self, kind: ValueKind) -> bool {
        match self {
            Self::Eq | Self::Ne => true,
            Self::Lt | Self::Gt | Self::Le | Self::Ge => kind.is_float(),
            _ => kind.is_integer(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::LtS => "lt_s",
            Self::LtU => "lt_u",
            Self::GtS => "gt_s",
            Self::GtU => "gt_u",
            Self::LeS => "le_s",
            Self::LeU => "le_u",
            Self::GeS => "ge_s",
            Self::GeU => "ge_u",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Le => "le",
            Self::Ge => "ge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertOp {
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F32DemoteF64,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
}

impl ConvertOp {
    /// Kind consumed by the conversion.
    pub fn input(self) -> ValueKind {
        use ValueKind::*;
        match self {
            Self::I32WrapI64 | Self::F32ConvertI64S | Self::F32ConvertI64U => I64,
            Self::F64ConvertI64S | Self::F64ConvertI64U | Self::F64ReinterpretI64 => I64,
            Self::I64ExtendI32S | Self::I64ExtendI32U => I32,
            Self::F32ConvertI32S | Self::F32ConvertI32U => I32,
            Self::F64ConvertI32S | Self::F64ConvertI32U | Self::F32ReinterpretI32 => I32,
            Self::I32TruncF32S | Self::I32TruncF32U | Self::I64TruncF32S | Self::I64TruncF32U => F32,
            Self::F64PromoteF32 | Self::I32ReinterpretF32 => F32,
            Self::I32TruncF64S | Self::I32TruncF64U | Self::I64TruncF64S | Self::I64TruncF64U => F64,
            Self::F32DemoteF64 | Self::I64ReinterpretF64 => F64,
        }
    }

    /// Kind produced by the conversion.
    pub fn output(self) -> ValueKind {
        use ValueKind::*;
        match self {
            Self::I32WrapI64 | Self::I32ReinterpretF32 => I32,
            Self::I32TruncF32S | Self::I32TruncF32U | Self::I32TruncF64S | Self::I32TruncF64U => I32,
            Self::I64ExtendI32S | Self::I64ExtendI32U | Self::I64ReinterpretF64 => I64,
            Self::I64TruncF32S | Self::I64TruncF32U | Self::I64TruncF64S | Self::I64TruncF64U => I64,
            Self::F32ConvertI32S | Self::F32ConvertI32U | Self::F32ConvertI64S | Self::F32ConvertI64U => F32,
            Self::F32DemoteF64 | Self::F32ReinterpretI32 => F32,
            Self::F64ConvertI32S | Self::F64ConvertI32U | Self::F64ConvertI64S | Self::F64ConvertI64U => F64,
            Self::F64PromoteF32 | Self::F64ReinterpretI64 => F64,
        }
    }

    /// Float-to-integer truncations trap on NaN and on out-of-range input.
    pub fn is_checked_truncation(self) -> bool {
        matches!(
            self,
            Self::I32TruncF32S
                | Self::I32TruncF32U
                | Self::I32TruncF64S
                | Self::I32TruncF64U
                | Self::I64TruncF32S
                | Self::I64TruncF32U
                | Self::I64TruncF64S
                | Self::I64TruncF64U
        )
    }

    /// Whether the integer side of the conversion is signed.
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::I64ExtendI32S
                | Self::I32TruncF32S
                | Self::I32TruncF64S
                | Self::I64TruncF32S
                | Self::I64TruncF64S
                | Self::F32ConvertI32S
                | Self::F32ConvertI64S
                | Self::F64ConvertI32S
                | Self::F64ConvertI64S
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::I32WrapI64 => "i32.wrap_i64",
            Self::I64ExtendI32S => "i64.extend_i32_s",
            Self::I64ExtendI32U => "i64.extend_i32_u",
            Self::I32TruncF32S => "i32.trunc_f32_s",
            Self::I32TruncF32U => "i32.trunc_f32_u",
            Self::I32TruncF64S => "i32.trunc_f64_s",
            Self::I32TruncF64U => "i32.trunc_f64_u",
            Self::I64TruncF32S => "i64.trunc_f32_s",
            Self::I64TruncF32U => "i64.trunc_f32_u",
            Self::I64TruncF64S => "i64.trunc_f64_s",
            Self::I64TruncF64U => "i64.trunc_f64_u",
            Self::F32ConvertI32S => "f32.convert_i32_s",
            Self::F32ConvertI32U => "f32.convert_i32_u",
            Self::F32ConvertI64S => "f32.convert_i64_s",
            Self::F32ConvertI64U => "f32.convert_i64_u",
            Self::F64ConvertI32S => "f64.convert_i32_s",
            Self::F64ConvertI32U => "f64.convert_i32_u",
            Self::F64ConvertI64S => "f64.convert_i64_s",
            Self::F64ConvertI64U => "f64.convert_i64_u",
            Self::F32DemoteF64 => "f32.demote_f64",
            Self::F64PromoteF32 => "f64.promote_f32",
            Self::I32ReinterpretF32 => "i32.reinterpret_f32",
            Self::I64ReinterpretF64 => "i64.reinterpret_f64",
            Self::F32ReinterpretI32 => "f32.reinterpret_i32",
            Self::F64ReinterpretI64 => "f64.reinterpret_i64",
        }
    }
}
