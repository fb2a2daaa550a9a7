//! Shared helper routines.
//!
//! Some operations expand into a trap-checking sequence that is identical at
//! every use site. Instead of inlining it, the context materializes one
//! routine per [`HelperId`] on first use and calls it through a
//! [`HelperHandle`] afterwards.
//!
//! The checked float-to-integer truncations are the helpers shipped here:
//!
//! ```text
//! x != x              → trap InvalidConversion
//! !(lo < x && x < hi) → trap IntegerOverflow
//! otherwise           → convert x
//! ```

use serde::{Deserialize, Serialize};
use stackc_types::ValueKind;
use tracing::debug;

use crate::assembler::{AssembledCode, Assembler};
use crate::context::CompilationContext;
use crate::emitter::{CodeEmitter, HelperHandle};
use crate::error::CodegenResult;
use crate::ops::{CompareOp, ConvertOp};
use crate::target::{Literal, TargetOp, TrapCode};

/// Identifies one kind of helper routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelperId {
    TruncF32ToI32S,
    TruncF32ToI32U,
    TruncF64ToI32S,
    TruncF64ToI32U,
    TruncF32ToI64S,
    TruncF32ToI64U,
    TruncF64ToI64S,
    TruncF64ToI64U,
}

impl HelperId {
    /// Number of distinct helpers; sizes the dense cache.
    pub const COUNT: usize = 8;

    pub const ALL: [HelperId; Self::COUNT] = [
        HelperId::TruncF32ToI32S,
        HelperId::TruncF32ToI32U,
        HelperId::TruncF64ToI32S,
        HelperId::TruncF64ToI32U,
        HelperId::TruncF32ToI64S,
        HelperId::TruncF32ToI64U,
        HelperId::TruncF64ToI64S,
        HelperId::TruncF64ToI64U,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The helper guarding a checked truncation, if `op` is one.
    pub fn for_conversion(op: ConvertOp) -> Option<Self> {
        match op {
            ConvertOp::I32TruncF32S => Some(Self::TruncF32ToI32S),
            ConvertOp::I32TruncF32U => Some(Self::TruncF32ToI32U),
            ConvertOp::I32TruncF64S => Some(Self::TruncF64ToI32S),
            ConvertOp::I32TruncF64U => Some(Self::TruncF64ToI32U),
            ConvertOp::I64TruncF32S => Some(Self::TruncF32ToI64S),
            ConvertOp::I64TruncF32U => Some(Self::TruncF32ToI64U),
            ConvertOp::I64TruncF64S => Some(Self::TruncF64ToI64S),
            ConvertOp::I64TruncF64U => Some(Self::TruncF64ToI64U),
            _ => None,
        }
    }

    pub fn conversion(self) -> ConvertOp {
        match self {
            Self::TruncF32ToI32S => ConvertOp::I32TruncF32S,
            Self::TruncF32ToI32U => ConvertOp::I32TruncF32U,
            Self::TruncF64ToI32S => ConvertOp::I32TruncF64S,
            Self::TruncF64ToI32U => ConvertOp::I32TruncF64U,
            Self::TruncF32ToI64S => ConvertOp::I64TruncF32S,
            Self::TruncF32ToI64U => ConvertOp::I64TruncF32U,
            Self::TruncF64ToI64S => ConvertOp::I64TruncF64S,
            Self::TruncF64ToI64U => ConvertOp::I64TruncF64U,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TruncF32ToI32S => "checked_i32_trunc_f32_s",
            Self::TruncF32ToI32U => "checked_i32_trunc_f32_u",
            Self::TruncF64ToI32S => "checked_i32_trunc_f64_s",
            Self::TruncF64ToI32U => "checked_i32_trunc_f64_u",
            Self::TruncF32ToI64S => "checked_i64_trunc_f32_s",
            Self::TruncF32ToI64U => "checked_i64_trunc_f32_u",
            Self::TruncF64ToI64S => "checked_i64_trunc_f64_s",
            Self::TruncF64ToI64U => "checked_i64_trunc_f64_u",
        }
    }
}

/// Dense `HelperId` → handle map.
#[derive(Debug, Clone, Default)]
pub struct HelperCache {
    slots: [Option<HelperHandle>; HelperId::COUNT],
}

impl HelperCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: HelperId) -> Option<HelperHandle> {
        self.slots[id.index()]
    }

    pub fn insert(&mut self, id: HelperId, handle: HelperHandle) {
        self.slots[id.index()] = Some(handle);
    }

    /// Number of helpers materialized so far.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A materialized helper and the handle call sites use to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperRoutine {
    pub id: HelperId,
    pub handle: HelperHandle,
    pub code: AssembledCode,
}

// ══════════════════════════════════════════════════════════════════════════════
// Default factory
// ══════════════════════════════════════════════════════════════════════════════

/// Factory for [`CompilationContext::get_or_create_helper`]: assembles the
/// routine for `id` and registers it with the context.
pub fn materialize<E: CodeEmitter>(
    id: HelperId,
    ctx: &mut CompilationContext<E>,
) -> CodegenResult<HelperHandle> {
    let code = assemble_checked_truncation(id.conversion())?;
    let handle = ctx.register_routine(id, code);
    debug!(
        target: "stackc::codegen::helpers",
        helper = id.name(),
        %handle,
        "materialized helper routine"
    );
    Ok(handle)
}

/// Exclusive bounds `(lo, hi)` of inputs that truncate without overflow.
fn truncation_bounds(op: ConvertOp) -> (f64, f64) {
    let signed = op.is_signed();
    match (op.output(), op.input(), signed) {
        (ValueKind::I32, ValueKind::F32, true) => (-2_147_483_904.0, 2_147_483_648.0),
        (ValueKind::I32, ValueKind::F64, true) => (-2_147_483_649.0, 2_147_483_648.0),
        (ValueKind::I32, _, false) => (-1.0, 4_294_967_296.0),
        (ValueKind::I64, ValueKind::F32, true) => {
            (-9_223_373_136_366_403_584.0, 9_223_372_036_854_775_808.0)
        }
        (ValueKind::I64, _, true) => (-9_223_372_036_854_777_856.0, 9_223_372_036_854_775_808.0),
        _ => (-1.0, 18_446_744_073_709_551_616.0),
    }
}

fn float_literal(kind: ValueKind, value: f64) -> Literal {
    match kind {
        ValueKind::F32 => Literal::F32((value as f32).to_bits()),
        _ => Literal::F64(value.to_bits()),
    }
}

fn assemble_checked_truncation(op: ConvertOp) -> CodegenResult<AssembledCode> {
    let input = op.input();
    let (lo, hi) = truncation_bounds(op);
    let mut asm = Assembler::new(&[input]);
    let not_nan = asm.define_label();
    let overflow = asm.define_label();

    asm.emit(TargetOp::LoadArg(0));
    asm.emit(TargetOp::LoadArg(0));
    asm.emit(TargetOp::Compare(input, CompareOp::Eq));
    asm.emit(TargetOp::JumpIfNonZero(not_nan));
    asm.emit(TargetOp::Trap(TrapCode::InvalidConversion));
    asm.mark_label(not_nan);

    asm.emit(TargetOp::LoadArg(0));
    asm.emit(TargetOp::Const(float_literal(input, lo)));
    asm.emit(TargetOp::Compare(input, CompareOp::Gt));
    asm.emit(TargetOp::JumpIfZero(overflow));
    asm.emit(TargetOp::LoadArg(0));
    asm.emit(TargetOp::Const(float_literal(input, hi)));
    asm.emit(TargetOp::Compare(input, CompareOp::Lt));
    asm.emit(TargetOp::JumpIfZero(overflow));

    asm.emit(TargetOp::LoadArg(0));
    asm.emit(TargetOp::Convert(op));
    asm.emit(TargetOp::Return);

    asm.mark_label(overflow);
    asm.emit(TargetOp::Trap(TrapCode::IntegerOverflow));
    asm.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_conversions() {
        for id in HelperId::ALL {
            assert_eq!(HelperId::for_conversion(id.conversion()), Some(id));
        }
        assert_eq!(HelperId::for_conversion(ConvertOp::F32DemoteF64), None);
    }

    #[test]
    fn dense_indices_cover_the_cache() {
        for (position, id) in HelperId::ALL.iter().enumerate() {
            assert_eq!(id.index(), position);
        }
    }

    #[test]
    fn cache_tracks_inserted_handles() {
        let mut cache = HelperCache::new();
        assert!(cache.is_empty());
        cache.insert(HelperId::TruncF64ToI64U, HelperHandle(0));
        assert_eq!(cache.get(HelperId::TruncF64ToI64U), Some(HelperHandle(0)));
        assert_eq!(cache.get(HelperId::TruncF32ToI32S), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn f32_bounds_are_exactly_representable() {
        let (lo, hi) = truncation_bounds(ConvertOp::I32TruncF32S);
        assert_eq!(f64::from(lo as f32), lo);
        assert_eq!(f64::from(hi as f32), hi);
        let (lo, hi) = truncation_bounds(ConvertOp::I64TruncF32S);
        assert_eq!(f64::from(lo as f32), lo);
        assert_eq!(f64::from(hi as f32), hi);
    }

    #[test]
    fn truncation_routine_traps_and_converts() {
        let code = assemble_checked_truncation(ConvertOp::I32TruncF64U).unwrap();
        assert_eq!(code.params, vec![ValueKind::F64]);
        assert!(code
            .ops
            .contains(&TargetOp::Trap(TrapCode::InvalidConversion)));
        assert!(code.ops.contains(&TargetOp::Trap(TrapCode::IntegerOverflow)));
        assert!(code
            .ops
            .contains(&TargetOp::Convert(ConvertOp::I32TruncF64U)));
        assert_eq!(code.ops.last(), Some(&TargetOp::Trap(TrapCode::IntegerOverflow)));
    }
}
