//! Integration tests for the compilation context.
//!
//! Tests validate:
//! - Reset prepares a clean function-level frame and declares locals
//! - Typed pops, wildcard adoption and underflow in reachable code
//! - Polymorphic pops in unreachable code, down to the block's base height
//! - Reachability marking, including the function-wide walk
//! - Helper routines are materialized once per id and survive resets

use std::cell::Cell;
use std::sync::Arc;

use stackc_codegen::{
    Assembler, BlockKind, CodegenError, CompilationContext, ConvertOp, HelperHandle, HelperId,
    Instruction, TargetOp,
};
use stackc_types::{BlockType, ModuleTables, Signature, ValueKind};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn context_for(params: &[ValueKind], results: &[ValueKind]) -> CompilationContext<Assembler> {
    let mut ctx = CompilationContext::new(Arc::new(ModuleTables::new()));
    let signature = Arc::new(Signature::new(params.to_vec(), results.to_vec()));
    ctx.reset(Assembler::new(params), signature, &[]);
    ctx
}

fn void_context() -> CompilationContext<Assembler> {
    context_for(&[], &[])
}

// ══════════════════════════════════════════════════════════════════════════════
// Reset
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn reset_opens_the_function_level_frame() {
    let ctx = context_for(&[ValueKind::I32], &[ValueKind::F64, ValueKind::I32]);
    assert_eq!(ctx.depth(), 1);
    assert_eq!(ctx.block_context_count(), 1);
    assert_eq!(ctx.block_type(0), Some(BlockType::Value(ValueKind::F64)));
    let frame = ctx.current_block().unwrap();
    assert_eq!(frame.kind, BlockKind::Function);
    assert_eq!(frame.initial_stack_height, 0);
    assert!(frame.reachable);
    assert_eq!(ctx.stack_height(), 0);
}

#[test]
fn reset_clears_state_left_by_a_failed_function() {
    let mut ctx = void_context();
    ctx.compile_block(BlockType::Empty).unwrap();
    ctx.push_kind(ValueKind::I64);
    ctx.mark_unreachable(true);

    ctx.reset(Assembler::new(&[]), Arc::new(Signature::default()), &[]);
    assert_eq!(ctx.depth(), 1);
    assert_eq!(ctx.stack_height(), 0);
    assert!(!ctx.is_unreachable());
    assert_eq!(ctx.pending_label(0), None);
    assert_eq!(ctx.loop_label(0), None);
}

#[test]
fn body_locals_are_declared_on_the_emitter() {
    let mut ctx = CompilationContext::new(Arc::new(ModuleTables::new()));
    let signature = Arc::new(Signature::new(vec![ValueKind::F32], vec![]));
    ctx.reset(
        Assembler::new(&[ValueKind::F32]),
        signature,
        &[ValueKind::I64, ValueKind::I32],
    );
    assert_eq!(ctx.local_kind("local.get", 0).unwrap(), ValueKind::F32);
    assert_eq!(ctx.local_kind("local.get", 2).unwrap(), ValueKind::I32);
    assert_eq!(ctx.local_load("local.get", 0).unwrap(), TargetOp::LoadArg(0));
    assert!(matches!(
        ctx.local_store("local.set", 1).unwrap(),
        TargetOp::StoreLocal(_)
    ));
    assert!(matches!(
        ctx.local_kind("local.get", 3),
        Err(CodegenError::IndexOutOfRange { index: 3, .. })
    ));

    Instruction::End.compile(&mut ctx).unwrap();
    let code = ctx.finish().unwrap().finish().unwrap();
    assert_eq!(code.locals, vec![ValueKind::I64, ValueKind::I32]);
}

#[test]
fn finish_rejects_open_blocks() {
    let mut ctx = void_context();
    ctx.compile_block(BlockType::Empty).unwrap();
    assert!(matches!(
        ctx.finish(),
        Err(CodegenError::InvalidControlState { .. })
    ));
}

// ══════════════════════════════════════════════════════════════════════════════
// Typed pops
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn reachable_mismatch_always_raises_type_mismatch() {
    for actual in ValueKind::ALL {
        for expected in ValueKind::ALL {
            if actual == expected {
                continue;
            }
            let mut ctx = void_context();
            ctx.push_kind(actual);
            let err = ctx.pop_stack("test", &[Some(expected)]).unwrap_err();
            assert_eq!(
                err,
                CodegenError::StackTypeMismatch {
                    opcode: "test".into(),
                    expected,
                    actual,
                }
            );
        }
    }
}

#[test]
fn pops_are_listed_top_of_stack_first() {
    let mut ctx = void_context();
    ctx.push_kind(ValueKind::I32);
    ctx.push_kind(ValueKind::F64);
    let popped = ctx
        .pop_stack("test", &[Some(ValueKind::F64), Some(ValueKind::I32)])
        .unwrap();
    assert_eq!(popped.as_slice(), &[Some(ValueKind::F64), Some(ValueKind::I32)]);
    assert_eq!(ctx.stack_height(), 0);
}

#[test]
fn wildcard_expectation_reports_the_actual_kind() {
    let mut ctx = void_context();
    ctx.push_kind(ValueKind::I64);
    let popped = ctx.pop_stack("drop", &[None]).unwrap();
    assert_eq!(popped.as_slice(), &[Some(ValueKind::I64)]);
}

#[test]
fn popped_wildcard_adopts_the_expectation() {
    let mut ctx = void_context();
    ctx.push(None);
    let popped = ctx.pop_stack("test", &[Some(ValueKind::F32)]).unwrap();
    assert_eq!(popped.as_slice(), &[Some(ValueKind::F32)]);
}

#[test]
fn reachable_underflow_reports_the_requested_count() {
    let mut ctx = void_context();
    ctx.push_kind(ValueKind::I32);
    let err = ctx
        .pop_stack("i32.add", &[Some(ValueKind::I32), Some(ValueKind::I32)])
        .unwrap_err();
    assert_eq!(
        err,
        CodegenError::StackUnderflow {
            opcode: "i32.add".into(),
            expected: 2,
        }
    );
}

#[test]
fn pops_never_reach_below_the_block_base() {
    let mut ctx = void_context();
    ctx.push_kind(ValueKind::I32);
    ctx.compile_block(BlockType::Empty).unwrap();
    assert!(matches!(
        ctx.pop_stack("drop", &[None]),
        Err(CodegenError::StackUnderflow { .. })
    ));
    assert_eq!(ctx.stack_height(), 1);
}

#[test]
fn peek_leaves_the_stack_untouched() {
    let mut ctx = void_context();
    ctx.push_kind(ValueKind::F32);
    ctx.push_kind(ValueKind::I64);
    let before = ctx.stack().to_vec();
    let seen = ctx
        .peek_stack("test", &[Some(ValueKind::I64), Some(ValueKind::F32)])
        .unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(ctx.stack(), before.as_slice());
}

// ══════════════════════════════════════════════════════════════════════════════
// Reachability
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn unreachable_pops_never_fail_down_to_the_base() {
    let mut ctx = void_context();
    ctx.compile_block(BlockType::Empty).unwrap();
    ctx.push_kind(ValueKind::I32);
    ctx.mark_unreachable(false);
    assert_eq!(ctx.stack_height(), 0);

    for _ in 0..3 {
        let popped = ctx
            .pop_stack("test", &[Some(ValueKind::F64), None, Some(ValueKind::I32)])
            .unwrap();
        assert_eq!(
            popped.as_slice(),
            &[Some(ValueKind::F64), None, Some(ValueKind::I32)]
        );
    }
}

#[test]
fn mark_and_unmark_round_trip() {
    let mut ctx = void_context();
    ctx.compile_block(BlockType::Empty).unwrap();
    assert!(!ctx.is_unreachable());
    ctx.mark_unreachable(false);
    assert!(ctx.is_unreachable());
    ctx.mark_reachable();
    assert!(!ctx.is_unreachable());
}

#[test]
fn local_unreachability_leaves_enclosing_blocks_alone() {
    let mut ctx = void_context();
    ctx.compile_block(BlockType::Empty).unwrap();
    ctx.compile_block(BlockType::Empty).unwrap();
    ctx.mark_unreachable(false);
    ctx.compile_end().unwrap();
    assert!(!ctx.is_unreachable());
}

#[test]
fn function_wide_unreachability_spares_the_function_frame() {
    let mut ctx = void_context();
    ctx.compile_block(BlockType::Empty).unwrap();
    ctx.compile_block(BlockType::Empty).unwrap();
    ctx.mark_unreachable(true);
    ctx.compile_end().unwrap();
    assert!(ctx.is_unreachable());
    ctx.compile_end().unwrap();
    assert!(!ctx.is_unreachable());
}

#[test]
fn function_wide_unreachability_at_top_level_marks_the_function_frame() {
    let mut ctx = void_context();
    ctx.mark_unreachable(true);
    assert!(ctx.is_unreachable());
}

#[test]
fn unreachable_truncates_to_the_current_base() {
    let mut ctx = void_context();
    ctx.push_kind(ValueKind::I32);
    ctx.compile_block(BlockType::Empty).unwrap();
    ctx.push_kind(ValueKind::I64);
    ctx.push_kind(ValueKind::I64);
    ctx.mark_unreachable(false);
    assert_eq!(ctx.stack(), &[Some(ValueKind::I32)]);
}

// ══════════════════════════════════════════════════════════════════════════════
// Helper routines
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn helper_factory_runs_once_per_id() {
    let mut ctx = void_context();
    let calls = Cell::new(0);
    let factory = |_: HelperId, _: &mut CompilationContext<Assembler>| {
        calls.set(calls.get() + 1);
        Ok(HelperHandle(calls.get()))
    };

    let first = ctx.get_or_create_helper(HelperId::TruncF32ToI32S, factory).unwrap();
    let again = ctx.get_or_create_helper(HelperId::TruncF32ToI32S, factory).unwrap();
    let other = ctx.get_or_create_helper(HelperId::TruncF64ToI64U, factory).unwrap();

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(calls.get(), 2);
}

#[test]
fn failed_factory_leaves_the_cache_empty() {
    let mut ctx = void_context();
    let failing = |_: HelperId, _: &mut CompilationContext<Assembler>| {
        Err(CodegenError::control("helper", "refused"))
    };
    assert!(ctx.get_or_create_helper(HelperId::TruncF32ToI64S, failing).is_err());
    let handle = ctx
        .get_or_create_helper(HelperId::TruncF32ToI64S, stackc_codegen::helpers::materialize)
        .unwrap();
    assert_eq!(ctx.routines().len(), 1);
    assert_eq!(ctx.routines()[0].handle, handle);
}

#[test]
fn checked_truncations_share_one_routine_across_functions() {
    let mut ctx = CompilationContext::new(Arc::new(ModuleTables::new()));
    let signature = Arc::new(Signature::new(vec![ValueKind::F64], vec![ValueKind::I32]));
    let body = [
        Instruction::LocalGet { index: 0 },
        Instruction::Convert {
            op: ConvertOp::I32TruncF64S,
        },
        Instruction::End,
    ];

    let mut listings = Vec::new();
    for _ in 0..2 {
        let asm = ctx
            .compile_function(Assembler::new(&[ValueKind::F64]), Arc::clone(&signature), &[], &body)
            .unwrap();
        listings.push(asm.finish().unwrap());
    }

    assert_eq!(ctx.routines().len(), 1);
    let handle = ctx.routines()[0].handle;
    for code in &listings {
        assert!(code.ops.contains(&TargetOp::CallHelper(handle)));
    }
}

#[test]
fn disabled_helpers_fall_back_to_plain_conversion() {
    let mut ctx =
        CompilationContext::new(Arc::new(ModuleTables::new())).with_helper_routines(false);
    let signature = Arc::new(Signature::new(vec![ValueKind::F32], vec![ValueKind::I64]));
    let body = [
        Instruction::LocalGet { index: 0 },
        Instruction::Convert {
            op: ConvertOp::I64TruncF32U,
        },
        Instruction::End,
    ];
    let code = ctx
        .compile_function(Assembler::new(&[ValueKind::F32]), signature, &[], &body)
        .unwrap()
        .finish()
        .unwrap();
    assert!(code.ops.contains(&TargetOp::Convert(ConvertOp::I64TruncF32U)));
    assert!(ctx.routines().is_empty());
}
