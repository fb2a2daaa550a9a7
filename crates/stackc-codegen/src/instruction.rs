//! Source instructions and their per-instruction compilation.
//!
//! [`Instruction`] is a closed enum; every variant knows its mnemonic and how
//! to validate its operands against the context's abstract stack before it
//! emits target operations.

use std::borrow::Cow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stackc_types::{BlockType, Signature, StackSlot, ValueKind};

use crate::context::CompilationContext;
use crate::emitter::CodeEmitter;
use crate::error::{CodegenError, CodegenResult, IndexSpace};
use crate::helpers::{self, HelperId};
use crate::ops::{BinaryOp, CompareOp, ConvertOp, LoadOp, MemArg, StoreOp, UnaryOp};
use crate::target::{Literal, TargetOp};

/// Wildcard expectation: accepts an operand of any kind.
const ANY: StackSlot = None;

/// One unit of source bytecode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "instruction")]
pub enum Instruction {
    // ── Control ──
    Unreachable,
    Nop,
    Block { block_type: BlockType },
    Loop { block_type: BlockType },
    If { block_type: BlockType },
    Else,
    End,
    Br { depth: u32 },
    BrIf { depth: u32 },
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call { function_index: u32 },
    CallIndirect { type_index: u32 },

    // ── Parametric ──
    Drop,
    Select,

    // ── Variables ──
    LocalGet { index: u32 },
    LocalSet { index: u32 },
    LocalTee { index: u32 },
    GlobalGet { index: u32 },
    GlobalSet { index: u32 },

    // ── Memory ──
    Load { op: LoadOp, memarg: MemArg },
    Store { op: StoreOp, memarg: MemArg },
    MemorySize,
    MemoryGrow,

    // ── Constants ──
    I32Const { value: i32 },
    I64Const { value: i64 },
    /// Raw IEEE-754 bits.
    F32Const { bits: u32 },
    /// Raw IEEE-754 bits.
    F64Const { bits: u64 },

    // ── Numeric ──
    Eqz { kind: ValueKind },
    Unary { kind: ValueKind, op: UnaryOp },
    Binary { kind: ValueKind, op: BinaryOp },
    Compare { kind: ValueKind, op: CompareOp },
    Convert { op: ConvertOp },
}

impl Instruction {
    /// Text-format mnemonic, used in error messages.
    pub fn mnemonic(&self) -> Cow<'static, str> {
        match self {
            Self::Unreachable => "unreachable".into(),
            Self::Nop => "nop".into(),
            Self::Block { .. } => "block".into(),
            Self::Loop { .. } => "loop".into(),
            Self::If { .. } => "if".into(),
            Self::Else => "else".into(),
            Self::End => "end".into(),
            Self::Br { .. } => "br".into(),
            Self::BrIf { .. } => "br_if".into(),
            Self::BrTable { .. } => "br_table".into(),
            Self::Return => "return".into(),
            Self::Call { .. } => "call".into(),
            Self::CallIndirect { .. } => "call_indirect".into(),
            Self::Drop => "drop".into(),
            Self::Select => "select".into(),
            Self::LocalGet { .. } => "local.get".into(),
            Self::LocalSet { .. } => "local.set".into(),
            Self::LocalTee { .. } => "local.tee".into(),
            Self::GlobalGet { .. } => "global.get".into(),
            Self::GlobalSet { .. } => "global.set".into(),
            Self::Load { op, .. } => op.name().into(),
            Self::Store { op, .. } => op.name().into(),
            Self::MemorySize => "memory.size".into(),
            Self::MemoryGrow => "memory.grow".into(),
            Self::I32Const { .. } => "i32.const".into(),
            Self::I64Const { .. } => "i64.const".into(),
            Self::F32Const { .. } => "f32.const".into(),
            Self::F64Const { .. } => "f64.const".into(),
            Self::Eqz { kind } => format!("{kind}.eqz").into(),
            Self::Unary { kind, op } => format!("{kind}.{}", op.name()).into(),
            Self::Binary { kind, op } => format!("{kind}.{}", op.name()).into(),
            Self::Compare { kind, op } => format!("{kind}.{}", op.name()).into(),
            Self::Convert { op } => op.name().into(),
        }
    }

    /// Validate this instruction against `ctx` and emit its target code.
    pub fn compile<E: CodeEmitter>(&self, ctx: &mut CompilationContext<E>) -> CodegenResult<()> {
        match self {
            Self::Unreachable => ctx.compile_unreachable(),
            Self::Nop => {
                ctx.top_index("nop")?;
                ctx.emit(TargetOp::Nop)
            }
            Self::Block { block_type } => ctx.compile_block(*block_type),
            Self::Loop { block_type } => ctx.compile_loop(*block_type),
            Self::If { block_type } => ctx.compile_if(*block_type),
            Self::Else => ctx.compile_else(),
            Self::End => ctx.compile_end(),
            Self::Br { depth } => ctx.compile_br(*depth),
            Self::BrIf { depth } => ctx.compile_br_if(*depth),
            Self::BrTable { targets, default } => ctx.compile_br_table(targets, *default),
            Self::Return => ctx.compile_return(),
            Self::Call { function_index } => compile_call(ctx, *function_index),
            Self::CallIndirect { type_index } => compile_call_indirect(ctx, *type_index),

            Self::Drop => {
                ctx.pop_kind("drop", ANY)?;
                ctx.emit(TargetOp::Drop)
            }
            Self::Select => {
                ctx.pop_kind("select", Some(ValueKind::I32))?;
                let second = ctx.pop_kind("select", ANY)?;
                let first = ctx.pop_kind("select", second)?;
                ctx.push(first.or(second));
                ctx.emit(TargetOp::Select)
            }

            Self::LocalGet { index } => {
                let kind = ctx.local_kind("local.get", *index)?;
                let op = ctx.local_load("local.get", *index)?;
                ctx.emit(op)?;
                ctx.push_kind(kind);
                Ok(())
            }
            Self::LocalSet { index } => {
                let kind = ctx.local_kind("local.set", *index)?;
                let op = ctx.local_store("local.set", *index)?;
                ctx.pop_kind("local.set", Some(kind))?;
                ctx.emit(op)
            }
            Self::LocalTee { index } => {
                let kind = ctx.local_kind("local.tee", *index)?;
                let op = ctx.local_store("local.tee", *index)?;
                ctx.peek_stack("local.tee", &[Some(kind)])?;
                ctx.emit(TargetOp::Dup)?;
                ctx.emit(op)
            }
            Self::GlobalGet { index } => {
                let global = global_descriptor(ctx, "global.get", *index)?;
                ctx.emit(TargetOp::LoadGlobal(*index))?;
                ctx.push_kind(global.kind);
                Ok(())
            }
            Self::GlobalSet { index } => {
                let global = global_descriptor(ctx, "global.set", *index)?;
                if !global.mutable {
                    return Err(CodegenError::ImmutableGlobal {
                        opcode: "global.set".to_string(),
                        index: *index,
                    });
                }
                ctx.pop_kind("global.set", Some(global.kind))?;
                ctx.emit(TargetOp::StoreGlobal(*index))
            }

            Self::Load { op, memarg } => {
                check_memory_access(ctx, op.name(), memarg.align, op.width())?;
                ctx.pop_kind(op.name(), Some(ValueKind::I32))?;
                ctx.emit(TargetOp::Load {
                    op: *op,
                    offset: memarg.offset,
                })?;
                ctx.push_kind(op.result());
                Ok(())
            }
            Self::Store { op, memarg } => {
                check_memory_access(ctx, op.name(), memarg.align, op.width())?;
                ctx.pop_stack(op.name(), &[Some(op.value()), Some(ValueKind::I32)])?;
                ctx.emit(TargetOp::Store {
                    op: *op,
                    offset: memarg.offset,
                })
            }
            Self::MemorySize => {
                require_memory(ctx, "memory.size")?;
                ctx.emit(TargetOp::MemorySize)?;
                ctx.push_kind(ValueKind::I32);
                Ok(())
            }
            Self::MemoryGrow => {
                require_memory(ctx, "memory.grow")?;
                ctx.pop_kind("memory.grow", Some(ValueKind::I32))?;
                ctx.emit(TargetOp::MemoryGrow)?;
                ctx.push_kind(ValueKind::I32);
                Ok(())
            }

            Self::I32Const { value } => push_const(ctx, Literal::I32(*value)),
            Self::I64Const { value } => push_const(ctx, Literal::I64(*value)),
            Self::F32Const { bits } => push_const(ctx, Literal::F32(*bits)),
            Self::F64Const { bits } => push_const(ctx, Literal::F64(*bits)),

            Self::Eqz { kind } => {
                let opcode = self.mnemonic();
                if !kind.is_integer() {
                    return Err(unsupported(&opcode));
                }
                ctx.pop_kind(&opcode, Some(*kind))?;
                ctx.emit(TargetOp::Eqz(*kind))?;
                ctx.push_kind(ValueKind::I32);
                Ok(())
            }
            Self::Unary { kind, op } => {
                let opcode = self.mnemonic();
                if !op.is_defined_for(*kind) {
                    return Err(unsupported(&opcode));
                }
                ctx.pop_kind(&opcode, Some(*kind))?;
                ctx.emit(TargetOp::Unary(*kind, *op))?;
                ctx.push_kind(*kind);
                Ok(())
            }
            Self::Binary { kind, op } => {
                let opcode = self.mnemonic();
                if !op.is_defined_for(*kind) {
                    return Err(unsupported(&opcode));
                }
                ctx.pop_stack(&opcode, &[Some(*kind), Some(*kind)])?;
                ctx.emit(TargetOp::Binary(*kind, *op))?;
                ctx.push_kind(*kind);
                Ok(())
            }
            Self::Compare { kind, op } => {
                let opcode = self.mnemonic();
                if !op.is_defined_for(*kind) {
                    return Err(unsupported(&opcode));
                }
                ctx.pop_stack(&opcode, &[Some(*kind), Some(*kind)])?;
                ctx.emit(TargetOp::Compare(*kind, *op))?;
                ctx.push_kind(ValueKind::I32);
                Ok(())
            }
            Self::Convert { op } => compile_convert(ctx, *op),
        }
    }
}

impl<E: CodeEmitter> CompilationContext<E> {
    /// Compile a whole function body, ending with its final `end`, and hand
    /// back the emitter.
    pub fn compile_function(
        &mut self,
        emitter: E,
        signature: Arc<Signature>,
        locals: &[ValueKind],
        body: &[Instruction],
    ) -> CodegenResult<E> {
        self.reset(emitter, signature, locals);
        for instruction in body {
            if self.depth() == 0 {
                return Err(CodegenError::control(
                    &instruction.mnemonic(),
                    "instruction after the function's final end",
                ));
            }
            instruction.compile(self)?;
        }
        self.finish()
    }
}

fn unsupported(opcode: &str) -> CodegenError {
    CodegenError::UnsupportedOperator {
        opcode: opcode.to_string(),
    }
}

fn push_const<E: CodeEmitter>(ctx: &mut CompilationContext<E>, literal: Literal) -> CodegenResult<()> {
    ctx.emit(TargetOp::Const(literal))?;
    ctx.push_kind(literal.kind());
    Ok(())
}

fn global_descriptor<E: CodeEmitter>(
    ctx: &CompilationContext<E>,
    opcode: &str,
    index: u32,
) -> CodegenResult<stackc_types::GlobalDescriptor> {
    ctx.tables()
        .global(index)
        .copied()
        .ok_or_else(|| CodegenError::IndexOutOfRange {
            opcode: opcode.to_string(),
            space: IndexSpace::Global,
            index,
        })
}

// ══════════════════════════════════════════════════════════════════════════════
// Calls
// ══════════════════════════════════════════════════════════════════════════════

fn compile_call<E: CodeEmitter>(ctx: &mut CompilationContext<E>, function_index: u32) -> CodegenResult<()> {
    let callee = ctx
        .tables()
        .function(function_index)
        .cloned()
        .ok_or_else(|| CodegenError::IndexOutOfRange {
            opcode: "call".to_string(),
            space: IndexSpace::Function,
            index: function_index,
        })?;
    pop_params(ctx, "call", &callee.signature)?;
    ctx.emit(TargetOp::Call(callee.target))?;
    push_results(ctx, &callee.signature);
    Ok(())
}

fn compile_call_indirect<E: CodeEmitter>(
    ctx: &mut CompilationContext<E>,
    type_index: u32,
) -> CodegenResult<()> {
    if ctx.tables().table.is_none() {
        return Err(CodegenError::MissingTable {
            opcode: "call_indirect".to_string(),
        });
    }
    let signature = ctx
        .tables()
        .signature(type_index)
        .cloned()
        .ok_or_else(|| CodegenError::IndexOutOfRange {
            opcode: "call_indirect".to_string(),
            space: IndexSpace::Type,
            index: type_index,
        })?;
    ctx.pop_kind("call_indirect", Some(ValueKind::I32))?;
    pop_params(ctx, "call_indirect", &signature)?;
    ctx.emit(TargetOp::CallIndirect { type_index })?;
    push_results(ctx, &signature);
    Ok(())
}

fn pop_params<E: CodeEmitter>(
    ctx: &mut CompilationContext<E>,
    opcode: &str,
    signature: &Signature,
) -> CodegenResult<()> {
    let expected: Vec<StackSlot> = signature.params().iter().rev().map(|kind| Some(*kind)).collect();
    ctx.pop_stack(opcode, &expected)?;
    Ok(())
}

fn push_results<E: CodeEmitter>(ctx: &mut CompilationContext<E>, signature: &Signature) {
    for &kind in signature.results() {
        ctx.push_kind(kind);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Memory
// ══════════════════════════════════════════════════════════════════════════════

fn require_memory<E: CodeEmitter>(ctx: &CompilationContext<E>, opcode: &str) -> CodegenResult<()> {
    if ctx.tables().memory.is_none() {
        return Err(CodegenError::MissingMemory {
            opcode: opcode.to_string(),
        });
    }
    Ok(())
}

fn check_memory_access<E: CodeEmitter>(
    ctx: &CompilationContext<E>,
    opcode: &str,
    align: u32,
    width: u32,
) -> CodegenResult<()> {
    require_memory(ctx, opcode)?;
    let too_wide = 1u64.checked_shl(align).map_or(true, |bytes| bytes > u64::from(width));
    if too_wide {
        return Err(CodegenError::InvalidAlignment {
            opcode: opcode.to_string(),
            align,
            natural: width,
        });
    }
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Conversions
// ══════════════════════════════════════════════════════════════════════════════

fn compile_convert<E: CodeEmitter>(ctx: &mut CompilationContext<E>, op: ConvertOp) -> CodegenResult<()> {
    ctx.pop_kind(op.name(), Some(op.input()))?;
    let helper = HelperId::for_conversion(op).filter(|_| ctx.helper_routines_enabled());
    match helper {
        Some(id) => {
            let handle = ctx.get_or_create_helper(id, helpers::materialize)?;
            ctx.emit(TargetOp::CallHelper(handle))?;
        }
        None => ctx.emit(TargetOp::Convert(op))?,
    }
    ctx.push_kind(op.output());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use stackc_types::{CallTarget, MemoryDescriptor, ModuleTables};

    fn tables_with_memory() -> Arc<ModuleTables> {
        let mut tables = ModuleTables::new();
        tables.memory = Some(MemoryDescriptor {
            minimum_pages: 1,
            maximum_pages: None,
        });
        Arc::new(tables)
    }

    fn run(
        tables: Arc<ModuleTables>,
        signature: Signature,
        body: &[Instruction],
    ) -> CodegenResult<Assembler> {
        let mut ctx = CompilationContext::new(tables);
        let params = signature.params().to_vec();
        ctx.compile_function(Assembler::new(&params), Arc::new(signature), &[], body)
    }

    #[test]
    fn mnemonics_follow_the_text_format() {
        let add = Instruction::Binary {
            kind: ValueKind::I64,
            op: BinaryOp::Add,
        };
        assert_eq!(add.mnemonic(), "i64.add");
        let load = Instruction::Load {
            op: LoadOp::I64Load8U,
            memarg: MemArg::default(),
        };
        assert_eq!(load.mnemonic(), "i64.load8_u");
    }

    #[test]
    fn float_eqz_is_unsupported() {
        let body = [
            Instruction::F32Const { bits: 0 },
            Instruction::Eqz { kind: ValueKind::F32 },
        ];
        let err = run(Arc::new(ModuleTables::new()), Signature::default(), &body).unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedOperator { .. }));
    }

    #[test]
    fn over_aligned_load_is_rejected() {
        let body = [
            Instruction::I32Const { value: 0 },
            Instruction::Load {
                op: LoadOp::I32Load16U,
                memarg: MemArg::new(2, 0),
            },
        ];
        let err = run(tables_with_memory(), Signature::default(), &body).unwrap_err();
        assert_eq!(
            err,
            CodegenError::InvalidAlignment {
                opcode: "i32.load16_u".into(),
                align: 2,
                natural: 2,
            }
        );
    }

    #[test]
    fn load_without_memory_is_rejected() {
        let body = [
            Instruction::I32Const { value: 0 },
            Instruction::Load {
                op: LoadOp::I32Load,
                memarg: MemArg::new(2, 0),
            },
        ];
        let err = run(Arc::new(ModuleTables::new()), Signature::default(), &body).unwrap_err();
        assert!(matches!(err, CodegenError::MissingMemory { .. }));
    }

    #[test]
    fn select_takes_the_kind_of_its_operands() {
        let body = [
            Instruction::I64Const { value: 1 },
            Instruction::I64Const { value: 2 },
            Instruction::I32Const { value: 0 },
            Instruction::Select,
            Instruction::End,
        ];
        let signature = Signature::new(vec![], vec![ValueKind::I64]);
        assert!(run(Arc::new(ModuleTables::new()), signature, &body).is_ok());
    }

    #[test]
    fn call_pops_params_and_pushes_results() {
        let mut tables = ModuleTables::new();
        let ty = tables.add_type(Signature::new(vec![ValueKind::I32, ValueKind::F64], vec![ValueKind::I64]));
        tables.add_function(ty, CallTarget::Import(0)).unwrap();
        let body = [
            Instruction::I32Const { value: 1 },
            Instruction::F64Const { bits: 0 },
            Instruction::Call { function_index: 0 },
            Instruction::End,
        ];
        let signature = Signature::new(vec![], vec![ValueKind::I64]);
        let code = run(Arc::new(tables), signature, &body).unwrap().finish().unwrap();
        assert!(code.ops.contains(&TargetOp::Call(CallTarget::Import(0))));
    }

    #[test]
    fn instructions_serialize_with_an_instruction_tag() {
        let body = vec![
            Instruction::Load {
                op: LoadOp::I64Load32S,
                memarg: MemArg::new(2, 16),
            },
            Instruction::Binary {
                kind: ValueKind::F32,
                op: BinaryOp::Copysign,
            },
            Instruction::Convert {
                op: ConvertOp::I32TruncF64U,
            },
            Instruction::Block {
                block_type: BlockType::Value(ValueKind::I64),
            },
            Instruction::End,
        ];
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""instruction":"load","op":"i64_load32_s""#));
        let back: Vec<Instruction> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn instructions_after_final_end_are_rejected() {
        let body = [Instruction::End, Instruction::Nop];
        let err = run(Arc::new(ModuleTables::new()), Signature::default(), &body).unwrap_err();
        assert!(matches!(err, CodegenError::InvalidControlState { .. }));
    }
}
