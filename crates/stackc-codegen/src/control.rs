//! Structured control flow.
//!
//! Blocks, loops and `if`/`else` open nesting levels on the context; `end`
//! closes them and binds their labels. Branches validate the operands they
//! carry against the target level and, when the stack holds more than the
//! target expects, unwind the surplus through scratch locals so that every
//! path reaches a label with the same stack shape.
//!
//! Label layout for `if (bt) A else B end`:
//!
//! ```text
//!     jump_if_zero ALT
//!     A
//!     jump END
//! ALT:
//!     B
//! END:
//! ```

use smallvec::SmallVec;
use stackc_types::{BlockType, ValueKind};
use tracing::trace;

use crate::context::{BlockKind, CompilationContext, Operands};
use crate::emitter::{CodeEmitter, Label};
use crate::error::{CodegenError, CodegenResult};
use crate::target::{TargetOp, TrapCode};

/// Top-of-stack-first expectations for values listed bottom first.
fn top_first(kinds: &[ValueKind]) -> Operands {
    kinds.iter().rev().map(|kind| Some(*kind)).collect()
}

impl<E: CodeEmitter> CompilationContext<E> {
    // ── Nesting ──────────────────────────────────────────────────────────

    pub fn compile_block(&mut self, block_type: BlockType) -> CodegenResult<()> {
        self.top_index("block")?;
        self.enter_block(BlockKind::Block, block_type);
        Ok(())
    }

    pub fn compile_loop(&mut self, block_type: BlockType) -> CodegenResult<()> {
        self.top_index("loop")?;
        let header = self.define_label()?;
        self.mark_label(header)?;
        self.enter_block(BlockKind::Loop, block_type);
        if let Some(slot) = self.loop_labels.last_mut() {
            *slot = Some(header);
        }
        Ok(())
    }

    pub fn compile_if(&mut self, block_type: BlockType) -> CodegenResult<()> {
        self.pop_kind("if", Some(ValueKind::I32))?;
        let alternate = self.define_label()?;
        self.emit(TargetOp::JumpIfZero(alternate))?;
        self.enter_block(BlockKind::If, block_type);
        if let Some(pending) = self.labels.last_mut() {
            pending.alternate = Some(alternate);
        }
        Ok(())
    }

    pub fn compile_else(&mut self) -> CodegenResult<()> {
        let top = self.top_index("else")?;
        if self.block_contexts[top].kind != BlockKind::If {
            return Err(CodegenError::control("else", "else without matching if"));
        }
        self.check_block_result("else", top)?;

        let after_else = self.branch_label(top)?;
        self.emit(TargetOp::Jump(after_else))?;
        let alternate = self.labels[top]
            .alternate
            .take()
            .ok_or_else(|| CodegenError::control("else", "if has no pending false-arm label"))?;
        self.mark_label(alternate)?;

        let base = self.block_contexts[top].initial_stack_height;
        self.stack.truncate(base);
        self.block_contexts[top].kind = BlockKind::Else;
        self.mark_reachable();
        trace!(
            target: "stackc::codegen::context",
            depth = top + 1,
            %alternate,
            %after_else,
            "else arm"
        );
        Ok(())
    }

    pub fn compile_end(&mut self) -> CodegenResult<()> {
        let top = self.top_index("end")?;
        let frame = self.block_contexts[top];
        let block_type = self.depth[top];

        if frame.kind == BlockKind::If && block_type.arity() > 0 {
            return Err(CodegenError::control(
                "end",
                format!("if without else cannot produce {block_type}"),
            ));
        }
        self.check_block_result("end", top)?;

        let pending = self.labels[top];
        if let Some(alternate) = pending.alternate {
            self.mark_label(alternate)?;
        }
        if let Some(end) = pending.end {
            self.mark_label(end)?;
        }

        if frame.kind == BlockKind::Function {
            self.emit(TargetOp::Return)?;
            self.exit_block();
            return Ok(());
        }
        self.exit_block();
        if let Some(kind) = block_type.kind() {
            self.push_kind(kind);
        }
        Ok(())
    }

    /// Validate the values a level yields at `else`/`end` and reject leftovers.
    fn check_block_result(&mut self, opcode: &str, top: usize) -> CodegenResult<()> {
        let results: SmallVec<[ValueKind; 2]> = match self.block_contexts[top].kind {
            BlockKind::Function => self.signature().results().iter().copied().collect(),
            _ => self.depth[top].kind().into_iter().collect(),
        };
        let base = self.block_contexts[top].initial_stack_height;
        let height = self.stack.len();
        self.pop_stack(opcode, &top_first(&results))?;
        if self.stack.len() > base {
            return Err(CodegenError::StackHeightMismatch {
                opcode: opcode.to_string(),
                expected: base + results.len(),
                actual: height,
            });
        }
        Ok(())
    }

    // ── Branches ─────────────────────────────────────────────────────────

    pub fn compile_br(&mut self, relative_depth: u32) -> CodegenResult<()> {
        let target = self.resolve_depth("br", relative_depth)?;
        let carried = self.label_types(target);
        self.peek_stack("br", &top_first(&carried))?;
        let label = self.branch_label(target)?;
        if self.branch_surplus(target, carried.len()) > 0 {
            self.emit_unwind(target, &carried)?;
        }
        self.emit(TargetOp::Jump(label))?;
        self.mark_unreachable(false);
        Ok(())
    }

    pub fn compile_br_if(&mut self, relative_depth: u32) -> CodegenResult<()> {
        self.pop_kind("br_if", Some(ValueKind::I32))?;
        let target = self.resolve_depth("br_if", relative_depth)?;
        let carried = self.label_types(target);
        self.peek_stack("br_if", &top_first(&carried))?;
        let label = self.branch_label(target)?;

        if self.branch_surplus(target, carried.len()) == 0 {
            return self.emit(TargetOp::JumpIfNonZero(label));
        }
        let fall_through = self.define_label()?;
        self.emit(TargetOp::JumpIfZero(fall_through))?;
        self.emit_unwind(target, &carried)?;
        self.emit(TargetOp::Jump(label))?;
        self.mark_label(fall_through)
    }

    pub fn compile_br_table(&mut self, targets: &[u32], default: u32) -> CodegenResult<()> {
        self.pop_kind("br_table", Some(ValueKind::I32))?;
        let default_target = self.resolve_depth("br_table", default)?;
        let carried = self.label_types(default_target);

        let mut levels = Vec::with_capacity(targets.len());
        for &relative in targets {
            let level = self.resolve_depth("br_table", relative)?;
            let types = self.label_types(level);
            if types.len() != carried.len() {
                return Err(CodegenError::control(
                    "br_table",
                    format!(
                        "target depth {relative} carries {} value(s), default carries {}",
                        types.len(),
                        carried.len()
                    ),
                ));
            }
            if let Some((want, got)) = carried.iter().zip(&types).find(|(want, got)| want != got) {
                return Err(CodegenError::StackTypeMismatch {
                    opcode: "br_table".to_string(),
                    expected: *want,
                    actual: *got,
                });
            }
            levels.push(level);
        }
        self.peek_stack("br_table", &top_first(&carried))?;

        let needs_unwind = levels
            .iter()
            .chain(std::iter::once(&default_target))
            .any(|&level| self.branch_surplus(level, carried.len()) > 0);

        if needs_unwind {
            // One trampoline per distinct target level.
            let mut trampolines: Vec<(usize, Label)> = Vec::new();
            let mut table = Vec::with_capacity(levels.len());
            for &level in &levels {
                table.push(self.trampoline(&mut trampolines, level)?);
            }
            let default_label = self.trampoline(&mut trampolines, default_target)?;
            self.emit(TargetOp::JumpTable {
                targets: table,
                default: default_label,
            })?;
            for (level, trampoline) in trampolines {
                self.mark_label(trampoline)?;
                let label = self.branch_label(level)?;
                if self.branch_surplus(level, carried.len()) > 0 {
                    self.emit_unwind(level, &carried)?;
                }
                self.emit(TargetOp::Jump(label))?;
            }
        } else {
            let mut table = Vec::with_capacity(levels.len());
            for &level in &levels {
                table.push(self.branch_label(level)?);
            }
            let default_label = self.branch_label(default_target)?;
            self.emit(TargetOp::JumpTable {
                targets: table,
                default: default_label,
            })?;
        }

        self.mark_unreachable(false);
        Ok(())
    }

    fn trampoline(
        &mut self,
        trampolines: &mut Vec<(usize, Label)>,
        level: usize,
    ) -> CodegenResult<Label> {
        if let Some((_, label)) = trampolines.iter().find(|(seen, _)| *seen == level) {
            return Ok(*label);
        }
        let label = self.define_label()?;
        trampolines.push((level, label));
        Ok(label)
    }

    /// Operands a branch to `target` must discard below the carried values.
    fn branch_surplus(&self, target: usize, arity: usize) -> usize {
        if self.is_unreachable() {
            return 0;
        }
        let base = self.block_contexts[target].initial_stack_height;
        self.stack.len().saturating_sub(base + arity)
    }

    /// Stash the carried values, drop the surplus below them, reload.
    fn emit_unwind(&mut self, target: usize, carried: &[ValueKind]) -> CodegenResult<()> {
        let surplus = self.branch_surplus(target, carried.len());
        let mut stashed: SmallVec<[(ValueKind, usize); 2]> = SmallVec::new();
        for &kind in carried.iter().rev() {
            let ordinal = stashed.iter().filter(|(seen, _)| *seen == kind).count();
            stashed.push((kind, ordinal));
        }
        for &(kind, ordinal) in &stashed {
            let slot = self.scratch_local(kind, ordinal)?;
            self.emit(TargetOp::StoreLocal(slot))?;
        }
        for _ in 0..surplus {
            self.emit(TargetOp::Drop)?;
        }
        for &(kind, ordinal) in stashed.iter().rev() {
            let slot = self.scratch_local(kind, ordinal)?;
            self.emit(TargetOp::LoadLocal(slot))?;
        }
        Ok(())
    }

    // ── Function exits ───────────────────────────────────────────────────

    pub fn compile_return(&mut self) -> CodegenResult<()> {
        let results: SmallVec<[ValueKind; 2]> = self.signature().results().iter().copied().collect();
        self.pop_stack("return", &top_first(&results))?;
        self.emit(TargetOp::Return)?;
        self.mark_unreachable(true);
        Ok(())
    }

    pub fn compile_unreachable(&mut self) -> CodegenResult<()> {
        self.top_index("unreachable")?;
        self.emit(TargetOp::Trap(TrapCode::Unreachable))?;
        self.mark_unreachable(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stackc_types::{ModuleTables, Signature};

    use super::*;
    use crate::assembler::Assembler;

    fn context(params: &[ValueKind], results: &[ValueKind]) -> CompilationContext<Assembler> {
        let mut ctx = CompilationContext::new(Arc::new(ModuleTables::new()));
        let signature = Arc::new(Signature::new(params.to_vec(), results.to_vec()));
        ctx.reset(Assembler::new(params), signature, &[]);
        ctx
    }

    #[test]
    fn loop_header_is_marked_at_entry() {
        let mut ctx = context(&[], &[]);
        ctx.compile_loop(BlockType::Empty).unwrap();
        let header = ctx.loop_label(1).unwrap();
        assert_eq!(ctx.emitter().unwrap().len(), 0);
        ctx.compile_br(0).unwrap();
        assert_eq!(ctx.emitter().unwrap().ops(), &[TargetOp::Jump(header)]);
    }

    #[test]
    fn branch_to_loop_carries_nothing() {
        let mut ctx = context(&[], &[]);
        ctx.compile_loop(BlockType::Value(ValueKind::I32)).unwrap();
        ctx.compile_br(0).unwrap();
        assert!(ctx.is_unreachable());
    }

    #[test]
    fn if_without_else_rejects_a_result() {
        let mut ctx = context(&[ValueKind::I32], &[]);
        ctx.push_kind(ValueKind::I32);
        ctx.compile_if(BlockType::Value(ValueKind::I64)).unwrap();
        ctx.push_kind(ValueKind::I64);
        assert!(matches!(
            ctx.compile_end(),
            Err(CodegenError::InvalidControlState { .. })
        ));
    }

    #[test]
    fn surplus_operands_are_unwound_before_br() {
        let mut ctx = context(&[], &[]);
        ctx.compile_block(BlockType::Value(ValueKind::I32)).unwrap();
        ctx.push_kind(ValueKind::F64);
        ctx.push_kind(ValueKind::I32);
        ctx.compile_br(0).unwrap();
        let ops = ctx.emitter().unwrap().ops().to_vec();
        assert!(matches!(ops[0], TargetOp::StoreLocal(_)));
        assert_eq!(ops[1], TargetOp::Drop);
        assert!(matches!(ops[2], TargetOp::LoadLocal(_)));
        assert!(matches!(ops[3], TargetOp::Jump(_)));
    }

    #[test]
    fn else_requires_an_if() {
        let mut ctx = context(&[], &[]);
        ctx.compile_block(BlockType::Empty).unwrap();
        assert!(matches!(
            ctx.compile_else(),
            Err(CodegenError::InvalidControlState { .. })
        ));
    }
}
