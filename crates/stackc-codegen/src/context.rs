//! Per-function compilation state.
//!
//! A [`CompilationContext`] owns everything that changes while one function
//! body is compiled: the abstract operand stack, the depth stack of open
//! blocks with their [`BlockContext`]s, the pending branch labels per depth
//! and the loop-header labels. It is reset, not reallocated, between
//! functions. Module tables are shared read-only through an `Arc`.
//!
//! Invariant: `depth.len() == block_contexts.len() == labels.len() ==
//! loop_labels.len()` at all times.

use std::sync::Arc;

use smallvec::SmallVec;
use stackc_types::{BlockType, ModuleTables, Signature, StackSlot, ValueKind};
use tracing::trace;

use crate::assembler::AssembledCode;
use crate::emitter::{CodeEmitter, HelperHandle, Label, LocalSlot};
use crate::error::{CodegenError, CodegenResult, IndexSpace};
use crate::helpers::{HelperCache, HelperId, HelperRoutine};
use crate::target::TargetOp;

/// Operand kinds consumed or inspected by one instruction, top of stack first.
pub type Operands = SmallVec<[StackSlot; 4]>;

/// Construct that opened a nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// The implicit block around the whole function body.
    Function,
    Block,
    Loop,
    If,
    /// An `if` whose `else` arm is being compiled.
    Else,
}

/// Bookkeeping for one open nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    /// Operand stack height when the block was entered. Never changes.
    pub initial_stack_height: usize,
    /// Cleared once control provably cannot fall through the current point.
    pub reachable: bool,
    pub kind: BlockKind,
}

/// Labels still waiting to be bound for one depth.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PendingLabels {
    /// Forward branch target at the block's end, created on first use.
    pub(crate) end: Option<Label>,
    /// Entry of the false arm of an `if`, bound at `else` or `end`.
    pub(crate) alternate: Option<Label>,
}

// ══════════════════════════════════════════════════════════════════════════════
// CompilationContext
// ══════════════════════════════════════════════════════════════════════════════

/// The per-function compiler state machine.
pub struct CompilationContext<E> {
    tables: Arc<ModuleTables>,
    emitter: Option<E>,
    signature: Arc<Signature>,
    /// Parameter kinds followed by body-local kinds.
    locals: Vec<ValueKind>,
    /// Emitter slots backing the body locals (parameters have none).
    local_slots: Vec<LocalSlot>,
    /// Scratch slots used to unwind operands before a branch.
    scratch: Vec<(ValueKind, LocalSlot)>,

    pub(crate) depth: Vec<BlockType>,
    pub(crate) block_contexts: Vec<BlockContext>,
    pub(crate) labels: Vec<PendingLabels>,
    pub(crate) loop_labels: Vec<Option<Label>>,
    pub(crate) stack: Vec<StackSlot>,

    // Helper routines live for the whole module; `reset` keeps them.
    helpers: HelperCache,
    routines: Vec<HelperRoutine>,
    helper_routines: bool,
}

impl<E: CodeEmitter> CompilationContext<E> {
    /// Create an idle context bound to the module's tables.
    pub fn new(tables: Arc<ModuleTables>) -> Self {
        Self {
            tables,
            emitter: None,
            signature: Arc::new(Signature::default()),
            locals: Vec::new(),
            local_slots: Vec::new(),
            scratch: Vec::new(),
            depth: Vec::new(),
            block_contexts: Vec::new(),
            labels: Vec::new(),
            loop_labels: Vec::new(),
            stack: Vec::new(),
            helpers: HelperCache::new(),
            routines: Vec::new(),
            helper_routines: true,
        }
    }

    /// Choose whether checked truncations call shared helper routines
    /// (the default) or the target's own trapping conversion.
    pub fn with_helper_routines(mut self, enabled: bool) -> Self {
        self.helper_routines = enabled;
        self
    }

    pub fn helper_routines_enabled(&self) -> bool {
        self.helper_routines
    }

    /// Prepare for compiling a new function body.
    ///
    /// Body locals (not parameters) are declared on `emitter` in order.
    pub fn reset(&mut self, mut emitter: E, signature: Arc<Signature>, locals: &[ValueKind]) {
        self.depth.clear();
        self.block_contexts.clear();
        self.labels.clear();
        self.loop_labels.clear();
        self.stack.clear();
        self.scratch.clear();
        self.local_slots.clear();

        self.locals.clear();
        self.locals.extend_from_slice(signature.params());
        self.locals.extend_from_slice(locals);
        for &kind in locals {
            self.local_slots.push(emitter.declare_local(kind));
        }

        self.depth.push(signature.block_type());
        self.block_contexts.push(BlockContext {
            initial_stack_height: 0,
            reachable: true,
            kind: BlockKind::Function,
        });
        self.labels.push(PendingLabels::default());
        self.loop_labels.push(None);

        self.signature = signature;
        self.emitter = Some(emitter);
    }

    /// Hand back the emitter once the function's final `end` was compiled.
    pub fn finish(&mut self) -> CodegenResult<E> {
        if !self.depth.is_empty() {
            return Err(CodegenError::control(
                "end",
                format!("function body ended with {} open block(s)", self.depth.len()),
            ));
        }
        self.emitter
            .take()
            .ok_or_else(|| CodegenError::control("end", "no function is being compiled"))
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn tables(&self) -> &Arc<ModuleTables> {
        &self.tables
    }

    pub fn signature(&self) -> &Arc<Signature> {
        &self.signature
    }

    /// Number of open blocks, including the function-level block.
    pub fn depth(&self) -> usize {
        self.depth.len()
    }

    pub fn block_context_count(&self) -> usize {
        self.block_contexts.len()
    }

    pub fn current_block(&self) -> Option<&BlockContext> {
        self.block_contexts.last()
    }

    /// Declared block type of the level at `depth_index` (0 = function level).
    pub fn block_type(&self, depth_index: usize) -> Option<BlockType> {
        self.depth.get(depth_index).copied()
    }

    pub fn stack(&self) -> &[StackSlot] {
        &self.stack
    }

    pub fn stack_height(&self) -> usize {
        self.stack.len()
    }

    /// The label the matching `end` will bind for the level at `depth_index`.
    pub fn pending_label(&self, depth_index: usize) -> Option<Label> {
        self.labels
            .get(depth_index)
            .and_then(|pending| pending.alternate.or(pending.end))
    }

    /// Loop-header label of the level at `depth_index`, if it is a loop.
    pub fn loop_label(&self, depth_index: usize) -> Option<Label> {
        self.loop_labels.get(depth_index).copied().flatten()
    }

    pub fn emitter(&self) -> Option<&E> {
        self.emitter.as_ref()
    }

    // ── Operand stack ────────────────────────────────────────────────────

    pub fn push(&mut self, slot: StackSlot) {
        self.stack.push(slot);
    }

    pub fn push_kind(&mut self, kind: ValueKind) {
        self.stack.push(Some(kind));
    }

    /// Pop one operand per expectation, top of stack first.
    ///
    /// Below the current block's base height an unreachable block fabricates
    /// the expected kind while a reachable one reports a stack underflow. A
    /// popped wildcard adopts the expected kind. Returns the resolved kinds.
    pub fn pop_stack(&mut self, opcode: &str, expected: &[StackSlot]) -> CodegenResult<Operands> {
        let frame = *self.frame(opcode)?;
        let mut resolved = Operands::new();
        for &want in expected {
            let top = if self.stack.len() > frame.initial_stack_height {
                self.stack.pop()
            } else {
                None
            };
            let Some(actual) = top else {
                if frame.reachable {
                    return Err(CodegenError::StackUnderflow {
                        opcode: opcode.to_string(),
                        expected: expected.len(),
                    });
                }
                resolved.push(want);
                continue;
            };
            match (actual, want) {
                (Some(actual), Some(want)) if actual != want => {
                    return Err(CodegenError::StackTypeMismatch {
                        opcode: opcode.to_string(),
                        expected: want,
                        actual,
                    });
                }
                (Some(actual), _) => resolved.push(Some(actual)),
                (None, want) => resolved.push(want),
            }
        }
        Ok(resolved)
    }

    /// Pop a single operand of the given kind (or any kind for `None`).
    pub fn pop_kind(&mut self, opcode: &str, expected: StackSlot) -> CodegenResult<StackSlot> {
        let popped = self.pop_stack(opcode, &[expected])?;
        Ok(popped.first().copied().flatten())
    }

    /// Validate like [`pop_stack`](Self::pop_stack) without consuming.
    pub fn peek_stack(&mut self, opcode: &str, expected: &[StackSlot]) -> CodegenResult<Operands> {
        let resolved = self.pop_stack(opcode, expected)?;
        for slot in resolved.iter().rev() {
            self.stack.push(*slot);
        }
        Ok(resolved)
    }

    // ── Reachability ─────────────────────────────────────────────────────

    /// Mark the current block unreachable and drop its operands.
    ///
    /// With `function_wide`, every enclosing block down to depth 1 is marked
    /// as well; the function-level block keeps its flag unless it is the
    /// current one.
    pub fn mark_unreachable(&mut self, function_wide: bool) {
        let Some(current) = self.block_contexts.len().checked_sub(1) else {
            return;
        };
        self.block_contexts[current].reachable = false;
        if function_wide {
            for frame in self.block_contexts.iter_mut().skip(1) {
                frame.reachable = false;
            }
        }
        let height = self.block_contexts[current].initial_stack_height;
        self.stack.truncate(height);
        trace!(
            target: "stackc::codegen::context",
            depth = current,
            function_wide,
            "marked unreachable"
        );
    }

    /// Clear the unreachable flag of the current block only.
    pub fn mark_reachable(&mut self) {
        if let Some(frame) = self.block_contexts.last_mut() {
            frame.reachable = true;
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.block_contexts.last().is_some_and(|frame| !frame.reachable)
    }

    // ── Emission ─────────────────────────────────────────────────────────

    fn emitter_mut(&mut self) -> CodegenResult<&mut E> {
        self.emitter
            .as_mut()
            .ok_or_else(|| CodegenError::control("emit", "no function is being compiled"))
    }

    pub fn emit(&mut self, op: TargetOp) -> CodegenResult<()> {
        self.emitter_mut()?.emit(op);
        Ok(())
    }

    pub fn define_label(&mut self) -> CodegenResult<Label> {
        Ok(self.emitter_mut()?.define_label())
    }

    pub fn mark_label(&mut self, label: Label) -> CodegenResult<()> {
        self.emitter_mut()?.mark_label(label);
        Ok(())
    }

    // ── Locals and module entities ───────────────────────────────────────

    pub fn local_kind(&self, opcode: &str, index: u32) -> CodegenResult<ValueKind> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| CodegenError::IndexOutOfRange {
                opcode: opcode.to_string(),
                space: IndexSpace::Local,
                index,
            })
    }

    /// Target operation reading local `index` (parameters first).
    pub fn local_load(&self, opcode: &str, index: u32) -> CodegenResult<TargetOp> {
        match self.local_binding(opcode, index)? {
            LocalBinding::Param(arg) => Ok(TargetOp::LoadArg(arg)),
            LocalBinding::Slot(slot) => Ok(TargetOp::LoadLocal(slot)),
        }
    }

    /// Target operation writing local `index` (parameters first).
    pub fn local_store(&self, opcode: &str, index: u32) -> CodegenResult<TargetOp> {
        match self.local_binding(opcode, index)? {
            LocalBinding::Param(arg) => Ok(TargetOp::StoreArg(arg)),
            LocalBinding::Slot(slot) => Ok(TargetOp::StoreLocal(slot)),
        }
    }

    fn local_binding(&self, opcode: &str, index: u32) -> CodegenResult<LocalBinding> {
        let params = self.signature.params().len();
        let position = index as usize;
        if position < params {
            return Ok(LocalBinding::Param(index));
        }
        self.local_slots
            .get(position - params)
            .map(|slot| LocalBinding::Slot(*slot))
            .ok_or_else(|| CodegenError::IndexOutOfRange {
                opcode: opcode.to_string(),
                space: IndexSpace::Local,
                index,
            })
    }

    /// The `ordinal`-th scratch slot of `kind`, declared on first use.
    pub(crate) fn scratch_local(&mut self, kind: ValueKind, ordinal: usize) -> CodegenResult<LocalSlot> {
        let existing = self
            .scratch
            .iter()
            .filter(|(scratch_kind, _)| *scratch_kind == kind)
            .nth(ordinal)
            .map(|(_, slot)| *slot);
        if let Some(slot) = existing {
            return Ok(slot);
        }
        let slot = self.emitter_mut()?.declare_local(kind);
        self.scratch.push((kind, slot));
        Ok(slot)
    }

    // ── Helper routines ──────────────────────────────────────────────────

    /// Return the cached handle for `id`, materializing it through `factory`
    /// on first use.
    pub fn get_or_create_helper<F>(&mut self, id: HelperId, factory: F) -> CodegenResult<HelperHandle>
    where
        F: FnOnce(HelperId, &mut Self) -> CodegenResult<HelperHandle>,
    {
        if let Some(handle) = self.helpers.get(id) {
            return Ok(handle);
        }
        let handle = factory(id, self)?;
        self.helpers.insert(id, handle);
        Ok(handle)
    }

    /// Store a materialized routine and return the handle that calls it.
    pub fn register_routine(&mut self, id: HelperId, code: AssembledCode) -> HelperHandle {
        let handle = HelperHandle(self.routines.len() as u32);
        self.routines.push(HelperRoutine { id, handle, code });
        handle
    }

    pub fn routines(&self) -> &[HelperRoutine] {
        &self.routines
    }

    /// Consume the context, yielding every routine materialized through it.
    pub fn into_routines(self) -> Vec<HelperRoutine> {
        self.routines
    }

    // ── Block bookkeeping ────────────────────────────────────────────────

    fn frame(&self, opcode: &str) -> CodegenResult<&BlockContext> {
        self.block_contexts
            .last()
            .ok_or_else(|| CodegenError::control(opcode, "no open block"))
    }

    /// Index of the innermost open level.
    pub(crate) fn top_index(&self, opcode: &str) -> CodegenResult<usize> {
        self.block_contexts
            .len()
            .checked_sub(1)
            .ok_or_else(|| CodegenError::control(opcode, "no open block"))
    }

    /// Translate a relative branch depth into a level index.
    pub(crate) fn resolve_depth(&self, opcode: &str, relative: u32) -> CodegenResult<usize> {
        let top = self.top_index(opcode)?;
        top.checked_sub(relative as usize).ok_or_else(|| {
            CodegenError::control(
                opcode,
                format!("branch depth {relative} exceeds nesting depth {}", top + 1),
            )
        })
    }

    pub(crate) fn enter_block(&mut self, kind: BlockKind, block_type: BlockType) {
        self.depth.push(block_type);
        self.block_contexts.push(BlockContext {
            initial_stack_height: self.stack.len(),
            reachable: true,
            kind,
        });
        self.labels.push(PendingLabels::default());
        self.loop_labels.push(None);
        trace!(
            target: "stackc::codegen::context",
            depth = self.depth.len(),
            ?kind,
            %block_type,
            "open block"
        );
    }

    pub(crate) fn exit_block(&mut self) {
        self.depth.pop();
        self.block_contexts.pop();
        self.labels.pop();
        self.loop_labels.pop();
        trace!(target: "stackc::codegen::context", depth = self.depth.len(), "close block");
    }

    /// Kinds a branch to level `target` carries, bottom of stack first.
    pub(crate) fn label_types(&self, target: usize) -> SmallVec<[ValueKind; 2]> {
        if self.loop_labels[target].is_some() {
            return SmallVec::new();
        }
        match self.block_contexts[target].kind {
            BlockKind::Function => self.signature.results().iter().copied().collect(),
            _ => self.depth[target].kind().into_iter().collect(),
        }
    }

    /// Jump target for a branch to level `target`.
    pub(crate) fn branch_label(&mut self, target: usize) -> CodegenResult<Label> {
        if let Some(header) = self.loop_labels[target] {
            return Ok(header);
        }
        if let Some(end) = self.labels[target].end {
            return Ok(end);
        }
        let label = self.define_label()?;
        self.labels[target].end = Some(label);
        Ok(label)
    }
}

enum LocalBinding {
    Param(u32),
    Slot(LocalSlot),
}
