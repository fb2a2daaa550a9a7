//! Label-resolving emitter.
//!
//! [`Assembler`] realizes the [`CodeEmitter`] capability as a flat list of
//! [`TargetOp`]s. Labels may be referenced before they are marked; `finish`
//! checks that every referenced label ended up bound to exactly one position
//! and produces an [`AssembledCode`] listing.

use serde::{Deserialize, Serialize};
use stackc_types::ValueKind;

use crate::emitter::{CodeEmitter, Label, LocalSlot};
use crate::error::{CodegenError, CodegenResult};
use crate::target::TargetOp;

/// Collects target operations for one function or helper routine.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    params: Vec<ValueKind>,
    locals: Vec<ValueKind>,
    ops: Vec<TargetOp>,
    /// Label index → op offset it is bound to.
    marks: Vec<Option<usize>>,
    /// First label that was marked twice, reported by `finish`.
    rebound: Option<Label>,
}

impl Assembler {
    /// Create an assembler for code taking the given parameters.
    pub fn new(params: &[ValueKind]) -> Self {
        Self {
            params: params.to_vec(),
            ..Self::default()
        }
    }

    /// Number of operations emitted so far.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[TargetOp] {
        &self.ops
    }

    /// Resolve labels and produce the final listing.
    pub fn finish(self) -> CodegenResult<AssembledCode> {
        if let Some(label) = self.rebound {
            return Err(CodegenError::control(
                "label",
                format!("{label} was marked more than once"),
            ));
        }
        for op in &self.ops {
            for label in op.jump_targets() {
                let bound = self
                    .marks
                    .get(label.0 as usize)
                    .copied()
                    .flatten()
                    .is_some();
                if !bound {
                    return Err(CodegenError::UnresolvedLabel { label: label.0 });
                }
            }
        }
        Ok(AssembledCode {
            params: self.params,
            locals: self.locals,
            ops: self.ops,
            labels: self.marks,
        })
    }
}

impl CodeEmitter for Assembler {
    fn define_label(&mut self) -> Label {
        self.marks.push(None);
        Label((self.marks.len() - 1) as u32)
    }

    fn mark_label(&mut self, label: Label) {
        let position = self.ops.len();
        match self.marks.get_mut(label.0 as usize) {
            Some(slot) if slot.is_none() => *slot = Some(position),
            _ => {
                self.rebound.get_or_insert(label);
            }
        }
    }

    fn emit(&mut self, op: TargetOp) {
        self.ops.push(op);
    }

    fn declare_local(&mut self, kind: ValueKind) -> LocalSlot {
        self.locals.push(kind);
        LocalSlot((self.locals.len() - 1) as u32)
    }
}

/// Finished target code with every label resolved to an op offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledCode {
    pub params: Vec<ValueKind>,
    pub locals: Vec<ValueKind>,
    pub ops: Vec<TargetOp>,
    /// Label index → op offset (`None` for labels that were never needed).
    pub labels: Vec<Option<usize>>,
}

impl AssembledCode {
    /// Op offset a label is bound to.
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Human-readable listing, one op per line, labels on their own lines.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (offset, op) in self.ops.iter().enumerate() {
            self.write_labels_at(offset, &mut out);
            out.push_str(&format!("  {offset:>4}: {op}\n"));
        }
        self.write_labels_at(self.ops.len(), &mut out);
        out
    }

    fn write_labels_at(&self, offset: usize, out: &mut String) {
        for (index, bound) in self.labels.iter().enumerate() {
            if *bound == Some(offset) {
                out.push_str(&format!("L{index}:\n"));
            }
        }
    }
}
