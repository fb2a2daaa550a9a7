//! The code-emitter capability.
//!
//! The compilation context never builds target code itself; it drives an
//! injected [`CodeEmitter`] through four primitives. The workspace ships one
//! implementation, [`crate::assembler::Assembler`], but the context does not
//! depend on how the primitives are realized.

use serde::{Deserialize, Serialize};
use stackc_types::ValueKind;
use std::fmt;

use crate::target::TargetOp;

/// Handle to a position in the emitted code, usable as a jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A local storage slot declared on the emitter (parameters are not slots).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalSlot(pub u32);

impl fmt::Display for LocalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loc{}", self.0)
    }
}

/// Handle to a materialized helper routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HelperHandle(pub u32);

impl fmt::Display for HelperHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "helper{}", self.0)
    }
}

/// Opaque target-code sink.
pub trait CodeEmitter {
    /// Create a new, not yet positioned label.
    fn define_label(&mut self) -> Label;

    /// Bind `label` to the current position.
    fn mark_label(&mut self, label: Label);

    /// Append one target operation.
    fn emit(&mut self, op: TargetOp);

    /// Declare a local storage slot of the given kind.
    fn declare_local(&mut self, kind: ValueKind) -> LocalSlot;
}

impl<E: CodeEmitter + ?Sized> CodeEmitter for &mut E {
    fn define_label(&mut self) -> Label {
        (**self).define_label()
    }

    fn mark_label(&mut self, label: Label) {
        (**self).mark_label(label)
    }

    fn emit(&mut self, op: TargetOp) {
        (**self).emit(op)
    }

    fn declare_local(&mut self, kind: ValueKind) -> LocalSlot {
        (**self).declare_local(kind)
    }
}
