//! stackc code generator: validates stack bytecode and emits target code.
//!
//! # Architecture
//!
//! A [`CompilationContext`] is created once per worker and reset for every
//! function body. Each [`Instruction`] checks its operands against the
//! context's abstract operand stack and drives an injected [`CodeEmitter`]:
//!
//! - structured control (`block`, `loop`, `if`/`else`, `end`, branches) maps
//!   onto labels and jumps, see [`control`];
//! - code after an unconditional transfer is validated against a polymorphic
//!   stack that fabricates missing operands down to the block's base height;
//! - checked float-to-integer truncations call shared [`helpers`] routines,
//!   materialized once per context.
//!
//! ## Target code
//!
//! [`Assembler`] is the bundled emitter. It records [`TargetOp`]s and
//! resolves labels into an [`AssembledCode`] listing.

pub mod assembler;
pub mod context;
pub mod control;
pub mod emitter;
pub mod error;
pub mod helpers;
pub mod instruction;
pub mod ops;
pub mod target;

pub use assembler::{AssembledCode, Assembler};
pub use context::{BlockContext, BlockKind, CompilationContext, Operands};
pub use emitter::{CodeEmitter, HelperHandle, Label, LocalSlot};
pub use error::{CodegenError, CodegenResult, ErrorCategory, IndexSpace};
pub use helpers::{HelperCache, HelperId, HelperRoutine};
pub use instruction::Instruction;
pub use ops::{BinaryOp, CompareOp, ConvertOp, LoadOp, MemArg, StoreOp, UnaryOp};
pub use target::{Literal, TargetOp, TrapCode};
