//! Shared types for the stackc compiler.
//!
//! This crate defines the value kinds, block types, function signatures and
//! read-only module tables used by the code generator and the module driver.

mod module;
mod signature;
mod value;

pub use module::{
    CallTarget, FunctionRef, GlobalDescriptor, MemoryDescriptor, ModuleTables, TableDescriptor,
};
pub use signature::Signature;
pub use value::{BlockType, StackSlot, ValueKind};
