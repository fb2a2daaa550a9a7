//! Module-level tables handed to every function compilation.
//!
//! All tables are fully populated before the first function is compiled and
//! are never mutated afterwards, so a single `Arc<ModuleTables>` can be
//! shared by any number of workers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::signature::Signature;
use crate::value::ValueKind;

/// Where a call instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum CallTarget {
    /// An imported host function, by import order.
    Import(u32),
    /// A function defined in the module, by definition order.
    Defined(u32),
}

/// A resolved callable: its signature plus the target it binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    pub signature: Arc<Signature>,
    pub target: CallTarget,
}

/// Type and mutability of a module global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDescriptor {
    pub kind: ValueKind,
    pub mutable: bool,
}

/// Limits of the module's linear memory, in 64 KiB pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDescriptor {
    pub minimum_pages: u64,
    pub maximum_pages: Option<u64>,
}

/// Limits of the module's function table, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub minimum: u64,
    pub maximum: Option<u64>,
}

/// Read-only module tables consulted while compiling function bodies.
#[derive(Debug, Clone, Default)]
pub struct ModuleTables {
    /// Function signatures by type index.
    pub types: Vec<Arc<Signature>>,
    /// Callable targets by function index (imports first).
    pub functions: Vec<FunctionRef>,
    /// Globals by global index (imports first).
    pub globals: Vec<GlobalDescriptor>,
    /// Presence implies memory instructions are legal.
    pub memory: Option<MemoryDescriptor>,
    /// Presence implies `call_indirect` is legal.
    pub table: Option<TableDescriptor>,
}

impl ModuleTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signature, returning its type index.
    pub fn add_type(&mut self, signature: Signature) -> u32 {
        self.types.push(Arc::new(signature));
        (self.types.len() - 1) as u32
    }

    /// Register a callable bound to an existing type index.
    ///
    /// Returns `None` when the type index is unknown.
    pub fn add_function(&mut self, type_index: u32, target: CallTarget) -> Option<u32> {
        let signature = self.types.get(type_index as usize)?.clone();
        self.functions.push(FunctionRef { signature, target });
        Some((self.functions.len() - 1) as u32)
    }

    pub fn add_global(&mut self, kind: ValueKind, mutable: bool) -> u32 {
        self.globals.push(GlobalDescriptor { kind, mutable });
        (self.globals.len() - 1) as u32
    }

    pub fn signature(&self, type_index: u32) -> Option<&Arc<Signature>> {
        self.types.get(type_index as usize)
    }

    pub fn function(&self, func_index: u32) -> Option<&FunctionRef> {
        self.functions.get(func_index as usize)
    }

    pub fn global(&self, global_index: u32) -> Option<&GlobalDescriptor> {
        self.globals.get(global_index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functions_share_signatures() {
        let mut tables = ModuleTables::new();
        let ty = tables.add_type(Signature::new([ValueKind::I32], [ValueKind::I32]));
        let a = tables.add_function(ty, CallTarget::Import(0)).unwrap();
        let b = tables.add_function(ty, CallTarget::Defined(0)).unwrap();
        assert!(Arc::ptr_eq(
            &tables.function(a).unwrap().signature,
            &tables.function(b).unwrap().signature
        ));
    }

    #[test]
    fn unknown_type_index_is_rejected() {
        let mut tables = ModuleTables::new();
        assert_eq!(tables.add_function(3, CallTarget::Defined(0)), None);
        assert!(tables.functions.is_empty());
    }

    #[test]
    fn tables_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ModuleTables>();
        assert_send_sync::<Arc<ModuleTables>>();
    }
}
