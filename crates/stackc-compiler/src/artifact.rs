//! Compiled-module artifact.
//!
//! A [`CompiledModule`] bundles the target code of every compiled function
//! with the helper routines they call, keyed by a SHA-256 hash of the input
//! module. Compiling the same bytes twice yields identical JSON.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stackc_codegen::{AssembledCode, HelperId, HelperRoutine};
use stackc_types::Signature;

use crate::error::CompileErrors;

/// One compiled function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledFunction {
    /// Module-wide function index (imports first).
    pub index: u32,
    pub signature: Signature,
    pub code: AssembledCode,
}

/// One helper routine; `CallHelper(n)` refers to `helpers[n]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledHelper {
    pub id: HelperId,
    pub code: AssembledCode,
}

impl From<HelperRoutine> for CompiledHelper {
    fn from(routine: HelperRoutine) -> Self {
        Self {
            id: routine.id,
            code: routine.code,
        }
    }
}

/// The result of compiling a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledModule {
    /// Lower-case hex SHA-256 of the input bytes (empty when compiled from
    /// pre-decoded tables).
    pub module_hash: String,
    pub functions: Vec<CompiledFunction>,
    pub helpers: Vec<CompiledHelper>,
    /// Functions skipped under the continue policy.
    #[serde(default)]
    pub errors: CompileErrors,
}

impl CompiledModule {
    /// Look up a compiled function by module-wide index.
    pub fn function(&self, index: u32) -> Option<&CompiledFunction> {
        self.functions.iter().find(|function| function.index == index)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Lower-case hex SHA-256 of `bytes`.
pub fn module_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
