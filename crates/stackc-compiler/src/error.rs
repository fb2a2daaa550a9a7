//! Driver-level errors.

use serde::{Deserialize, Serialize};
use stackc_codegen::CodegenError;
use thiserror::Error;

/// Default number of function failures kept in detail.
pub const MAX_ERRORS: usize = 20;

/// Errors that stop a module compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The binary module could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The module uses a feature outside the supported instruction set.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A function body failed to compile under [`crate::ErrorPolicy::Abort`].
    #[error("function {index}: {source}")]
    Function {
        index: u32,
        #[source]
        source: CodegenError,
    },
}

impl From<wasmparser::BinaryReaderError> for CompileError {
    fn from(err: wasmparser::BinaryReaderError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias for the driver.
pub type CompileResult<T> = Result<T, CompileError>;

/// A function that failed under [`crate::ErrorPolicy::Continue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionError {
    /// Module-wide function index (imports first).
    pub index: u32,
    pub error: CodegenError,
}

/// Function failures collected over one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileErrors {
    pub errors: Vec<FunctionError>,
    pub total_errors: usize,
    #[serde(skip, default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    MAX_ERRORS
}

impl Default for CompileErrors {
    fn default() -> Self {
        Self::with_limit(MAX_ERRORS)
    }
}

impl CompileErrors {
    /// Keep at most `limit` failures in detail.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            errors: Vec::new(),
            total_errors: 0,
            limit,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    /// Add a failure, respecting the limit.
    pub fn push_error(&mut self, index: u32, error: CodegenError) {
        if self.errors.len() < self.limit {
            self.errors.push(FunctionError { index, error });
        }
        self.total_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn underflow() -> CodegenError {
        CodegenError::StackUnderflow {
            opcode: "drop".into(),
            expected: 1,
        }
    }

    #[test]
    fn push_error_caps_detail_but_counts_all() {
        let mut errors = CompileErrors::with_limit(2);
        for index in 0..5 {
            errors.push_error(index, underflow());
        }
        assert!(errors.has_errors());
        assert_eq!(errors.errors.len(), 2);
        assert_eq!(errors.total_errors, 5);
    }

    #[test]
    fn function_error_names_the_index() {
        let err = CompileError::Function {
            index: 3,
            source: underflow(),
        };
        assert_eq!(
            err.to_string(),
            "function 3: drop: stack underflow, expected 1 operand(s)"
        );
    }
}
