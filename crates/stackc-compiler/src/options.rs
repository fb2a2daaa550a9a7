//! Compilation options.

use serde::{Deserialize, Serialize};

use crate::error::MAX_ERRORS;

/// What the driver does when a function body fails to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop at the first failing function.
    #[default]
    Abort,
    /// Skip failing functions and report them together.
    Continue,
}

/// Options for [`crate::compile_module`] and [`crate::compile_wasm`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub error_policy: ErrorPolicy,
    /// Failures kept in detail under [`ErrorPolicy::Continue`]; all are counted.
    pub max_errors: usize,
    /// Route checked float-to-integer truncations through shared helper
    /// routines instead of the target's trapping conversion.
    pub materialize_helpers: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::Abort,
            max_errors: MAX_ERRORS,
            materialize_helpers: true,
        }
    }
}

impl CompileOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let options = CompileOptions::from_json("{}").unwrap();
        assert_eq!(options, CompileOptions::default());
        assert_eq!(options.max_errors, 20);
    }

    #[test]
    fn partial_json_overrides_fields() {
        let options =
            CompileOptions::from_json(r#"{"error_policy":"continue","materialize_helpers":false}"#)
                .unwrap();
        assert_eq!(options.error_policy, ErrorPolicy::Continue);
        assert!(!options.materialize_helpers);
        assert_eq!(options.max_errors, MAX_ERRORS);
    }
}
