use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::{BlockType, ValueKind};

/// An immutable function type.
///
/// Signatures are built once per type index and shared by `Arc` between all
/// call sites and compilation workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    params: Vec<ValueKind>,
    results: Vec<ValueKind>,
}

impl Signature {
    pub fn new(params: impl Into<Vec<ValueKind>>, results: impl Into<Vec<ValueKind>>) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    pub fn results(&self) -> &[ValueKind] {
        &self.results
    }

    /// Block type of the implicit function-level block.
    ///
    /// Only the first return kind takes part in block typing.
    pub fn block_type(&self) -> BlockType {
        BlockType::from(self.results.first().copied())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |kinds: &[ValueKind]| {
            kinds
                .iter()
                .map(|k| k.name())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}
