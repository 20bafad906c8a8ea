//! Adapter capability flags.

use serde::{Deserialize, Serialize};

/// Optional features supported by a repository instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VectorCapabilities {
    /// Provider-neutral filters are translated server side.
    pub filters: bool,
    /// Queries may blend vector and lexical scoring.
    pub hybrid_search: bool,
    /// `upsert_many`/`delete_many` are handled efficiently.
    pub bulk_operations: bool,
    /// Collections are created on demand.
    pub dynamic_collections: bool,
    /// Export can page past the engine's offset window.
    pub unbounded_export: bool,
}

impl VectorCapabilities {
    /// Returns the names of enabled capabilities.
    pub fn enabled(&self) -> Vec<&'static str> {
        [
            self.filters.then_some("filters"),
            self.hybrid_search.then_some("hybrid_search"),
            self.bulk_operations.then_some("bulk_operations"),
            self.dynamic_collections.then_some("dynamic_collections"),
            self.unbounded_export.then_some("unbounded_export"),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_lists_only_set_flags() {
        let caps = VectorCapabilities {
            filters: true,
            unbounded_export: true,
            ..Default::default()
        };
        assert_eq!(caps.enabled(), vec!["filters", "unbounded_export"]);
    }
}
