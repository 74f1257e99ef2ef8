//! Field Registry
//!
//! The ordered field name ↔ field id bijection the wire protocol indexes
//! into. Never transmitted: the coordinator and every worker rebuild it
//! from the same inputs, and `build` must stay a deterministic pure
//! function for their copies to agree.

use crate::metrics::MetricsSpec;
use fxhash::FxHashMap;

/// Ordered bijection between metric field names and dense ids
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    names: Vec<String>,
    ids: FxHashMap<String, u32>,
}

impl FieldRegistry {
    /// Build the registry.
    ///
    /// A non-empty explicit list fixes the order as given. Otherwise the
    /// fields are introspected from the metrics spec, deduplicated, and
    /// sorted lexicographically so every process derives the same ids.
    pub fn build(explicit: &[String], metrics: &MetricsSpec) -> Self {
        let names = if explicit.is_empty() {
            let mut inferred = metrics.result_fields();
            inferred.sort();
            inferred.dedup();
            inferred
        } else {
            explicit.to_vec()
        };

        let ids = names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id as u32))
            .collect();

        Self { names, ids }
    }

    /// Field names in id order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Id of a field name
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Name of a field id
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }
}
