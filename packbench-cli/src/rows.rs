//! Result Row Accumulation
//!
//! The coordinator builds one row per task from streamed field values and
//! emits it as CSV once the task's completion marker arrives. Rows live
//! only while their task is in flight; memory stays bounded by the worker
//! count, not the catalog size.

use fxhash::FxHashMap;
use packbench_core::FieldRegistry;
use thiserror::Error;

/// Defects observed while accumulating or emitting rows
#[derive(Debug, Error)]
pub enum RowError {
    #[error("response for unknown task id {task_id}")]
    UnknownTask { task_id: u32 },

    #[error("row {name:?} is missing field {field:?}")]
    MissingField { name: String, field: String },
}

/// Per-task field storage keyed by task id
#[derive(Debug, Default)]
pub struct RowAccumulator {
    rows: FxHashMap<u32, FxHashMap<u32, f64>>,
    names: FxHashMap<u32, String>,
}

impl RowAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a row for a dispatched task, remembering its display name.
    pub fn register_task(&mut self, task_id: u32, name: String) {
        self.names.insert(task_id, name);
        self.rows.insert(task_id, FxHashMap::default());
    }

    /// Store one field value. Idempotent by field id: a repeated field
    /// overwrites, so arrival order never changes the final row.
    pub fn record_field(&mut self, task_id: u32, field_id: u32, value: f64) -> Result<(), RowError> {
        self.rows
            .get_mut(&task_id)
            .ok_or(RowError::UnknownTask { task_id })?
            .insert(field_id, value);
        Ok(())
    }

    /// Close a row and format it as one CSV line in registry order.
    ///
    /// The row is removed either way. A field the worker never reported is
    /// surfaced as [`RowError::MissingField`] rather than padded over.
    pub fn finish_task(
        &mut self,
        task_id: u32,
        registry: &FieldRegistry,
    ) -> Result<String, RowError> {
        let name = self
            .names
            .remove(&task_id)
            .ok_or(RowError::UnknownTask { task_id })?;
        let row = self.rows.remove(&task_id).unwrap_or_default();

        let mut line = name.clone();
        for (field_id, field) in registry.names().iter().enumerate() {
            let value = row
                .get(&(field_id as u32))
                .ok_or_else(|| RowError::MissingField {
                    name: name.clone(),
                    field: field.clone(),
                })?;
            line.push(',');
            line.push_str(&value.to_string());
        }
        Ok(line)
    }

    /// Rows currently open
    pub fn in_flight(&self) -> usize {
        self.rows.len()
    }
}

/// The header line emitted before any row.
pub fn header_line(registry: &FieldRegistry) -> String {
    let mut line = String::from("configuration");
    for field in registry.names() {
        line.push(',');
        line.push_str(field);
    }
    line
}
