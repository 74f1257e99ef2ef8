//! IPC Message Types
//!
//! Two message types per direction: the coordinator either dispatches a task
//! or orders a shutdown; a worker either streams a metric field or marks a
//! task finished. Tagged variants replace the sentinel-field records the
//! protocol could otherwise need (no reserved task id, no `done` flag).

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Request sent from the coordinator to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkRequest {
    /// Run one benchmark task. Ids index into the catalogs every process
    /// computed from the same configuration inputs.
    Dispatch {
        /// Unique positive task identifier
        task_id: u32,
        /// Index into the dataset catalog
        dataset_id: u32,
        /// Index into the compressor-configuration catalog
        compressor_id: u32,
    },

    /// Terminate the worker loop. Sent exactly once per worker after the
    /// task queue is drained, including to workers that never ran a task.
    Shutdown,
}

/// Response sent from a worker to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkResponse {
    /// One measured metric field for a task.
    FieldValue {
        /// Task this measurement belongs to
        task_id: u32,
        /// Index into the field registry
        field_id: u32,
        /// Scalar value of the metric
        value: f64,
    },

    /// No more fields for this task; the sending worker is idle again.
    TaskDone {
        /// Task that finished
        task_id: u32,
    },
}

impl WorkResponse {
    /// The task this response belongs to, regardless of variant.
    pub fn task_id(&self) -> u32 {
        match *self {
            WorkResponse::FieldValue { task_id, .. } => task_id,
            WorkResponse::TaskDone { task_id } => task_id,
        }
    }
}
