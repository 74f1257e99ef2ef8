#![warn(missing_docs)]
//! Packbench Core
//!
//! Domain layer for the batch compression benchmark:
//! - typed data buffers and dataset descriptors
//! - compressor configurations and codec kernels
//! - metrics collection for compress/decompress cycles
//! - the field registry and task catalog both sides agree on
//! - the worker loop that executes dispatched tasks

mod catalog;
mod codec;
mod data;
mod dataset;
mod fields;
mod metrics;
mod worker;

pub use catalog::{Task, build_catalog};
pub use codec::{Codec, CodecError, CompressorConfig, load_compressors};
pub use data::{DataBuffer, DataError, Dtype};
pub use dataset::{DatasetConfig, DatasetError, load_datasets};
pub use fields::FieldRegistry;
pub use metrics::{DEFAULT_METRIC_MODULES, MetricsCollector, MetricsError, MetricsSpec};
pub use worker::{
    ArtifactDirs, IPC_FD_ENV, TaskError, TaskOutcome, WorkerContext, WorkerError, WorkerLoop,
    WorkerState, execute_task, run_worker,
};
