//! Task Catalog
//!
//! Enumerates the cross product of replicates × datasets × compressor
//! configurations into an ordered task list. Ids start at 1 and increase
//! strictly; every process derives the same catalog from the same configs.

use crate::codec::CompressorConfig;
use crate::dataset::DatasetConfig;

/// One unit of benchmarking work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique positive identifier
    pub task_id: u32,
    /// Index into the dataset list
    pub dataset_id: u32,
    /// Index into the compressor-configuration list
    pub compressor_id: u32,
    /// Output row label: dataset name ++ configuration name
    pub name: String,
}

/// Build the ordered task list.
pub fn build_catalog(
    datasets: &[DatasetConfig],
    compressors: &[CompressorConfig],
    replicates: u32,
) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(datasets.len() * compressors.len() * replicates as usize);
    let mut task_id = 1u32;
    for _ in 0..replicates {
        for (dataset_id, dataset) in datasets.iter().enumerate() {
            for (compressor_id, compressor) in compressors.iter().enumerate() {
                tasks.push(Task {
                    task_id,
                    dataset_id: dataset_id as u32,
                    compressor_id: compressor_id as u32,
                    name: format!("{}{}", dataset.name, compressor.name),
                });
                task_id += 1;
            }
        }
    }
    tasks
}
