//! Worker Loop
//!
//! The worker side of the scheduler: block for one request, run it, stream
//! one `FieldValue` per registry field, then a `TaskDone` marker, and wait
//! for the next request. A `Shutdown` request ends the loop.
//!
//! Task execution failures are absorbed here: the worker reports whatever
//! fields it collected before the failure and still sends `TaskDone`.
//! Dropping the marker would leave the coordinator blocked forever, since
//! the protocol has no timeout.

use crate::catalog::Task;
use crate::codec::{CodecError, CompressorConfig};
use crate::dataset::{DatasetConfig, DatasetError};
use crate::fields::FieldRegistry;
use crate::metrics::MetricsSpec;
use packbench_ipc::{FrameError, FrameReader, FrameWriter, WorkRequest, WorkResponse};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Environment variable carrying the worker's IPC descriptors as
/// `<read_fd>,<write_fd>`.
pub const IPC_FD_ENV: &str = "PACKBENCH_IPC_FD";

/// Failures while executing one task. Non-fatal to the run: the task's
/// row is simply reported with fewer fields.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("failed to write artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal worker errors. Anything here means the transport to the
/// coordinator is unusable and the process should exit.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("IPC failure: {0}")]
    Frame(#[from] FrameError),
}

/// Optional directories for dumping per-task compressed/decompressed
/// buffers, named after the task's display name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDirs {
    /// Where to write compressed buffers, if anywhere
    pub compressed: Option<PathBuf>,
    /// Where to write decompressed buffers, if anywhere
    pub decompressed: Option<PathBuf>,
}

/// Everything a worker needs to resolve and execute requests. Built from
/// the same configuration inputs as the coordinator's, so ids and field
/// ordering agree without any exchange.
#[derive(Debug)]
pub struct WorkerContext {
    /// Ordered dataset descriptors
    pub datasets: Vec<DatasetConfig>,
    /// Ordered compressor configurations
    pub compressors: Vec<CompressorConfig>,
    /// Enabled metric modules
    pub metrics: MetricsSpec,
    /// Field name ↔ id bijection
    pub registry: FieldRegistry,
    /// Artifact output directories
    pub artifacts: ArtifactDirs,
}

/// Result of running one task: the metric values collected, and the error
/// that cut collection short, if any.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Field name → value for everything that was measured
    pub values: BTreeMap<String, f64>,
    /// The failure that ended the task early, if it did not complete
    pub error: Option<TaskError>,
}

/// Load the dataset, run the codec round trip, and collect metrics.
///
/// Values recorded before a failure are kept: a task that dies during
/// decompression still reports its compression time and sizes.
pub fn execute_task(
    dataset: &DatasetConfig,
    config: &CompressorConfig,
    metrics: &MetricsSpec,
    artifacts: &ArtifactDirs,
    task: &Task,
) -> TaskOutcome {
    let mut collector = metrics.collector();

    macro_rules! fail {
        ($err:expr) => {
            return TaskOutcome {
                values: collector.into_results(),
                error: Some($err.into()),
            }
        };
    }

    let input = match dataset.load() {
        Ok(input) => input,
        Err(e) => fail!(e),
    };
    let mut codec = match config.build() {
        Ok(codec) => codec,
        Err(e) => fail!(e),
    };

    let start = Instant::now();
    let compressed = match codec.compress(&input) {
        Ok(compressed) => compressed,
        Err(e) => fail!(e),
    };
    collector.record_compress_time(start.elapsed());
    collector.record_sizes(input.byte_len(), compressed.len(), input.element_count());

    let start = Instant::now();
    let decompressed = match codec.decompress(&compressed, &input) {
        Ok(decompressed) => decompressed,
        Err(e) => fail!(e),
    };
    collector.record_decompress_time(start.elapsed());
    collector.record_decompressed_size(decompressed.byte_len());
    collector.record_error_stats(&input, &decompressed);

    if let Some(dir) = &artifacts.compressed {
        let path = dir.join(&task.name);
        if let Err(source) = std::fs::write(&path, &compressed) {
            fail!(TaskError::Artifact { path, source });
        }
    }
    if let Some(dir) = &artifacts.decompressed {
        let path = dir.join(&task.name);
        if let Err(source) = std::fs::write(&path, decompressed.bytes()) {
            fail!(TaskError::Artifact { path, source });
        }
    }

    TaskOutcome {
        values: collector.into_results(),
        error: None,
    }
}

/// Worker loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Blocked on the next request from the coordinator
    WaitingForTask,
    /// Executing a dispatched task
    RunningTask,
    /// Shutdown received; the loop is over
    Stopped,
}

/// The worker's request/response loop over a framed transport.
///
/// Generic over the byte streams so tests can drive it with in-memory
/// buffers instead of pipes.
pub struct WorkerLoop<R: Read, W: Write> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    ctx: WorkerContext,
    state: WorkerState,
}

impl<R: Read, W: Write> WorkerLoop<R, W> {
    /// Wrap a transport and context into a loop ready to run.
    pub fn new(reader: R, writer: W, ctx: WorkerContext) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            ctx,
            state: WorkerState::WaitingForTask,
        }
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Process requests until shutdown.
    pub fn run(&mut self) -> Result<(), WorkerError> {
        while self.state != WorkerState::Stopped {
            self.step()?;
        }
        Ok(())
    }

    /// Block for one request and handle it.
    pub fn step(&mut self) -> Result<(), WorkerError> {
        let req = self.reader.read::<WorkRequest>();
        eprintln!("DBG worker step read -> {:?}", req.as_ref().map(|r| format!("{r:?}")));
        match req? {
            WorkRequest::Shutdown => {
                tracing::debug!("shutdown received");
                self.state = WorkerState::Stopped;
            }
            WorkRequest::Dispatch {
                task_id,
                dataset_id,
                compressor_id,
            } => {
                self.state = WorkerState::RunningTask;
                self.run_task(task_id, dataset_id, compressor_id)?;
                self.state = WorkerState::WaitingForTask;
            }
        }
        Ok(())
    }

    fn run_task(
        &mut self,
        task_id: u32,
        dataset_id: u32,
        compressor_id: u32,
    ) -> Result<(), WorkerError> {
        let resolved = match (
            self.ctx.datasets.get(dataset_id as usize),
            self.ctx.compressors.get(compressor_id as usize),
        ) {
            (Some(dataset), Some(config)) => Some((dataset, config)),
            _ => None,
        };

        let values = match resolved {
            Some((dataset, config)) => {
                let task = Task {
                    task_id,
                    dataset_id,
                    compressor_id,
                    name: format!("{}{}", dataset.name, config.name),
                };
                let outcome =
                    execute_task(dataset, config, &self.ctx.metrics, &self.ctx.artifacts, &task);
                if let Some(error) = &outcome.error {
                    tracing::warn!(task_id, %error, "task failed, reporting collected fields only");
                }
                outcome.values
            }
            None => {
                tracing::warn!(
                    task_id,
                    dataset_id,
                    compressor_id,
                    "request references ids outside the catalogs"
                );
                BTreeMap::new()
            }
        };

        for (field_id, name) in self.ctx.registry.names().iter().enumerate() {
            if let Some(&value) = values.get(name) {
                self.writer.write(&WorkResponse::FieldValue {
                    task_id,
                    field_id: field_id as u32,
                    value,
                })?;
            }
        }

        // The completion marker goes out unconditionally, even for a task
        // that produced nothing.
        self.writer.write(&WorkResponse::TaskDone { task_id })?;
        Ok(())
    }
}

enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        let parts: Vec<&str> = val.split(',').collect();
        if parts.len() == 2 {
            if let (Ok(r), Ok(w)) = (parts[0].parse::<i32>(), parts[1].parse::<i32>()) {
                return IpcTransport::Fds {
                    read_fd: r,
                    write_fd: w,
                };
            }
        }
        eprintln!(
            "packbench: warning: invalid {IPC_FD_ENV}={val:?} (expected <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Run the worker loop over the transport inherited from the coordinator:
/// the fd pair named by [`IPC_FD_ENV`], or stdin/stdout as a fallback.
pub fn run_worker(ctx: WorkerContext) -> Result<(), WorkerError> {
    eprintln!("DBG worker start transport={:?}", std::env::var(IPC_FD_ENV));
    match detect_transport() {
        #[cfg(unix)]
        IpcTransport::Fds { read_fd, write_fd } => {
            use std::os::unix::io::FromRawFd;
            let reader = unsafe { std::fs::File::from_raw_fd(read_fd) };
            let writer = unsafe { std::fs::File::from_raw_fd(write_fd) };
            WorkerLoop::new(
                Box::new(reader) as Box<dyn Read>,
                Box::new(writer) as Box<dyn Write>,
                ctx,
            )
            .run()
        }
        IpcTransport::Stdio => WorkerLoop::new(
            Box::new(std::io::stdin()) as Box<dyn Read>,
            Box::new(std::io::stdout()) as Box<dyn Write>,
            ctx,
        )
        .run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dtype;
    use std::io::Cursor;

    fn fixture() -> (tempfile::TempDir, WorkerContext) {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("a.bin");
        let values: Vec<f32> = (0..32).map(|i| (i % 4) as f32).collect();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(&data_path, bytes).unwrap();

        let datasets = vec![DatasetConfig {
            name: "a".to_string(),
            path: data_path,
            dtype: Dtype::Float,
            dims: vec![32],
        }];
        let compressors = vec![CompressorConfig {
            name: "none".to_string(),
            codec: "noop".to_string(),
            options: Default::default(),
        }];
        let metrics = MetricsSpec::from_ids(["size", "error_stat"]).unwrap();
        let registry = FieldRegistry::build(&[], &metrics);
        let ctx = WorkerContext {
            datasets,
            compressors,
            metrics,
            registry,
            artifacts: ArtifactDirs::default(),
        };
        (dir, ctx)
    }

    fn frame_requests(requests: &[WorkRequest]) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut writer = FrameWriter::new(&mut buffer);
        for request in requests {
            writer.write(request).unwrap();
        }
        drop(writer);
        buffer
    }

    fn read_responses(buffer: Vec<u8>) -> Vec<WorkResponse> {
        let mut reader = FrameReader::new(Cursor::new(buffer));
        let mut responses = Vec::new();
        loop {
            match reader.read::<WorkResponse>() {
                Ok(response) => responses.push(response),
                Err(FrameError::EndOfStream) => break,
                Err(e) => panic!("unexpected frame error: {e}"),
            }
        }
        responses
    }

    #[test]
    fn test_noop_task_roundtrip_metrics() {
        let (_dir, ctx) = fixture();
        let input = frame_requests(&[
            WorkRequest::Dispatch {
                task_id: 1,
                dataset_id: 0,
                compressor_id: 0,
            },
            WorkRequest::Shutdown,
        ]);

        let mut output = Vec::new();
        let registry = ctx.registry.clone();
        let mut worker = WorkerLoop::new(Cursor::new(input), &mut output, ctx);
        worker.run().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        drop(worker);

        let responses = read_responses(output);
        let done_count = responses
            .iter()
            .filter(|r| matches!(r, WorkResponse::TaskDone { .. }))
            .count();
        assert_eq!(done_count, 1);
        assert!(matches!(
            responses.last(),
            Some(WorkResponse::TaskDone { task_id: 1 })
        ));

        // noop codec: zero reconstruction error, output size == input size
        let mut by_name = std::collections::BTreeMap::new();
        for response in &responses {
            if let WorkResponse::FieldValue {
                field_id, value, ..
            } = response
            {
                by_name.insert(registry.name_of(*field_id).unwrap().to_string(), *value);
            }
        }
        assert_eq!(by_name["error_stat:max_error"], 0.0);
        assert_eq!(
            by_name["size:decompressed_size"],
            by_name["size:uncompressed_size"]
        );
        assert_eq!(by_name["size:compression_ratio"], 1.0);
    }

    #[test]
    fn test_failed_task_still_sends_done() {
        let (_dir, mut ctx) = fixture();
        // Point the dataset at a missing file so the load fails
        ctx.datasets[0].path = std::path::PathBuf::from("/nonexistent/a.bin");

        let input = frame_requests(&[
            WorkRequest::Dispatch {
                task_id: 9,
                dataset_id: 0,
                compressor_id: 0,
            },
            WorkRequest::Shutdown,
        ]);

        let mut output = Vec::new();
        let mut worker = WorkerLoop::new(Cursor::new(input), &mut output, ctx);
        worker.run().unwrap();
        drop(worker);

        let responses = read_responses(output);
        assert_eq!(responses, vec![WorkResponse::TaskDone { task_id: 9 }]);
    }

    #[test]
    fn test_out_of_range_ids_still_send_done() {
        let (_dir, ctx) = fixture();
        let input = frame_requests(&[
            WorkRequest::Dispatch {
                task_id: 5,
                dataset_id: 7,
                compressor_id: 7,
            },
            WorkRequest::Shutdown,
        ]);

        let mut output = Vec::new();
        let mut worker = WorkerLoop::new(Cursor::new(input), &mut output, ctx);
        worker.run().unwrap();
        drop(worker);

        let responses = read_responses(output);
        assert_eq!(responses, vec![WorkResponse::TaskDone { task_id: 5 }]);
    }

    #[test]
    fn test_shutdown_stops_immediately() {
        let (_dir, ctx) = fixture();
        let input = frame_requests(&[WorkRequest::Shutdown]);

        let mut output = Vec::new();
        let mut worker = WorkerLoop::new(Cursor::new(input), &mut output, ctx);
        worker.run().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        drop(worker);
        assert!(read_responses(output).is_empty());
    }

    #[test]
    fn test_artifact_dirs_receive_buffers() {
        let (dir, mut ctx) = fixture();
        let artifact_dir = dir.path().join("compressed");
        std::fs::create_dir(&artifact_dir).unwrap();
        ctx.artifacts.compressed = Some(artifact_dir.clone());

        let input = frame_requests(&[
            WorkRequest::Dispatch {
                task_id: 1,
                dataset_id: 0,
                compressor_id: 0,
            },
            WorkRequest::Shutdown,
        ]);

        let mut output = Vec::new();
        let mut worker = WorkerLoop::new(Cursor::new(input), &mut output, ctx);
        worker.run().unwrap();

        // display name is dataset name ++ configuration name
        let artifact = artifact_dir.join("anone");
        assert!(artifact.exists());
        assert_eq!(std::fs::metadata(&artifact).unwrap().len(), 32 * 4);
    }
}
