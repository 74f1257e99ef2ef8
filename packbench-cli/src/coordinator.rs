//! Coordinator Process
//!
//! Spawns worker processes, drives the dispatch scheduler against their
//! pipes, accumulates streamed field values into rows, and emits CSV as
//! tasks complete.
//!
//! Each worker is the same binary re-executed with a hidden worker flag;
//! a pipe pair is passed as fd 3 (requests in) and fd 4 (responses out).
//! Responses are awaited from any worker at once with poll(2), with no
//! timeout: the protocol has no heartbeat, so a worker that dies without
//! closing its pipe simply hangs the run. A closed pipe is reported.

use crate::rows::{RowAccumulator, RowError, header_line};
use crate::scheduler::{Action, Scheduler};
use packbench_core::{FieldRegistry, Task};
use packbench_ipc::{FrameError, FrameReader, FrameWriter, WorkRequest, WorkResponse};
use std::ffi::OsString;
use std::io::Write;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use thiserror::Error;

/// Fatal coordinator errors
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("worker {worker} closed its pipe mid-run")]
    WorkerClosed { worker: usize },

    #[error(transparent)]
    Row(#[from] RowError),

    #[error("{defects} row(s) had missing fields and were not emitted")]
    RowDefects { defects: usize },
}

impl From<FrameError> for CoordinatorError {
    fn from(e: FrameError) -> Self {
        CoordinatorError::Ipc(e.to_string())
    }
}

/// Create a pipe pair, returning (read_fd, write_fd), both close-on-exec.
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// One spawned worker and its framed pipe endpoints
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn a worker: this binary re-executed with `args`, request pipe
    /// on fd 3 and response pipe on fd 4.
    pub fn spawn(args: &[OsString]) -> Result<Self, CoordinatorError> {
        let binary = std::env::current_exe()?;

        // req_pipe: coordinator writes requests → worker reads from fd 3
        let (req_read, req_write) = create_pipe()?;
        // msg_pipe: worker writes responses from fd 4 → coordinator reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(req_read);
                close_fd(req_write);
                return Err(CoordinatorError::Io(e));
            }
        };

        eprintln!("DBG fds req_read={req_read} req_write={req_write} msg_read={msg_read} msg_write={msg_write} exe={binary:?} args={args:?}");
        let mut command = Command::new(binary);
        command
            .args(args)
            .env(packbench_core::IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: dup req_read→3, msg_write→4, close the rest.
        unsafe {
            command.pre_exec(move || {
                if req_read != 3 {
                    libc::dup2(req_read, 3);
                    libc::close(req_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                libc::close(req_write);
                libc::close(msg_read);

                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(req_read);
                close_fd(req_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(CoordinatorError::Io(e));
            }
        };

        // Close the child-side ends in the parent
        close_fd(req_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(req_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        Ok(Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            msg_read_fd: msg_read,
        })
    }

    fn send(&mut self, request: &WorkRequest) -> Result<(), CoordinatorError> {
        self.writer.write(request)?;
        Ok(())
    }

    fn recv(&mut self, worker: usize) -> Result<WorkResponse, CoordinatorError> {
        match self.reader.read::<WorkResponse>() {
            Ok(response) => Ok(response),
            Err(FrameError::EndOfStream) => Err(CoordinatorError::WorkerClosed { worker }),
            Err(e) => Err(e.into()),
        }
    }

    fn has_buffered_response(&self) -> bool {
        self.reader.has_buffered_data()
    }

    fn wait(&mut self) {
        let _ = self.child.wait();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Normal shutdown already reaped the child in wait(); this only
        // fires on error paths where the worker may still be running.
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Spawn `count` workers with identical arguments.
pub fn spawn_workers(count: usize, args: &[OsString]) -> Result<Vec<WorkerHandle>, CoordinatorError> {
    (0..count).map(|_| WorkerHandle::spawn(args)).collect()
}

/// Drives the scheduler against real worker processes and writes CSV.
pub struct Coordinator<W: Write> {
    workers: Vec<WorkerHandle>,
    scheduler: Scheduler,
    rows: RowAccumulator,
    registry: FieldRegistry,
    out: W,
    defects: usize,
}

impl<W: Write> Coordinator<W> {
    /// Assemble a coordinator over spawned workers and a task catalog.
    pub fn new(
        workers: Vec<WorkerHandle>,
        catalog: Vec<Task>,
        registry: FieldRegistry,
        out: W,
    ) -> Self {
        let scheduler = Scheduler::new(workers.len(), catalog);
        Self {
            workers,
            scheduler,
            rows: RowAccumulator::new(),
            registry,
            out,
            defects: 0,
        }
    }

    /// Run to completion: header, one row per task in completion order,
    /// then shutdown for every worker.
    pub fn run(mut self) -> Result<(), CoordinatorError> {
        writeln!(self.out, "{}", header_line(&self.registry))?;

        loop {
            match self.scheduler.next_action() {
                Action::Dispatch { worker, task } => {
                    tracing::debug!(task_id = task.task_id, worker, name = %task.name, "dispatching");
                    self.rows.register_task(task.task_id, task.name.clone());
                    self.workers[worker].send(&WorkRequest::Dispatch {
                        task_id: task.task_id,
                        dataset_id: task.dataset_id,
                        compressor_id: task.compressor_id,
                    })?;
                }
                Action::Await => {
                    let (worker, response) = self.recv_any()?;
                    self.handle_response(worker, response)?;
                }
                Action::Shutdown { worker } => {
                    tracing::debug!(worker, "sending shutdown");
                    self.workers[worker].send(&WorkRequest::Shutdown)?;
                }
                Action::Finished => break,
            }
        }

        self.out.flush()?;
        for worker in &mut self.workers {
            worker.wait();
        }

        if self.defects > 0 {
            return Err(CoordinatorError::RowDefects {
                defects: self.defects,
            });
        }
        Ok(())
    }

    fn handle_response(
        &mut self,
        worker: usize,
        response: WorkResponse,
    ) -> Result<(), CoordinatorError> {
        match response {
            WorkResponse::FieldValue {
                task_id,
                field_id,
                value,
            } => {
                self.rows.record_field(task_id, field_id, value)?;
            }
            WorkResponse::TaskDone { task_id } => {
                match self.rows.finish_task(task_id, &self.registry) {
                    Ok(line) => {
                        self.scheduler.task_done(worker);
                        writeln!(self.out, "{line}")?;
                    }
                    Err(e @ RowError::MissingField { .. }) => {
                        // the task failed on the worker; surface, count,
                        // and keep the run going
                        self.scheduler.task_done(worker);
                        tracing::error!(task_id, error = %e, "row not emitted");
                        self.defects += 1;
                    }
                    // done for a task never dispatched: protocol violation
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Next response from any worker: a buffered frame first, else block
    /// in poll(2) across every response pipe.
    fn recv_any(&mut self) -> Result<(usize, WorkResponse), CoordinatorError> {
        if let Some(worker) = self
            .workers
            .iter()
            .position(WorkerHandle::has_buffered_response)
        {
            let response = self.workers[worker].recv(worker)?;
            return Ok((worker, response));
        }

        loop {
            let mut fds: Vec<libc::pollfd> = self
                .workers
                .iter()
                .map(|w| libc::pollfd {
                    fd: w.msg_read_fd,
                    events: libc::POLLIN,
                    revents: 0,
                })
                .collect();

            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if rc < 0 {
                let e = std::io::Error::last_os_error();
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(CoordinatorError::Io(e));
            }

            // Readable beats hang-up: a worker that wrote its responses and
            // exited still has data to drain.
            if let Some(worker) = fds.iter().position(|p| p.revents & libc::POLLIN != 0) {
                let response = self.workers[worker].recv(worker)?;
                return Ok((worker, response));
            }
            if let Some(worker) = fds
                .iter()
                .position(|p| p.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0)
            {
                return Err(CoordinatorError::WorkerClosed { worker });
            }
        }
    }
}
