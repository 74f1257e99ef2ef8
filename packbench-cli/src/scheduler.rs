//! Dispatch Scheduler
//!
//! The coordinator's state machine, free of any transport so the
//! termination and draining conditions can be tested as plain values. The
//! process-level coordinator asks for the next [`Action`] and applies it
//! to real worker pipes.
//!
//! States: while tasks and idle workers are both available the scheduler
//! keeps dispatching; once either runs out it awaits responses; when the
//! queue is empty and nothing is outstanding it drains, handing out one
//! shutdown per worker (including workers that never saw a task).

use packbench_core::Task;
use std::collections::VecDeque;

/// Coordinator loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Pairing idle workers with pending tasks
    Dispatching,
    /// Blocked until some worker responds
    AwaitingResponse,
    /// No tasks left anywhere; shutting workers down
    Drained,
}

/// What the coordinator should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this task to this worker
    Dispatch {
        /// Index of the worker to dispatch to
        worker: usize,
        /// The task to send
        task: Task,
    },
    /// Block for the next response from any worker
    Await,
    /// Send a shutdown request to this worker
    Shutdown {
        /// Index of the worker to shut down
        worker: usize,
    },
    /// Every task is done and every worker told to stop
    Finished,
}

/// Transport-free dispatch state machine
#[derive(Debug)]
pub struct Scheduler {
    state: CoordinatorState,
    idle: VecDeque<usize>,
    tasks: VecDeque<Task>,
    outstanding: usize,
    workers: usize,
    shutdown_sent: usize,
}

impl Scheduler {
    /// Start with every worker idle and the full catalog pending.
    pub fn new(workers: usize, catalog: Vec<Task>) -> Self {
        Self {
            state: CoordinatorState::Dispatching,
            idle: (0..workers).collect(),
            tasks: catalog.into(),
            outstanding: 0,
            workers,
            shutdown_sent: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Tasks dispatched but not yet marked done
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Advance the machine and return the next action to apply.
    pub fn next_action(&mut self) -> Action {
        loop {
            match self.state {
                CoordinatorState::Dispatching => {
                    if !self.idle.is_empty() && !self.tasks.is_empty() {
                        let worker = self.idle.pop_front().expect("idle checked non-empty");
                        let task = self.tasks.pop_front().expect("tasks checked non-empty");
                        self.outstanding += 1;
                        return Action::Dispatch { worker, task };
                    }
                    if self.tasks.is_empty() && self.outstanding == 0 {
                        self.state = CoordinatorState::Drained;
                        continue;
                    }
                    self.state = CoordinatorState::AwaitingResponse;
                    return Action::Await;
                }
                CoordinatorState::AwaitingResponse => return Action::Await,
                CoordinatorState::Drained => {
                    if self.shutdown_sent < self.workers {
                        let worker = self.shutdown_sent;
                        self.shutdown_sent += 1;
                        return Action::Shutdown { worker };
                    }
                    return Action::Finished;
                }
            }
        }
    }

    /// Record a `TaskDone` from `worker`: it re-enters the idle pool and
    /// dispatching resumes.
    pub fn task_done(&mut self, worker: usize) {
        debug_assert!(self.outstanding > 0, "done with nothing outstanding");
        self.outstanding -= 1;
        self.idle.push_back(worker);
        self.state = CoordinatorState::Dispatching;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(count: u32) -> Vec<Task> {
        (1..=count)
            .map(|task_id| Task {
                task_id,
                dataset_id: 0,
                compressor_id: task_id - 1,
                name: format!("t{task_id}"),
            })
            .collect()
    }

    /// Drive the scheduler with workers that complete instantly, in
    /// dispatch order. Returns (dispatched task ids, shutdown workers).
    fn drive(workers: usize, tasks: u32) -> (Vec<u32>, Vec<usize>) {
        let mut scheduler = Scheduler::new(workers, catalog(tasks));
        let mut in_flight: VecDeque<(usize, u32)> = VecDeque::new();
        let mut dispatched = Vec::new();
        let mut shutdowns = Vec::new();
        let mut per_worker = vec![0usize; workers];

        loop {
            match scheduler.next_action() {
                Action::Dispatch { worker, task } => {
                    per_worker[worker] += 1;
                    assert_eq!(per_worker[worker], 1, "worker given a second task in flight");
                    dispatched.push(task.task_id);
                    in_flight.push_back((worker, task.task_id));
                }
                Action::Await => {
                    let (worker, _task_id) = in_flight.pop_front().expect("await with no work");
                    per_worker[worker] -= 1;
                    scheduler.task_done(worker);
                }
                Action::Shutdown { worker } => shutdowns.push(worker),
                Action::Finished => break,
            }
        }
        (dispatched, shutdowns)
    }

    #[test]
    fn test_all_tasks_dispatched_once_and_all_workers_stopped() {
        for (workers, tasks) in [(1, 3), (2, 4), (3, 1), (4, 10)] {
            let (dispatched, shutdowns) = drive(workers, tasks);
            assert_eq!(dispatched.len(), tasks as usize);
            let mut unique = dispatched.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), tasks as usize, "duplicate dispatch");
            assert!(dispatched.iter().all(|&id| id > 0));
            // one shutdown per worker, exactly once, even for idle workers
            let mut expected: Vec<usize> = (0..workers).collect();
            let mut got = shutdowns.clone();
            got.sort();
            expected.sort();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_zero_tasks_goes_straight_to_drain() {
        let mut scheduler = Scheduler::new(3, Vec::new());
        assert_eq!(scheduler.next_action(), Action::Shutdown { worker: 0 });
        assert_eq!(scheduler.state(), CoordinatorState::Drained);
        assert_eq!(scheduler.next_action(), Action::Shutdown { worker: 1 });
        assert_eq!(scheduler.next_action(), Action::Shutdown { worker: 2 });
        assert_eq!(scheduler.next_action(), Action::Finished);
        assert_eq!(scheduler.next_action(), Action::Finished);
    }

    #[test]
    fn test_single_worker_runs_strictly_sequentially() {
        let mut scheduler = Scheduler::new(1, catalog(3));

        for expected_id in 1..=3u32 {
            match scheduler.next_action() {
                Action::Dispatch { worker: 0, task } => assert_eq!(task.task_id, expected_id),
                other => panic!("expected dispatch of task {expected_id}, got {other:?}"),
            }
            assert_eq!(scheduler.outstanding(), 1);
            // pool is empty: the only move is to wait
            assert_eq!(scheduler.next_action(), Action::Await);
            scheduler.task_done(0);
        }

        assert_eq!(scheduler.next_action(), Action::Shutdown { worker: 0 });
        assert_eq!(scheduler.next_action(), Action::Finished);
    }

    #[test]
    fn test_in_flight_bounded_by_worker_count() {
        let mut scheduler = Scheduler::new(2, catalog(5));

        assert!(matches!(scheduler.next_action(), Action::Dispatch { .. }));
        assert!(matches!(scheduler.next_action(), Action::Dispatch { .. }));
        assert_eq!(scheduler.outstanding(), 2);
        // both workers busy: no further dispatch until a done arrives
        assert_eq!(scheduler.next_action(), Action::Await);
        assert_eq!(scheduler.next_action(), Action::Await);

        scheduler.task_done(1);
        match scheduler.next_action() {
            Action::Dispatch { worker, task } => {
                assert_eq!(worker, 1);
                assert_eq!(task.task_id, 3);
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_drain_waits_for_outstanding_tasks() {
        let mut scheduler = Scheduler::new(2, catalog(2));
        assert!(matches!(scheduler.next_action(), Action::Dispatch { .. }));
        assert!(matches!(scheduler.next_action(), Action::Dispatch { .. }));

        // queue is empty but two tasks are outstanding: no shutdown yet
        assert_eq!(scheduler.next_action(), Action::Await);
        scheduler.task_done(0);
        assert_eq!(scheduler.next_action(), Action::Await);
        scheduler.task_done(1);

        assert_eq!(scheduler.next_action(), Action::Shutdown { worker: 0 });
        assert_eq!(scheduler.next_action(), Action::Shutdown { worker: 1 });
        assert_eq!(scheduler.next_action(), Action::Finished);
    }
}
