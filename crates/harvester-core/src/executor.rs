//! Bounded per-stage worker pool.
//!
//! A transient rayon pool of `max_workers` threads drains a [`WorkQueue`].
//! Every submitted task yields exactly one [`TaskResult`]: worker errors and
//! panics become failures, and tasks never claimed because the run was
//! stopped become `NotStarted` failures.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use crate::error::TaskError;
use crate::progress::fmt_num;
use crate::shutdown::{StopReason, StopSignal};
use crate::work_queue::WorkQueue;

/// Why a task produced no payload
#[derive(Debug, Clone)]
pub enum TaskFailure {
    Error(TaskError),
    Panicked(String),
    NotStarted(StopReason),
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{e}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
            Self::NotStarted(reason) => write!(f, "not started ({reason})"),
        }
    }
}

/// One task's input paired with its outcome
#[derive(Debug)]
pub struct TaskResult<T, P> {
    pub task: T,
    pub outcome: Result<P, TaskFailure>,
}

impl<T, P> TaskResult<T, P> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Counts over one stage's results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTally {
    pub submitted: usize,
    pub succeeded: usize,
    /// Ran and failed (error or panic)
    pub failed: usize,
    /// Never claimed because the run stopped
    pub not_started: usize,
}

impl StageTally {
    pub fn from_results<T, P>(results: &[TaskResult<T, P>]) -> Self {
        let mut tally = Self {
            submitted: results.len(),
            ..Default::default()
        };
        for r in results {
            match &r.outcome {
                Ok(_) => tally.succeeded += 1,
                Err(TaskFailure::NotStarted(_)) => tally.not_started += 1,
                Err(_) => tally.failed += 1,
            }
        }
        tally
    }

    pub fn attempted(&self) -> usize {
        self.submitted - self.not_started
    }
}

/// Runs a worker function over a batch of tasks with bounded concurrency
pub struct StageExecutor<'a> {
    name: String,
    max_workers: usize,
    progress_every: usize,
    stop: Option<&'a StopSignal>,
    bar: ProgressBar,
}

impl<'a> StageExecutor<'a> {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        Self {
            name: name.into(),
            max_workers: max_workers.max(1),
            progress_every: 0,
            stop: None,
            bar: ProgressBar::hidden(),
        }
    }

    /// Stop claiming tasks once `stop` fires
    pub fn with_stop(mut self, stop: &'a StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Tick `bar` per completion; when the bar is hidden (non-TTY), log every
    /// `every` completions instead. `every == 0` disables the log lines.
    pub fn with_progress(mut self, bar: ProgressBar, every: usize) -> Self {
        self.bar = bar;
        self.progress_every = every;
        self
    }

    /// Run `worker` over every task. Returns one result per task, in submission order.
    pub fn run<T, P, F>(&self, tasks: Vec<T>, worker: F) -> Vec<TaskResult<T, P>>
    where
        T: fmt::Display + Send + Sync,
        P: Send,
        F: Fn(&T) -> Result<P, TaskError> + Sync,
    {
        let start = Instant::now();
        let total = tasks.len();
        if total == 0 {
            log::debug!("{}: no tasks", self.name);
            return Vec::new();
        }

        let queue = WorkQueue::new(tasks);
        let slots: Mutex<Vec<Option<Result<P, TaskFailure>>>> =
            Mutex::new((0..total).map(|_| None).collect());
        let completed = AtomicUsize::new(0);
        let stopped: Mutex<Option<StopReason>> = Mutex::new(None);

        self.bar.set_length(total as u64);
        let workers = self.max_workers.min(total);
        log::info!(
            "{}: {} tasks with {workers} workers",
            self.name,
            fmt_num(total)
        );

        let drain = || {
            loop {
                if let Some(reason) = self.stop.and_then(StopSignal::check) {
                    stopped
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert(reason);
                    break;
                }
                let Some((idx, task)) = queue.next() else {
                    break;
                };

                let outcome = self.run_one(task, &worker);
                slots.lock().unwrap_or_else(PoisonError::into_inner)[idx] = Some(outcome);

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                self.report(done, total);
            }
        };

        let name = self.name.clone();
        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("{name}-{i}"))
            .build()
        {
            Ok(pool) => pool.scope(|s| {
                for _ in 0..workers {
                    s.spawn(|_| drain());
                }
            }),
            Err(e) => {
                log::warn!("{}: cannot build worker pool ({e}), using global pool", self.name);
                rayon::scope(|s| {
                    for _ in 0..workers {
                        s.spawn(|_| drain());
                    }
                });
            }
        }

        let stop_reason = stopped
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(StopReason::Interrupted);
        let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
        let results: Vec<TaskResult<T, P>> = queue
            .into_items()
            .into_iter()
            .zip(slots)
            .map(|(task, slot)| TaskResult {
                task,
                outcome: slot.unwrap_or(Err(TaskFailure::NotStarted(stop_reason))),
            })
            .collect();

        self.bar.finish_and_clear();
        let tally = StageTally::from_results(&results);
        log_tally(&self.name, &tally, start.elapsed());
        results
    }

    fn run_one<T, P, F>(&self, task: &T, worker: &F) -> Result<P, TaskFailure>
    where
        T: fmt::Display,
        F: Fn(&T) -> Result<P, TaskError>,
    {
        match catch_unwind(AssertUnwindSafe(|| worker(task))) {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => {
                log::warn!("{}: {task}: {e}", self.name);
                Err(TaskFailure::Error(e))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                log::error!("{}: {task}: worker panicked: {msg}", self.name);
                Err(TaskFailure::Panicked(msg))
            }
        }
    }

    fn report(&self, done: usize, total: usize) {
        self.bar.inc(1);
        if self.bar.is_hidden() && self.progress_every > 0 && done % self.progress_every == 0 {
            log::info!("{}: {}/{} done", self.name, fmt_num(done), fmt_num(total));
        }
    }
}

fn log_tally(name: &str, tally: &StageTally, elapsed: Duration) {
    if tally.not_started > 0 {
        log::warn!(
            "{name}: {} ok, {} failed, {} not started [{:.1}s]",
            fmt_num(tally.succeeded),
            fmt_num(tally.failed),
            fmt_num(tally.not_started),
            elapsed.as_secs_f64()
        );
    } else {
        log::info!(
            "{name}: {} ok, {} failed [{:.1}s]",
            fmt_num(tally.succeeded),
            fmt_num(tally.failed),
            elapsed.as_secs_f64()
        );
    }
}

/// Text of a caught panic payload
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
