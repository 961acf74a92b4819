//! Bounded-concurrency parallel batches.
//!
//! A fixed pool of workers claims task indices from a shared counter and
//! writes each result into the slot of its input position, so the output
//! order always matches the input order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use subagent_core::{ExecutionResult, RunError, TaskId, TaskSpec};
use subagent_launcher::{ProgressFn, TaskRunner};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_PARALLEL_TASKS};

/// Limits applied to a parallel batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Tasks running at the same time.
    pub concurrency: usize,

    /// Largest accepted batch.
    pub max_tasks: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_MAX_CONCURRENCY,
            max_tasks: DEFAULT_MAX_PARALLEL_TASKS,
        }
    }
}

/// Live view of a running batch.
#[derive(Debug, Clone, Default)]
pub struct BatchProgress {
    pub total: usize,
    pub done: usize,
    pub running: usize,
    /// Latest snapshot of every task, by input position.
    pub results: Vec<ExecutionResult>,
}

/// Check a batch against `options` without running anything.
pub fn validate_batch(tasks: &[TaskSpec], options: &BatchOptions) -> Result<(), RunError> {
    if tasks.is_empty() {
        return Err(RunError::invalid_input(
            "parallel batch must contain at least one task",
        ));
    }
    if tasks.len() > options.max_tasks {
        return Err(RunError::invalid_input(format!(
            "too many parallel tasks ({}), max is {}",
            tasks.len(),
            options.max_tasks
        )));
    }
    for (index, task) in tasks.iter().enumerate() {
        task.validate().map_err(|e| {
            RunError::invalid_input(format!("task {} ({}): {}", index + 1, task.agent, e.message))
        })?;
    }
    Ok(())
}

/// Run `tasks` with at most `options.concurrency` in flight.
///
/// A failing task settles its own slot and the batch keeps going. When
/// `cancel` trips, the workers drain and the batch reports `CANCELLED`.
pub async fn run_parallel(
    runner: Arc<dyn TaskRunner>,
    tasks: Vec<TaskSpec>,
    options: BatchOptions,
    cancel: CancellationToken,
    progress: Option<watch::Sender<BatchProgress>>,
) -> Result<Vec<ExecutionResult>, RunError> {
    validate_batch(&tasks, &options)?;

    let total = tasks.len();
    let ids: Vec<TaskId> = (0..total).map(|_| TaskId::generate()).collect();
    let tracker = Arc::new(Tracker {
        state: Mutex::new(BatchProgress {
            total,
            done: 0,
            running: 0,
            results: ids
                .iter()
                .zip(&tasks)
                .map(|(id, spec)| ExecutionResult::pending(id.clone(), spec))
                .collect(),
        }),
        sender: progress,
    });
    tracker.publish();

    let tasks = Arc::new(tasks);
    let ids = Arc::new(ids);
    let next = Arc::new(AtomicUsize::new(0));
    let slots: Arc<Mutex<Vec<Option<Result<ExecutionResult, RunError>>>>> =
        Arc::new(Mutex::new(vec![None; total]));

    let workers = options.concurrency.clamp(1, total);
    info!(total, workers, "Starting parallel batch");

    let mut set = JoinSet::new();
    for worker in 0..workers {
        let runner = runner.clone();
        let tasks = tasks.clone();
        let ids = ids.clone();
        let next = next.clone();
        let slots = slots.clone();
        let tracker = tracker.clone();
        let cancel = cancel.clone();

        set.spawn(async move {
            loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                if index >= tasks.len() || cancel.is_cancelled() {
                    break;
                }
                debug!(worker, index, agent = %tasks[index].agent, "Worker claimed task");

                tracker.update(|p| p.running += 1);
                let relay: ProgressFn = {
                    let tracker = tracker.clone();
                    Arc::new(move |snapshot| tracker.update(|p| p.results[index] = snapshot))
                };

                let outcome = runner
                    .run(ids[index].clone(), &tasks[index], cancel.child_token(), Some(relay))
                    .await;

                tracker.update(|p| {
                    p.running -= 1;
                    p.done += 1;
                    if let Ok(result) = &outcome {
                        p.results[index] = result.clone();
                    }
                });
                slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(outcome);
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Batch worker panicked");
        }
    }

    if cancel.is_cancelled() {
        info!(total, "Parallel batch cancelled");
        return Err(RunError::cancelled("parallel batch was cancelled"));
    }

    let slots = std::mem::take(&mut *slots.lock().unwrap_or_else(PoisonError::into_inner));
    let mut results = Vec::with_capacity(total);
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(result)) => results.push(result),
            Some(Err(e)) => return Err(e),
            None => {
                return Err(RunError::runtime(format!(
                    "task {} never settled",
                    index + 1
                )))
            }
        }
    }

    let failed = results.iter().filter(|r| r.is_failure()).count();
    info!(total, failed, "Parallel batch finished");
    Ok(results)
}

/// Shared progress counters, published without ever blocking a worker.
struct Tracker {
    state: Mutex<BatchProgress>,
    sender: Option<watch::Sender<BatchProgress>>,
}

impl Tracker {
    fn update(&self, f: impl FnOnce(&mut BatchProgress)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
        if let Some(sender) = &self.sender {
            sender.send_replace(state.clone());
        }
    }

    fn publish(&self) {
        self.update(|_| {});
    }
}
