//! Background work for replacement decodes.
//!
//! A decode is submitted to a [`TaskExecutor`] as a boxed closure. The caller
//! keeps a [`TaskHandle`] that it can poll with a timeout and join exactly
//! once. The handle's signal fires when the closure finishes, panics, or is
//! dropped without ever running, so a waiter can never hang on lost work.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{ReplacerError, Result};

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks off the calling thread.
pub trait TaskExecutor: Send + Sync {
    /// Queue a task. Dropping it instead of running it is allowed.
    fn submit(&self, task: Task);
}

/// One-shot completion signal.
#[derive(Debug, Default)]
pub struct Waitable {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Waitable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the work finished and wake every waiter.
    pub fn notify(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.cond.notify_all();
    }

    pub fn is_done(&self) -> bool {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait at most `timeout`. Returns whether the work has finished.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        if *done || timeout.is_zero() {
            return *done;
        }
        let (done, _) = self
            .cond
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *done
    }

    /// Block until the work has finished.
    pub fn wait(&self) {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        let _done = self
            .cond
            .wait_while(done, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Fires the waitable when dropped, whatever happened to the task.
struct NotifyOnDrop(Arc<Waitable>);

impl Drop for NotifyOnDrop {
    fn drop(&mut self) {
        self.0.notify();
    }
}

/// Join-once handle to a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    waitable: Arc<Waitable>,
}

impl TaskHandle {
    /// Poll for completion, blocking at most `timeout`.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.waitable.wait_for(timeout)
    }

    pub fn is_done(&self) -> bool {
        self.waitable.is_done()
    }

    /// Wait for completion and give up the handle.
    pub fn join(self) {
        self.waitable.wait();
    }
}

/// Submit `work` and return a handle that completes when it does.
pub fn spawn_task<F>(executor: &dyn TaskExecutor, work: F) -> TaskHandle
where
    F: FnOnce() + Send + 'static,
{
    let waitable = Arc::new(Waitable::new());
    let guard = NotifyOnDrop(Arc::clone(&waitable));
    executor.submit(Box::new(move || {
        let _guard = guard;
        work();
    }));
    TaskHandle { waitable }
}

/// Convert a poll budget in seconds into a wait timeout.
///
/// Negative and NaN budgets do not wait. Huge budgets are capped at a day.
pub fn budget_to_timeout(budget: f64) -> Duration {
    const MAX_WAIT_SECS: f64 = 86_400.0;
    if budget.is_nan() || budget <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(budget.min(MAX_WAIT_SECS))
    }
}

/// Message sent to the pool workers.
enum WorkerMessage {
    Run(Task),
    Shutdown,
}

/// Fixed set of named decode threads fed from one queue.
///
/// Dropping the pool lets queued tasks drain, then stops and joins every
/// worker.
pub struct DecoderPool {
    sender: Sender<WorkerMessage>,
    workers: Vec<JoinHandle<()>>,
}

impl DecoderPool {
    /// Spawn `threads` workers (at least one).
    pub fn spawn(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::channel::<WorkerMessage>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("texreplace-decode-{}", index))
                .spawn(move || {
                    log::debug!("Decode worker {} started", index);
                    Self::worker_loop(&receiver);
                    log::debug!("Decode worker {} exiting", index);
                })
                .map_err(|e| ReplacerError::WorkerSpawn {
                    message: e.to_string(),
                })?;
            workers.push(handle);
        }

        log::info!("Decoder pool spawned with {} threads", threads);
        Ok(Self { sender, workers })
    }

    fn worker_loop(receiver: &Mutex<Receiver<WorkerMessage>>) {
        loop {
            let message = {
                let receiver = receiver.lock().unwrap_or_else(PoisonError::into_inner);
                receiver.recv()
            };
            match message {
                Ok(WorkerMessage::Run(task)) => {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        log::error!("Decode task panicked");
                    }
                }
                Ok(WorkerMessage::Shutdown) => break,
                Err(_) => {
                    log::debug!("Task channel closed, decode worker exiting");
                    break;
                }
            }
        }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }
}

impl TaskExecutor for DecoderPool {
    fn submit(&self, task: Task) {
        if self.sender.send(WorkerMessage::Run(task)).is_err() {
            // The task comes back inside the error and is dropped here.
            log::error!("Failed to submit decode task: workers gone");
        }
    }
}

impl Drop for DecoderPool {
    fn drop(&mut self) {
        log::debug!("Shutting down decoder pool");
        for _ in 0..self.workers.len() {
            let _ = self.sender.send(WorkerMessage::Shutdown);
        }
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                log::warn!("Decode worker panicked: {:?}", e);
            }
        }
    }
}

/// Runs every task on a fresh named thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPerTaskExecutor;

impl TaskExecutor for ThreadPerTaskExecutor {
    fn submit(&self, task: Task) {
        let spawned = thread::Builder::new()
            .name("texreplace-task".to_string())
            .spawn(task);
        if let Err(e) = spawned {
            log::error!("Failed to spawn task thread: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor that throws every task away.
    struct DroppingExecutor;

    impl TaskExecutor for DroppingExecutor {
        fn submit(&self, task: Task) {
            drop(task);
        }
    }

    #[test]
    fn test_waitable_times_out_then_completes() {
        let waitable = Waitable::new();
        assert!(!waitable.wait_for(Duration::from_millis(1)));
        waitable.notify();
        assert!(waitable.wait_for(Duration::ZERO));
        waitable.wait();
    }

    #[test]
    fn test_pool_runs_tasks() {
        let pool = DecoderPool::spawn(2).unwrap();
        assert_eq!(pool.num_threads(), 2);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                spawn_task(&pool, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_panicking_task_still_signals() {
        let pool = DecoderPool::spawn(1).unwrap();
        let handle = spawn_task(&pool, || panic!("decode exploded"));
        assert!(handle.wait_for(Duration::from_secs(10)));

        // The worker survives the panic.
        let ok = spawn_task(&pool, || {});
        assert!(ok.wait_for(Duration::from_secs(10)));
    }

    #[test]
    fn test_dropped_task_signals() {
        let handle = spawn_task(&DroppingExecutor, || unreachable!());
        assert!(handle.is_done());
    }

    #[test]
    fn test_thread_per_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handle = spawn_task(&ThreadPerTaskExecutor, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.join();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_budget_to_timeout() {
        assert_eq!(budget_to_timeout(-1.0), Duration::ZERO);
        assert_eq!(budget_to_timeout(f64::NAN), Duration::ZERO);
        assert_eq!(budget_to_timeout(0.5), Duration::from_millis(500));
        assert_eq!(budget_to_timeout(f64::INFINITY), Duration::from_secs(86_400));
    }
}
