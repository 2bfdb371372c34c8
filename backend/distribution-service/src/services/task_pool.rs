//! Bounded pool for fire-and-forget work.
//!
//! Callers submit a named task factory and return immediately. Workers run
//! each task with exponential backoff and jitter between attempts; the
//! triggering request never sees the outcome. A full queue rejects the
//! submission instead of blocking the request path.

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, warn};

use crate::config::TaskPoolConfig;
use crate::metrics::tasks as task_metrics;

pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

type TaskFactory = Box<dyn Fn() -> TaskFuture + Send + Sync>;

struct Task {
    name: &'static str,
    factory: TaskFactory,
}

/// In-process counters, mirrored to Prometheus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskPoolStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub rejected: u64,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    rejected: AtomicU64,
}

struct PoolState {
    config: TaskPoolConfig,
    counters: Counters,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl PoolState {
    fn finish_one(&self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        task_metrics::set_in_flight(remaining);
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct TaskPool {
    sender: mpsc::Sender<Task>,
    state: Arc<PoolState>,
}

impl TaskPool {
    /// Spawn the workers on the current Tokio runtime
    pub fn start(config: TaskPoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = config.workers.max(1);

        let state = Arc::new(PoolState {
            config,
            counters: Counters::default(),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        for worker_id in 0..workers {
            tokio::spawn(worker_loop(worker_id, receiver.clone(), state.clone()));
        }

        Self { sender, state }
    }

    /// Queue a task. Returns `false` (and counts a rejection) when the queue is full.
    ///
    /// The factory is called once per attempt, so it must build a fresh future
    /// each time.
    pub fn submit<F>(&self, name: &'static str, factory: F) -> bool
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);

        let task = Task {
            name,
            factory: Box::new(factory),
        };

        match self.sender.try_send(task) {
            Ok(()) => {
                self.state.counters.submitted.fetch_add(1, Ordering::Relaxed);
                task_metrics::record_task(name, "submitted");
                task_metrics::set_in_flight(self.state.in_flight.load(Ordering::SeqCst));
                true
            }
            Err(err) => {
                self.state.counters.rejected.fetch_add(1, Ordering::Relaxed);
                task_metrics::record_task(name, "rejected");
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "pool closed",
                };
                warn!(task = name, reason, "background task rejected");
                self.state.finish_one();
                false
            }
        }
    }

    pub fn stats(&self) -> TaskPoolStats {
        let c = &self.state.counters;
        TaskPoolStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            in_flight: self.state.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Resolve once no task is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// `wait_idle` bounded by `timeout`; `false` if work was still pending
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_idle()).await.is_ok()
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    state: Arc<PoolState>,
) {
    loop {
        let task = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };

        let Some(task) = task else {
            debug!(worker_id, "task queue closed, worker exiting");
            break;
        };

        run_with_retry(&task, &state).await;
        state.finish_one();
    }
}

async fn run_with_retry(task: &Task, state: &PoolState) {
    let config = &state.config;
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = Duration::from_millis(config.initial_backoff_ms);
    let max_backoff = Duration::from_millis(config.max_backoff_ms);

    for attempt in 1..=max_attempts {
        let outcome = AssertUnwindSafe((task.factory)()).catch_unwind().await;

        let err = match outcome {
            Ok(Ok(())) => {
                state.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                task_metrics::record_task(task.name, "succeeded");
                return;
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => "task panicked".to_string(),
        };

        if attempt == max_attempts {
            state.counters.failed.fetch_add(1, Ordering::Relaxed);
            task_metrics::record_task(task.name, "failed");
            error!(
                task = task.name,
                attempts = attempt,
                error = %err,
                "background task failed"
            );
            return;
        }

        state.counters.retried.fetch_add(1, Ordering::Relaxed);
        task_metrics::record_task(task.name, "retried");

        let delay = with_jitter(backoff);
        warn!(
            task = task.name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "background task attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;

        backoff = (backoff * 2).min(max_backoff);
    }
}

/// ±30% jitter so retries from many workers do not line up
fn with_jitter(base: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_config() -> TaskPoolConfig {
        TaskPoolConfig {
            workers: 2,
            queue_capacity: 16,
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_successful_task_counts_once() {
        let pool = TaskPool::start(fast_config());
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        assert!(pool.submit("ok", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }));

        pool.wait_idle().await;
        let stats = pool.stats();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let pool = TaskPool::start(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        pool.submit("flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("not yet");
                }
                Ok(())
            }
            .boxed()
        });

        pool.wait_idle().await;
        let stats = pool.stats();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_as_failed() {
        let pool = TaskPool::start(fast_config());

        pool.submit("broken", || {
            async { Err::<(), _>(anyhow::anyhow!("always")) }.boxed()
        });
        pool.wait_idle().await;

        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 2);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let pool = TaskPool::start(TaskPoolConfig {
            workers: 1,
            max_attempts: 1,
            ..fast_config()
        });

        pool.submit("panics", || {
            async {
                let fail = true;
                if fail {
                    panic!("boom");
                }
                Ok(())
            }
            .boxed()
        });
        pool.submit("after", || async { Ok(()) }.boxed());
        pool.wait_idle().await;

        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let pool = TaskPool::start(TaskPoolConfig {
            workers: 1,
            queue_capacity: 1,
            max_attempts: 1,
            ..fast_config()
        });
        let gate = Arc::new(Notify::new());

        // Occupy the only worker, then fill the single queue slot.
        let blocker = gate.clone();
        pool.submit("blocker", move || {
            let blocker = blocker.clone();
            async move {
                blocker.notified().await;
                Ok(())
            }
            .boxed()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool.submit("queued", || async { Ok(()) }.boxed()));
        assert!(!pool.submit("overflow", || async { Ok(()) }.boxed()));

        gate.notify_one();
        pool.wait_idle().await;

        let stats = pool.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.succeeded, 2);
    }
}
