//! Background job scheduler used for the two off-thread jobs §4.5 requires:
//! post-merge flush/sync-commit-renewal, and `handleMergeException`'s
//! `failEngine` dispatch. Both MUST NOT run on a merge thread.
//!
//! Adapted from `crates/engine/src/background.rs`'s general-purpose
//! priority task queue.

use parking_lot::Mutex as ParkingMutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// Priority levels for background work (§4.5: flush/renew jobs vs. engine
/// failure dispatch both go through here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
}

#[derive(Debug)]
pub struct BackpressureError;

impl std::fmt::Display for BackpressureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "background scheduler queue is full")
    }
}

impl std::error::Error for BackpressureError {}

pub struct SchedulerStats {
    pub queue_depth: usize,
    pub active_tasks: usize,
    pub tasks_completed: u64,
    pub worker_count: usize,
}

struct TaskEnvelope {
    priority: TaskPriority,
    sequence: u64,
    work: Box<dyn FnOnce() + Send>,
}

impl Eq for TaskEnvelope {}

impl PartialEq for TaskEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Ord for TaskEnvelope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TaskEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SchedulerInner {
    queue: ParkingMutex<BinaryHeap<TaskEnvelope>>,
    work_ready: parking_lot::Condvar,
    drain_cond: parking_lot::Condvar,
    shutdown: AtomicBool,
    sequence: AtomicU64,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
}

/// Fixed worker pool draining a priority queue; higher priority first, FIFO
/// within a priority.
pub struct BackgroundScheduler {
    inner: Arc<SchedulerInner>,
    workers: ParkingMutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl BackgroundScheduler {
    pub fn new(num_threads: usize, max_queue_depth: usize) -> Self {
        let inner = Arc::new(SchedulerInner {
            queue: ParkingMutex::new(BinaryHeap::new()),
            work_ready: parking_lot::Condvar::new(),
            drain_cond: parking_lot::Condvar::new(),
            shutdown: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("shard-engine-bg-{}", i))
                .spawn(move || worker_loop(&inner_clone))
                .expect("failed to spawn background worker thread");
            workers.push(handle);
        }

        Self {
            inner,
            workers: ParkingMutex::new(workers),
            num_threads,
        }
    }

    pub fn submit(
        &self,
        priority: TaskPriority,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<(), BackpressureError> {
        if self.inner.shutdown.load(AtomicOrdering::Acquire) {
            return Err(BackpressureError);
        }
        if self.inner.queue_depth.load(AtomicOrdering::Acquire) >= self.inner.max_queue_depth {
            return Err(BackpressureError);
        }

        let sequence = self.inner.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let envelope = TaskEnvelope {
            priority,
            sequence,
            work: Box::new(work),
        };

        {
            let mut queue = self.inner.queue.lock();
            queue.push(envelope);
            self.inner.queue_depth.fetch_add(1, AtomicOrdering::Release);
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(AtomicOrdering::Acquire) > 0
            || self.inner.active_tasks.load(AtomicOrdering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_depth: self.inner.queue_depth.load(AtomicOrdering::Relaxed),
            active_tasks: self.inner.active_tasks.load(AtomicOrdering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(AtomicOrdering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

struct ActiveTaskGuard<'a> {
    inner: &'a SchedulerInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, AtomicOrdering::Release);
        self.inner.tasks_completed.fetch_add(1, AtomicOrdering::Relaxed);
        if prev_active == 1 && self.inner.queue_depth.load(AtomicOrdering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &SchedulerInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop() {
                    inner.queue_depth.fetch_sub(1, AtomicOrdering::Release);
                    inner.active_tasks.fetch_add(1, AtomicOrdering::Release);
                    break task;
                }
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task.work)) {
            error!(
                "background task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    #[test]
    fn submit_and_drain() {
        let scheduler = BackgroundScheduler::new(2, 4096);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            scheduler
                .submit(TaskPriority::Normal, move || {
                    c.fetch_add(1, AtomicOrdering::Relaxed);
                })
                .unwrap();
        }
        scheduler.drain();
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 10);
        scheduler.shutdown();
    }

    #[test]
    fn priority_ordering() {
        let scheduler = BackgroundScheduler::new(1, 4096);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        scheduler.submit(TaskPriority::Low, move || b.wait()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let order = Arc::new(ParkingMutex::new(Vec::new()));
        for (p, label) in [
            (TaskPriority::Low, "low"),
            (TaskPriority::Normal, "normal"),
            (TaskPriority::High, "high"),
        ] {
            let o = Arc::clone(&order);
            scheduler.submit(p, move || o.lock().push(label)).unwrap();
        }
        barrier.wait();
        scheduler.drain();
        assert_eq!(*order.lock(), vec!["high", "normal", "low"]);
        scheduler.shutdown();
    }

    #[test]
    fn backpressure_rejects_when_full() {
        let scheduler = BackgroundScheduler::new(1, 1);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        scheduler.submit(TaskPriority::Normal, move || b.wait()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        scheduler.submit(TaskPriority::Normal, || {}).unwrap();
        assert!(scheduler.submit(TaskPriority::Normal, || {}).is_err());
        barrier.wait();
        scheduler.drain();
        scheduler.shutdown();
    }

    #[test]
    fn panic_in_task_does_not_hang_drain() {
        let scheduler = BackgroundScheduler::new(2, 4096);
        scheduler
            .submit(TaskPriority::Normal, || panic!("intentional"))
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        scheduler
            .submit(TaskPriority::Normal, move || {
                c.fetch_add(1, AtomicOrdering::Relaxed);
            })
            .unwrap();
        scheduler.drain();
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 1);
        scheduler.shutdown();
    }

    #[test]
    fn submit_after_shutdown_rejected() {
        let scheduler = BackgroundScheduler::new(1, 16);
        scheduler.shutdown();
        assert!(scheduler.submit(TaskPriority::Normal, || {}).is_err());
    }
}
