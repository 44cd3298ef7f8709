//! The Deserialization Pool (`spec.md` §4.2): core size 1, max size
//! `cpu_count + 1`, direct-handoff queue, daemon workers, 60s idle timeout.
//!
//! Grounded in the teacher's own hand-rolled `Worker`/`crossbeam_channel`
//! pattern (`src/worker.rs`) rather than a third-party thread-pool crate —
//! the teacher already shows a worker pool fed by a channel is the idiom
//! here, just sized fixed instead of core/max/direct-handoff.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small, bounded worker pool with Java `ThreadPoolExecutor`-style
/// semantics: a `SynchronousQueue`-equivalent hand-off, a core size that
/// stays warm, and extra workers spun up under load that retire themselves
/// after sitting idle.
pub struct DeserializationPool {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    worker_count: Arc<AtomicUsize>,
    max_workers: usize,
    idle_timeout: Duration,
}

impl DeserializationPool {
    /// Build a pool with one core worker already running.
    pub fn new(max_workers: usize) -> Self {
        let (sender, receiver) = bounded(0);
        let pool = Self {
            sender,
            receiver,
            worker_count: Arc::new(AtomicUsize::new(0)),
            max_workers: max_workers.max(1),
            idle_timeout: Duration::from_secs(60),
        };
        pool.spawn_worker();
        pool
    }

    fn spawn_worker(&self) {
        self.worker_count.fetch_add(1, Ordering::AcqRel);
        let receiver = self.receiver.clone();
        let worker_count = self.worker_count.clone();
        let idle_timeout = self.idle_timeout;
        std::thread::Builder::new()
            .name("hrpc-deserialize".into())
            .spawn(move || {
                while let Ok(job) = receiver.recv_timeout(idle_timeout) {
                    job();
                }
                worker_count.fetch_sub(1, Ordering::AcqRel);
            })
            .expect("failed to spawn deserialization pool worker");
    }

    /// Submit a framing task. If no worker is immediately free and the pool
    /// is below `max_workers`, a new worker is spawned; once at `max_workers`,
    /// this blocks until a worker becomes free — the framing/Reader thread
    /// backpressure described in `spec.md` §4.2 ("the Reader blocks...
    /// rather than dropping it").
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                if self.worker_count.load(Ordering::Acquire) < self.max_workers {
                    self.spawn_worker();
                }
                let _ = self.sender.send(job);
            }
            Err(TrySendError::Disconnected(_)) => {
                // Pool is shutting down; drop the job.
            }
        }
    }
}
