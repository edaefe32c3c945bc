use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::{AarError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads for block compression jobs.
///
/// The handle is cheap to clone and every clone submits into the same queue,
/// so one pool can serve several encoders, decoders, and batches at once.
/// Jobs run in no particular order. A job that panics is logged and counted;
/// the worker that ran it keeps going.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    num_workers: usize,
    sender: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub submitted: usize,
    pub completed: usize,
    pub panicked: usize,
}

impl PoolStats {
    pub fn pending(&self) -> usize {
        self.submitted.saturating_sub(self.completed)
    }
}

impl WorkerPool {
    /// Spawns `num_workers` threads (at least one).
    pub fn new(num_workers: usize) -> Self {
        Self::start(num_workers, |worker_id, rx, counters| {
            thread::Builder::new()
                .name(format!("aar-worker-{worker_id}"))
                .spawn(move || run_worker_loop(worker_id, rx, counters))
        })
    }

    fn start<S>(num_workers: usize, spawn: S) -> Self
    where
        S: Fn(usize, Receiver<Job>, Arc<PoolCounters>) -> io::Result<JoinHandle<()>>,
    {
        let num_workers = num_workers.max(1);
        let (tx, rx) = unbounded::<Job>();
        let counters = Arc::new(PoolCounters::default());

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            match spawn(worker_id, rx.clone(), Arc::clone(&counters)) {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::error!(worker_id, error = %e, "failed to spawn worker thread"),
            }
        }
        tracing::debug!(workers = handles.len(), "worker pool started");

        Self {
            inner: Arc::new(PoolInner {
                num_workers: handles.len(),
                sender: RwLock::new(Some(tx)),
                workers: Mutex::new(handles),
                counters,
            }),
        }
    }

    /// One worker per logical CPU.
    pub fn with_available_parallelism() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn num_workers(&self) -> usize {
        self.inner.num_workers
    }

    /// Queues `job` for execution and returns immediately.
    ///
    /// Fails with [`AarError::NoWorkers`] if no worker thread could be
    /// started, since the job would never run.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.num_workers == 0 {
            return Err(AarError::NoWorkers);
        }
        let guard = self
            .inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(AarError::PoolClosed)?;

        self.inner.counters.submitted.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(job)).is_err() {
            self.inner.counters.submitted.fetch_sub(1, Ordering::AcqRel);
            return Err(AarError::PoolClosed);
        }
        Ok(())
    }

    /// Stops accepting jobs, lets the queue drain, and joins every worker.
    ///
    /// Calling it again is a no-op. Must not be called from inside a job.
    pub fn shutdown(&self) {
        let sender = self
            .inner
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<_> = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread exited abnormally");
            }
        }
        tracing::debug!(stats = ?self.stats(), "worker pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            workers: self.inner.num_workers,
            submitted: counters.submitted.load(Ordering::Acquire),
            completed: counters.completed.load(Ordering::Acquire),
            panicked: counters.panicked.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .finish()
    }
}

fn run_worker_loop(worker_id: usize, jobs: Receiver<Job>, counters: Arc<PoolCounters>) {
    // Ends once every sender is gone and the queue is empty.
    for job in jobs {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            counters.panicked.fetch_add(1, Ordering::AcqRel);
            tracing::error!(worker_id, panic = %panic_message(&*payload), "job panicked");
        }
        counters.completed.fetch_add(1, Ordering::AcqRel);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
