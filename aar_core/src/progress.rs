use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives `(done, total)` updates while one file is processed.
///
/// For AAR these are block counts; byte-stream steps report bytes. Updates
/// may arrive from worker threads and out of order.
pub trait ProgressSink: Send + Sync {
    fn report(&self, done: u64, total: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn report(&self, done: u64, total: u64) {
        self(done, total)
    }
}

/// Discards every update.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _done: u64, _total: u64) {}
}

/// Counts finished units and forwards the running total to a sink.
///
/// Shared by all block jobs of one file; each job calls [`tick`](Self::tick)
/// once it has stored its payload.
pub struct ProgressCounter {
    done: AtomicU64,
    total: u64,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressCounter {
    pub fn new(total: u64, sink: Arc<dyn ProgressSink>) -> Arc<Self> {
        sink.report(0, total);
        Arc::new(Self {
            done: AtomicU64::new(0),
            total,
            sink,
        })
    }

    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::AcqRel) + 1;
        self.sink.report(done, self.total);
    }
}
