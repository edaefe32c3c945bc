//! Batch orchestration: run one per-file step over a list of paths.
//!
//! A [`TaskRunner`] exposes three signals to whatever drives it (progress,
//! message, running) through a [`TaskObserver`], and keeps a pollable
//! [`TaskStatus`] snapshot. Each file is isolated: a failure is recorded and,
//! depending on the [`ErrorPolicy`], the batch either moves on or stops.
//!
//! ```text
//! Idle ──start──▶ Running ──▶ Succeeded
//!                    │    └──▶ Failed
//!                    ▲              │
//!                    └────start─────┘
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{AarError, Result};
use crate::progress::ProgressSink;

// ── Steps ──────────────────────────────────────────────────────────────────

/// What a step produced for one input.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub output: PathBuf,
    /// Final status line, e.g. the elapsed time.
    pub message: String,
}

/// One per-file operation the batch can run.
pub trait FileStep: Send + Sync {
    /// Short label for logs ("AAR compression").
    fn describe(&self) -> &'static str;

    /// Process `path`. Precondition errors (see
    /// [`AarError::is_precondition`]) mark the file as skipped rather than
    /// failed.
    fn run(&self, path: &Path, progress: Arc<dyn ProgressSink>) -> Result<StepReport>;
}

// ── Policy and state ───────────────────────────────────────────────────────

/// What to do with the rest of the batch once a file fails.
///
/// Skipped files (wrong type, too small) never stop a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    #[default]
    ContinueOnError,
    AbortOnError,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "continue" => Ok(Self::ContinueOnError),
            "abort" => Ok(Self::AbortOnError),
            other => Err(format!("unknown error policy '{other}'; expected continue or abort")),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ContinueOnError => "continue",
            Self::AbortOnError => "abort",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Indeterminate,
    /// Share of the whole batch done, `0.0..=1.0`.
    Fraction(f64),
}

#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub state: TaskState,
    pub progress: Progress,
    pub message: String,
}

/// Receives the batch signals. Called from the orchestrating thread and,
/// for progress, from pool workers.
pub trait TaskObserver: Send + Sync {
    fn on_progress(&self, _progress: Progress) {}
    fn on_message(&self, _message: &str) {}
    fn on_running(&self, _running: bool) {}
}

pub struct NoObserver;

impl TaskObserver for NoObserver {}

// ── Summary ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileIssue {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// `(input, output)` for every file that went through.
    pub completed: Vec<(PathBuf, PathBuf)>,
    pub skipped: Vec<FileIssue>,
    pub failed: Vec<FileIssue>,
    /// A failure under [`ErrorPolicy::AbortOnError`] stopped the batch.
    pub aborted: bool,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn state(&self) -> TaskState {
        if self.failed.is_empty() && !self.cancelled {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        }
    }
}

// ── Runner ─────────────────────────────────────────────────────────────────

/// Drives a [`FileStep`] over a batch of paths, one batch at a time.
///
/// Clones share state: any clone can poll, cancel, or restart the same
/// runner.
#[derive(Clone)]
pub struct TaskRunner {
    shared: Arc<Shared>,
}

struct Shared {
    status: Mutex<TaskStatus>,
    observer: Arc<dyn TaskObserver>,
    policy: ErrorPolicy,
    cancel_requested: AtomicBool,
    active_file: Mutex<ActiveFile>,
}

/// Which file's progress sink is still live. Block jobs of a file that has
/// already returned can report late; those reports are dropped.
#[derive(Default)]
struct ActiveFile {
    last_id: u64,
    current: Option<u64>,
}

/// Handle to a batch running on its own thread.
pub struct BatchHandle {
    handle: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    pub fn join(self) -> Result<BatchSummary> {
        self.handle
            .join()
            .map_err(|_| AarError::Other(anyhow::anyhow!("batch thread panicked")))
    }
}

impl TaskRunner {
    pub fn new(observer: Arc<dyn TaskObserver>, policy: ErrorPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                status: Mutex::new(TaskStatus {
                    state: TaskState::Idle,
                    progress: Progress::Fraction(0.0),
                    message: String::new(),
                }),
                observer,
                policy,
                cancel_requested: AtomicBool::new(false),
                active_file: Mutex::new(ActiveFile::default()),
            }),
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.shared.policy
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.lock_status().clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_status().state == TaskState::Running
    }

    /// Asks a running batch to stop before its next file. The file in
    /// progress always runs to completion.
    pub fn cancel(&self) {
        if self.is_running() {
            self.shared.cancel_requested.store(true, Ordering::Release);
        }
    }

    /// Runs the batch on a new orchestrating thread.
    ///
    /// Fails with [`AarError::Busy`] while another batch is running.
    pub fn start(&self, paths: Vec<PathBuf>, step: Arc<dyn FileStep>) -> Result<BatchHandle> {
        self.shared.begin()?;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("aar-batch".to_string())
            .spawn(move || shared.run_batch(&paths, step.as_ref()));
        match spawned {
            Ok(handle) => Ok(BatchHandle { handle }),
            Err(e) => {
                self.shared.end(TaskState::Failed);
                Err(e.into())
            }
        }
    }

    /// Runs the batch on the calling thread.
    pub fn run(&self, paths: &[PathBuf], step: &dyn FileStep) -> Result<BatchSummary> {
        self.shared.begin()?;
        Ok(self.shared.run_batch(paths, step))
    }
}

impl Shared {
    fn lock_status(&self) -> MutexGuard<'_, TaskStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_active_file(&self) -> MutexGuard<'_, ActiveFile> {
        self.active_file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_file(&self) -> u64 {
        let mut active = self.lock_active_file();
        active.last_id += 1;
        active.current = Some(active.last_id);
        active.last_id
    }

    fn close_file(&self) {
        self.lock_active_file().current = None;
    }

    fn report_file_progress(&self, file_id: u64, fraction: f64) {
        // Held across the update so close_file cannot interleave.
        let active = self.lock_active_file();
        if active.current == Some(file_id) {
            self.advance_progress(fraction);
        }
    }

    fn begin(&self) -> Result<()> {
        {
            let mut status = self.lock_status();
            if status.state == TaskState::Running {
                return Err(AarError::Busy);
            }
            status.state = TaskState::Running;
            status.progress = Progress::Fraction(0.0);
            status.message.clear();
        }
        self.cancel_requested.store(false, Ordering::Release);
        self.observer.on_running(true);
        self.observer.on_progress(Progress::Fraction(0.0));
        Ok(())
    }

    fn end(&self, state: TaskState) {
        self.lock_status().state = state;
        self.observer.on_running(false);
    }

    fn set_message(&self, message: String) {
        self.observer.on_message(&message);
        self.lock_status().message = message;
    }

    fn set_progress(&self, progress: Progress) {
        self.lock_status().progress = progress;
        self.observer.on_progress(progress);
    }

    /// Like [`set_progress`](Self::set_progress) but ignores updates that
    /// would move the bar backwards; worker reports can arrive out of order.
    fn advance_progress(&self, fraction: f64) {
        {
            let mut status = self.lock_status();
            if let Progress::Fraction(current) = status.progress {
                if fraction <= current {
                    return;
                }
            }
            status.progress = Progress::Fraction(fraction);
        }
        self.observer.on_progress(Progress::Fraction(fraction));
    }

    fn run_batch(self: &Arc<Self>, paths: &[PathBuf], step: &dyn FileStep) -> BatchSummary {
        let total = paths.len();
        let mut summary = BatchSummary::default();
        tracing::debug!(
            files = total,
            step = step.describe(),
            policy = %self.policy,
            "batch started"
        );

        for (file_index, path) in paths.iter().enumerate() {
            if self.cancel_requested.swap(false, Ordering::AcqRel) {
                summary.cancelled = true;
                self.set_message(format!("Cancelled after {file_index} of {total} files"));
                break;
            }

            self.set_progress(Progress::Indeterminate);
            self.set_message(format!("Executing task on: {}", path.display()));

            let sink: Arc<dyn ProgressSink> = Arc::new(FileProgress {
                shared: Arc::clone(self),
                file_id: self.open_file(),
                file_index,
                file_count: total,
            });
            let outcome = catch_unwind(AssertUnwindSafe(|| step.run(path, sink)))
                .unwrap_or_else(|_| {
                    Err(AarError::Other(anyhow::anyhow!(
                        "{} panicked",
                        step.describe()
                    )))
                });
            self.close_file();

            match outcome {
                Ok(report) => {
                    tracing::info!(
                        input = %path.display(),
                        output = %report.output.display(),
                        "{}", report.message
                    );
                    self.set_message(report.message);
                    summary.completed.push((path.clone(), report.output));
                }
                Err(e) if e.is_precondition() => {
                    tracing::warn!(input = %path.display(), error = %e, "skipped");
                    let message = e.to_string();
                    self.set_message(message.clone());
                    summary.skipped.push(FileIssue {
                        path: path.clone(),
                        message,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        input = %path.display(),
                        error = %e,
                        kind = ?e.kind(),
                        "failed"
                    );
                    let mut message = format!("Failed to complete task on {}: {e}", path.display());
                    let abort = self.policy == ErrorPolicy::AbortOnError;
                    let remaining = total - file_index - 1;
                    if abort && remaining > 0 {
                        message.push_str(&format!(" ({remaining} remaining files not attempted)"));
                    }
                    self.set_message(message.clone());
                    summary.failed.push(FileIssue {
                        path: path.clone(),
                        message,
                    });
                    if abort {
                        summary.aborted = true;
                        break;
                    }
                }
            }

            self.advance_progress((file_index + 1) as f64 / total as f64);
        }

        if total == 0 {
            self.set_progress(Progress::Fraction(1.0));
        }
        let state = summary.state();
        tracing::debug!(
            completed = summary.completed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            state = ?state,
            "batch finished"
        );
        self.end(state);
        summary
    }
}

/// Maps one file's `(done, total)` onto the batch-wide fraction.
struct FileProgress {
    shared: Arc<Shared>,
    file_id: u64,
    file_index: usize,
    file_count: usize,
}

impl ProgressSink for FileProgress {
    fn report(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let within = (done.min(total) as f64) / total as f64;
        let fraction = (self.file_index as f64 + within) / self.file_count as f64;
        self.shared.report_file_progress(self.file_id, fraction);
    }
}
