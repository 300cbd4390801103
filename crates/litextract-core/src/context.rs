//! Per-run shared state: progress counters, failure list, cancellation and
//! the observer. One [`RunContext`] is created per run and handed to every
//! component by reference.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::RunObserver;

/// Why a document did not yield a clean row group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Text extraction produced nothing; no request was made.
    EmptyText,
    /// The request failed for good (retries exhausted or fatal).
    CriticalError,
    /// The reply had no `choices[0].message.content`.
    ApiResponseError,
    /// The reply was read but no answer could be parsed. Rows are still written.
    NoAnswersParsed,
    /// The row group could not be appended to the temp store.
    SaveFailed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureReason::EmptyText => "empty text",
            FailureReason::CriticalError => "critical error",
            FailureReason::ApiResponseError => "API response error",
            FailureReason::NoAnswersParsed => "no answers parsed",
            FailureReason::SaveFailed => "save failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub document: String,
    pub reason: FailureReason,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.document, self.reason)
    }
}

/// Counters shared by all batch workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub completed: usize,
    pub total: usize,
    pub failed: Vec<Failure>,
}

pub struct RunContext {
    progress: Mutex<ProgressState>,
    cancel: CancellationToken,
    observer: Arc<dyn RunObserver>,
}

impl RunContext {
    pub fn new(observer: Arc<dyn RunObserver>, cancel: CancellationToken) -> Self {
        Self {
            progress: Mutex::new(ProgressState::default()),
            cancel,
            observer,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Forward a log line to the observer and mirror it to `tracing`.
    pub fn log(&self, message: impl AsRef<str>, important: bool) {
        let message = message.as_ref();
        if important {
            tracing::info!("{message}");
        } else {
            tracing::debug!("{message}");
        }
        self.observer.on_log(message, important);
    }

    pub fn status(&self, status: &str) {
        self.observer.on_status(status);
    }

    /// Reset the counters for a run over `total` documents.
    pub fn begin(&self, total: usize) {
        let mut progress = self.lock_progress();
        *progress = ProgressState {
            total,
            ..Default::default()
        };
    }

    /// Lock the progress counters.
    ///
    /// The result writer holds this guard across the row-store append so the
    /// file and the `completed` counter never disagree.
    pub(crate) fn lock_progress(&self) -> MutexGuard<'_, ProgressState> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one more finished document under the guard from
    /// [`lock_progress`](Self::lock_progress). Returns the counts to pass to
    /// [`notify_progress`](Self::notify_progress) once the guard is dropped.
    pub(crate) fn complete_locked(progress: &mut ProgressState) -> (usize, usize) {
        progress.completed += 1;
        (progress.completed, progress.total)
    }

    /// Record a failure without finishing the document.
    pub fn record_failure(&self, document: &str, reason: FailureReason) {
        self.lock_progress().failed.push(Failure {
            document: document.to_string(),
            reason,
        });
    }

    /// Record a failure and finish the document in one step.
    pub fn fail_and_complete(&self, document: &str, reason: FailureReason) {
        let (completed, total) = {
            let mut progress = self.lock_progress();
            progress.failed.push(Failure {
                document: document.to_string(),
                reason,
            });
            Self::complete_locked(&mut progress)
        };
        self.notify_progress(completed, total);
    }

    pub fn snapshot(&self) -> ProgressState {
        self.lock_progress().clone()
    }

    /// Must not be called while holding the progress lock: observers may
    /// read the context.
    pub(crate) fn notify_progress(&self, completed: usize, total: usize) {
        self.observer.on_progress(completed, total);
        if total > 0 {
            let percent = completed as f64 / total as f64 * 100.0;
            self.observer.on_status(&format!(
                "Processing: {completed}/{total} PDFs ({percent:.1}%)"
            ));
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("progress", &*self.lock_progress())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
