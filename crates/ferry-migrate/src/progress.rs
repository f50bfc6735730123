//! Progress tracking for a migration batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::JobStatus;

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Progress update information.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Phase the job just entered.
    pub phase: JobPhase,

    /// Repository being processed.
    pub current_item: String,

    /// Jobs finished so far.
    pub completed: u64,

    /// Jobs in the batch.
    pub total: u64,

    /// Optional message.
    pub message: Option<String>,
}

/// Phases a job goes through, as shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Checking the destination name.
    CheckingConflict,
    /// Moving code and refs.
    TransferringCode,
    /// Converting CI configuration.
    ConvertingCi,
    /// Finished with the given terminal status.
    Finished(JobStatus),
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CheckingConflict => write!(f, "Checking destination"),
            Self::TransferringCode => write!(f, "Transferring code"),
            Self::ConvertingCi => write!(f, "Converting CI"),
            Self::Finished(JobStatus::Done) => write!(f, "Done"),
            Self::Finished(JobStatus::SkippedConflict) => write!(f, "Skipped"),
            Self::Finished(status) => write!(f, "Finished ({status})"),
        }
    }
}

/// Progress tracker shared by the batch's workers.
pub struct MigrationProgress {
    completed: AtomicU64,
    total: AtomicU64,
    callback: Option<Arc<ProgressCallback>>,
}

impl MigrationProgress {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            callback: None,
        }
    }

    /// Create a progress tracker with a callback.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            ..Self::new()
        }
    }

    /// Start a batch of `total` jobs.
    pub fn start(&self, total: u64) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// A job entered a new phase. Finishing phases count as completion.
    pub fn phase(&self, item: &str, phase: JobPhase, message: Option<String>) {
        if matches!(phase, JobPhase::Finished(_)) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        self.notify(item, phase, message);
    }

    /// Get current progress percentage.
    pub fn percentage(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        let completed = self.completed.load(Ordering::SeqCst);
        (completed as f64 / total as f64) * 100.0
    }

    /// Jobs finished so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn notify(&self, item: &str, phase: JobPhase, message: Option<String>) {
        if let Some(callback) = &self.callback {
            callback(ProgressUpdate {
                phase,
                current_item: item.to_string(),
                completed: self.completed.load(Ordering::SeqCst),
                total: self.total.load(Ordering::SeqCst),
                message,
            });
        }
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_progress_tracker() {
        let progress = MigrationProgress::new();
        progress.start(4);
        assert_eq!(progress.percentage(), 0.0);

        progress.phase("demo", JobPhase::TransferringCode, None);
        assert_eq!(progress.completed(), 0);

        progress.phase("demo", JobPhase::Finished(JobStatus::Done), None);
        assert!((progress.percentage() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_progress_with_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let progress = MigrationProgress::with_callback(Box::new(move |update| {
            sink.lock().push((update.current_item, update.phase, update.completed));
        }));
        progress.start(1);
        progress.phase("demo", JobPhase::CheckingConflict, None);
        progress.phase("demo", JobPhase::Finished(JobStatus::SkippedConflict), None);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], ("demo".to_string(), JobPhase::Finished(JobStatus::SkippedConflict), 1));
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(JobPhase::Finished(JobStatus::Done).to_string(), "Done");
        assert_eq!(
            JobPhase::Finished(JobStatus::CodeFailed).to_string(),
            "Finished (CODE_FAILED)"
        );
    }
}
