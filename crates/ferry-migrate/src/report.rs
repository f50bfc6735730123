//! Batch summary and process exit code.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::error::FailureKind;
use crate::types::{JobStatus, MigrationBatch};

/// Exit code for configuration or authentication failures before any job ran.
pub const EXIT_FATAL: i32 = 3;

/// Exit code when an operator interrupt stopped the batch.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Batch outcome, derived from code transfers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Every attempted job transferred its code. Also the verdict for an
    /// empty batch.
    AllSuccess,
    /// Some attempted jobs failed.
    PartialFailure,
    /// Every attempted job failed.
    AllFailure,
}

impl Verdict {
    /// Process exit code for this verdict.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::AllSuccess => 0,
            Self::PartialFailure => 1,
            Self::AllFailure => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllSuccess => write!(f, "all repositories migrated"),
            Self::PartialFailure => write!(f, "partial failure"),
            Self::AllFailure => write!(f, "total failure"),
        }
    }
}

/// A job that ended in `CODE_FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedJob {
    /// Source repository name.
    pub repository: String,
    /// Failure classification.
    pub kind: FailureKind,
    /// Error message.
    pub message: String,
    /// Offending paths for size-limit failures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// Aggregated outcome of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Jobs that entered the code-transfer phase.
    pub attempted: usize,
    /// Jobs whose code transfer succeeded.
    pub code_succeeded: usize,
    /// Jobs whose CI conversion ran.
    pub ci_attempted: usize,
    /// Jobs whose CI conversion succeeded.
    pub ci_succeeded: usize,
    /// Source names skipped because the destination existed.
    pub skipped: Vec<String>,
    /// Source names never started because of an interrupt.
    pub not_started: Vec<String>,
    /// Failed jobs.
    pub failures: Vec<FailedJob>,
    /// CI warnings, as `(repository, warning)`.
    pub ci_warnings: Vec<(String, String)>,
    /// Browser URLs of successfully migrated repositories.
    pub migrated_urls: Vec<String>,
    /// Whether an interrupt stopped the batch.
    pub interrupted: bool,
    /// Verdict over attempted jobs.
    pub verdict: Verdict,
    /// When the batch started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    /// Aggregate a finished batch.
    pub fn from_batch(batch: &MigrationBatch) -> Self {
        let mut report = Self {
            attempted: 0,
            code_succeeded: 0,
            ci_attempted: 0,
            ci_succeeded: 0,
            skipped: Vec::new(),
            not_started: Vec::new(),
            failures: Vec::new(),
            ci_warnings: Vec::new(),
            migrated_urls: Vec::new(),
            interrupted: batch.interrupted,
            verdict: Verdict::AllSuccess,
            started_at: None,
            completed_at: None,
        };

        for job in &batch.jobs {
            let name = job.source.name.clone();
            match job.status {
                JobStatus::SkippedConflict => report.skipped.push(name.clone()),
                JobStatus::Pending | JobStatus::ConflictChecked => {
                    report.not_started.push(name.clone());
                }
                _ => {}
            }
            if !job.status.is_attempted() {
                continue;
            }

            report.attempted += 1;
            if job.code_succeeded() {
                report.code_succeeded += 1;
                if let Some(url) = &job.destination_url {
                    report.migrated_urls.push(url.clone());
                }
            } else if let Some(failure) = &job.failure {
                report.failures.push(FailedJob {
                    repository: name.clone(),
                    kind: failure.kind,
                    message: failure.message.clone(),
                    paths: failure.paths.clone(),
                });
            }

            if let Some(ci) = &job.ci {
                report.ci_attempted += 1;
                if !ci.failed {
                    report.ci_succeeded += 1;
                }
                report
                    .ci_warnings
                    .extend(ci.warnings.iter().map(|w| (name.clone(), w.clone())));
            }
        }

        report.verdict = if report.code_succeeded == report.attempted {
            Verdict::AllSuccess
        } else if report.code_succeeded == 0 {
            Verdict::AllFailure
        } else {
            Verdict::PartialFailure
        };
        report
    }

    /// Attach the batch's wall-clock bounds.
    pub fn with_timing(mut self, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self.completed_at = Some(completed_at);
        self
    }

    /// Process exit code: the verdict's code, or 130 after an interrupt.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else {
            self.verdict.exit_code()
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Migration Summary ===")?;
        writeln!(f)?;
        writeln!(f, "Code transferred:   {}/{}", self.code_succeeded, self.attempted)?;
        writeln!(f, "CI converted:       {}/{}", self.ci_succeeded, self.ci_attempted)?;
        if !self.skipped.is_empty() {
            writeln!(f, "Skipped (exists):   {}", self.skipped.join(", "))?;
        }
        if !self.not_started.is_empty() {
            writeln!(f, "Not started:        {}", self.not_started.join(", "))?;
        }

        if !self.failures.is_empty() {
            writeln!(f, "\nFailed ({}):", self.failures.len())?;
            for failure in &self.failures {
                writeln!(f, "  [{}] {}: {}", failure.kind, failure.repository, failure.message)?;
            }
        }

        if !self.ci_warnings.is_empty() {
            writeln!(f, "\nCI warnings ({}):", self.ci_warnings.len())?;
            for (repo, warning) in &self.ci_warnings {
                writeln!(f, "  {repo}: {warning}")?;
            }
        }

        if !self.migrated_urls.is_empty() {
            writeln!(f, "\nMigrated repositories:")?;
            for url in &self.migrated_urls {
                writeln!(f, "  {url}")?;
            }
        }

        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            writeln!(f, "\nCompleted in {} seconds", (end - start).num_seconds())?;
        }

        if self.interrupted {
            write!(f, "\nResult: interrupted ({})", self.verdict)
        } else {
            write!(f, "\nResult: {}", self.verdict)
        }
    }
}
