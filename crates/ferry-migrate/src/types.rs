//! Common types for migration operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{FailureKind, MigrationError, Result};

/// Repository visibility, as understood by the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to everyone.
    Public,
    /// Visible to members only.
    Private,
}

impl Visibility {
    /// Map a GitLab visibility level. `internal` has no GitHub counterpart and
    /// becomes private.
    pub fn from_gitlab(level: &str) -> Self {
        if level.eq_ignore_ascii_case("public") {
            Self::Public
        } else {
            Self::Private
        }
    }

    /// Whether the destination should mark the repository private.
    pub fn is_private(self) -> bool {
        self == Self::Private
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// A repository at the source provider. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRepository {
    /// Provider identifier.
    pub id: u64,

    /// Display name.
    pub name: String,

    /// URL-safe path slug, may be empty.
    pub path: String,

    /// Owning namespace path.
    pub namespace: String,

    /// HTTP clone URL, without credentials.
    pub http_url: String,

    /// Visibility at the source.
    pub visibility: Visibility,

    /// Free-form description.
    pub description: Option<String>,

    /// Default branch, if the repository is not empty.
    pub default_branch: Option<String>,

    /// Last recorded activity.
    pub last_activity_at: Option<DateTime<Utc>>,

    /// Branch on which a CI configuration file was found.
    pub ci_config_ref: Option<String>,
}

impl SourceRepository {
    /// Whether the repository carries a CI configuration file.
    pub fn has_ci_config(&self) -> bool {
        self.ci_config_ref.is_some()
    }

    /// `namespace/path`, falling back to the display name.
    pub fn full_path(&self) -> String {
        let slug = if self.path.is_empty() {
            &self.name
        } else {
            &self.path
        };
        if self.namespace.is_empty() {
            slug.clone()
        } else {
            format!("{}/{slug}", self.namespace)
        }
    }
}

/// Destination-safe repository name. Built only by the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationName(String);

impl DestinationName {
    pub(crate) fn from_sanitized(name: String) -> Self {
        Self(name)
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DestinationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DestinationName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-job state machine value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    ConflictChecked,
    SkippedConflict,
    CodeTransferring,
    CodeFailed,
    CodeSucceeded,
    CiConverting,
    CiFailed,
    CiSucceeded,
    Done,
}

impl JobStatus {
    /// Whether `next` is a legal forward transition from this status.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, ConflictChecked | CodeFailed)
                | (ConflictChecked, SkippedConflict | CodeTransferring | CodeFailed)
                | (CodeTransferring, CodeFailed | CodeSucceeded)
                | (CodeSucceeded, CiConverting | Done)
                | (CiConverting, CiFailed | CiSucceeded)
                | (CiFailed | CiSucceeded, Done)
        )
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SkippedConflict | Self::CodeFailed | Self::Done)
    }

    /// Whether the job entered the code-transfer phase (or failed at the
    /// conflict check under the `fail` policy).
    pub fn is_attempted(self) -> bool {
        !matches!(
            self,
            Self::Pending | Self::ConflictChecked | Self::SkippedConflict
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::ConflictChecked => "CONFLICT_CHECKED",
            Self::SkippedConflict => "SKIPPED_CONFLICT",
            Self::CodeTransferring => "CODE_TRANSFERRING",
            Self::CodeFailed => "CODE_FAILED",
            Self::CodeSucceeded => "CODE_SUCCEEDED",
            Self::CiConverting => "CI_CONVERTING",
            Self::CiFailed => "CI_FAILED",
            Self::CiSucceeded => "CI_SUCCEEDED",
            Self::Done => "DONE",
        };
        f.write_str(label)
    }
}

/// Outcome of moving a repository's code and refs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Whether every branch and tag reached the destination.
    pub success: bool,

    /// Human-readable detail.
    pub detail: String,

    /// Number of branches present at the destination.
    pub branches: usize,

    /// Number of tags present at the destination.
    pub tags: usize,
}

impl TransferResult {
    /// A successful transfer.
    pub fn succeeded(detail: impl Into<String>, branches: usize, tags: usize) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            branches,
            tags,
        }
    }

    /// A failed transfer.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            ..Default::default()
        }
    }
}

/// Outcome of a CI configuration conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Number of workflows written.
    pub converted_count: usize,

    /// Converter warnings, including the failure reason when `failed`.
    pub warnings: Vec<String>,

    /// Whether the converter failed.
    pub failed: bool,

    /// Directory the converter wrote its artifacts to.
    pub output_dir: Option<PathBuf>,
}

impl ConversionResult {
    /// A failed conversion carrying its reason as a warning.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            failed: true,
            warnings: vec![reason.into()],
            ..Default::default()
        }
    }
}

/// Why a job failed, detached from the originating error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Failure classification.
    pub kind: FailureKind,

    /// Error message.
    pub message: String,

    /// Offending paths for size-limit failures.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub paths: Vec<String>,
}

impl From<&MigrationError> for JobFailure {
    fn from(err: &MigrationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            paths: err.offending_paths().to_vec(),
        }
    }
}

/// One repository's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    /// 1-based catalog index the operator selected.
    pub index: usize,

    /// Source repository.
    pub source: SourceRepository,

    /// Sanitized destination name.
    pub destination: DestinationName,

    /// Current state.
    pub status: JobStatus,

    /// Code-transfer outcome, once attempted.
    pub transfer: Option<TransferResult>,

    /// CI-conversion outcome, when conversion ran.
    pub ci: Option<ConversionResult>,

    /// Failure detail for `CODE_FAILED` jobs.
    pub failure: Option<JobFailure>,

    /// Browser URL of the created destination repository.
    pub destination_url: Option<String>,
}

impl MigrationJob {
    /// Create a pending job.
    pub fn new(index: usize, source: SourceRepository, destination: DestinationName) -> Self {
        Self {
            index,
            source,
            destination,
            status: JobStatus::Pending,
            transfer: None,
            ci: None,
            failure: None,
            destination_url: None,
        }
    }

    /// Move the job forward. Backward or skipping transitions are rejected and
    /// leave the status unchanged.
    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(MigrationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(
            repo = %self.source.name,
            from = %self.status,
            to = %next,
            "Job transition"
        );
        self.status = next;
        Ok(())
    }

    /// Whether the code transfer finished successfully.
    pub fn code_succeeded(&self) -> bool {
        self.transfer.as_ref().is_some_and(|t| t.success)
    }

    /// Whether CI conversion ran and succeeded.
    pub fn ci_succeeded(&self) -> bool {
        self.ci.as_ref().is_some_and(|c| !c.failed)
    }
}

/// The ordered jobs of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationBatch {
    /// Jobs in selection order.
    pub jobs: Vec<MigrationJob>,

    /// Whether an operator interrupt stopped dispatch.
    pub interrupted: bool,
}
