//! Batch execution and the per-job state machine.
//!
//! Every selected repository becomes one [`MigrationJob`]. A job moves
//! strictly forward:
//!
//! ```text
//! PENDING -> CONFLICT_CHECKED -> SKIPPED_CONFLICT
//!                             -> CODE_FAILED            (fail policy)
//!                             -> CODE_TRANSFERRING -> CODE_FAILED
//!                                                  -> CODE_SUCCEEDED -> DONE
//!                                                                    -> CI_CONVERTING -> CI_FAILED    -> DONE
//!                                                                                     -> CI_SUCCEEDED -> DONE
//! ```
//!
//! An interrupt moves a started job that is still `PENDING` (waiting on its
//! name lock or existence check) straight to `CODE_FAILED`.
//!
//! Failures end exactly one job and never the batch. The existence check and
//! the creation of a destination name run under that name's lock, and every
//! name is claimed once per batch, so two jobs never create the same name.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ci::{CiConverter, ConversionRequest};
use crate::config::{ConflictPolicy, MigrationConfig};
use crate::conflict::{CatalogEntry, ConflictChecker, NameLocks};
use crate::destination::DestinationApi;
use crate::error::{FailureKind, MigrationError};
use crate::progress::{JobPhase, MigrationProgress, ProgressCallback};
use crate::sanitize::derive_destination_name;
use crate::transfer::TransferEngine;
use crate::types::{
    ConversionResult, JobFailure, JobStatus, MigrationBatch, MigrationJob, SourceRepository,
    TransferResult,
};

/// Runs a batch of jobs against one destination.
pub struct MigrationOrchestrator {
    config: MigrationConfig,
    checker: ConflictChecker,
    locks: NameLocks,
    engine: Arc<dyn TransferEngine>,
    converter: Option<Arc<dyn CiConverter>>,
    progress: MigrationProgress,
    cancel: CancellationToken,
}

impl MigrationOrchestrator {
    /// Create an orchestrator. CI conversion stays off until a converter is
    /// attached.
    pub fn new(
        config: MigrationConfig,
        api: Arc<dyn DestinationApi>,
        engine: Arc<dyn TransferEngine>,
    ) -> Self {
        let checker = ConflictChecker::new(api, config.destination.owner.clone());
        Self {
            config,
            checker,
            locks: NameLocks::new(),
            engine,
            converter: None,
            progress: MigrationProgress::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a CI converter.
    pub fn with_converter(mut self, converter: Arc<dyn CiConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Report job progress to `callback`.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = MigrationProgress::with_callback(callback);
        self
    }

    /// Stop dispatching when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Annotate the catalog with destination names and their state.
    pub async fn preflight(&self, catalog: &[SourceRepository]) -> Vec<CatalogEntry> {
        self.checker.annotate(catalog).await
    }

    /// Run the selected catalog entries (1-based indices) and return every
    /// job in selection order.
    pub async fn run(
        &self,
        catalog: &[SourceRepository],
        selection: &BTreeSet<usize>,
    ) -> MigrationBatch {
        let jobs: Vec<MigrationJob> = selection
            .iter()
            .filter_map(|&index| {
                let Some(source) = index.checked_sub(1).and_then(|i| catalog.get(i)) else {
                    warn!(index, "Selection index outside the catalog, ignoring");
                    return None;
                };
                let destination = derive_destination_name(source);
                Some(MigrationJob::new(index, source.clone(), destination))
            })
            .collect();

        let concurrency = self.config.max_concurrency.max(1);
        info!(
            jobs = jobs.len(),
            concurrency,
            strategy = %self.engine.strategy(),
            "Starting migration batch"
        );
        self.progress.start(jobs.len() as u64);

        let mut finished: Vec<MigrationJob> = stream::iter(jobs)
            .map(|job| self.run_job(job))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        finished.sort_by_key(|job| job.index);

        let interrupted = self.cancel.is_cancelled();
        if interrupted {
            let not_started = finished
                .iter()
                .filter(|j| j.status == JobStatus::Pending)
                .count();
            warn!(not_started, "Batch interrupted");
        }

        MigrationBatch {
            jobs: finished,
            interrupted,
        }
    }

    async fn run_job(&self, mut job: MigrationJob) -> MigrationJob {
        if self.cancel.is_cancelled() {
            return job;
        }

        let started = AtomicBool::new(false);
        let completed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.drive(&mut job, &started) => true,
        };
        if !completed {
            Self::interrupt(&mut job, started.load(Ordering::SeqCst));
        }

        self.progress.phase(
            job.destination.as_str(),
            JobPhase::Finished(job.status),
            job.failure.as_ref().map(|f| f.message.clone()),
        );
        job
    }

    async fn drive(&self, job: &mut MigrationJob, started: &AtomicBool) {
        started.store(true, Ordering::SeqCst);
        let name = job.destination.clone();
        info!(index = job.index, repo = %job.source.name, destination = %name, "Migrating repository");
        self.progress.phase(name.as_str(), JobPhase::CheckingConflict, None);

        let guard = self.locks.lock(&name).await;
        let taken = if self.locks.claim(&name) {
            self.checker.exists(&name).await
        } else {
            info!(destination = %name, "Name already claimed earlier in this batch");
            Ok(true)
        };
        Self::transition(job, JobStatus::ConflictChecked);

        match taken {
            Ok(false) => {}
            Ok(true) => {
                match self.config.conflict_policy {
                    ConflictPolicy::Skip => {
                        info!(destination = %name, "Destination exists, skipping");
                        Self::transition(job, JobStatus::SkippedConflict);
                    }
                    ConflictPolicy::Fail => {
                        let owner = &self.config.destination.owner;
                        Self::fail(job, &MigrationError::NameConflict(format!("{owner}/{name}")));
                    }
                }
                return;
            }
            Err(e) => {
                Self::fail(job, &e);
                return;
            }
        }

        Self::transition(job, JobStatus::CodeTransferring);
        self.progress.phase(name.as_str(), JobPhase::TransferringCode, None);
        match self.engine.provision(&job.source, &name).await {
            Ok(handle) => job.destination_url = Some(handle.html_url),
            Err(e) => {
                Self::fail(job, &e);
                return;
            }
        }
        drop(guard);

        match self.engine.transfer_code(&job.source, &name).await {
            Ok(result) if result.success => {
                info!(destination = %name, detail = %result.detail, "Code transfer succeeded");
                job.transfer = Some(result);
                Self::transition(job, JobStatus::CodeSucceeded);
            }
            Ok(result) => {
                job.failure = Some(JobFailure {
                    kind: FailureKind::Internal,
                    message: result.detail.clone(),
                    paths: Vec::new(),
                });
                job.transfer = Some(result);
                Self::transition(job, JobStatus::CodeFailed);
                return;
            }
            Err(e) => {
                Self::fail(job, &e);
                return;
            }
        }

        match &self.converter {
            Some(converter) if job.source.has_ci_config() => {
                Self::transition(job, JobStatus::CiConverting);
                self.progress.phase(name.as_str(), JobPhase::ConvertingCi, None);
                let request =
                    ConversionRequest::for_job(&self.config, &self.ci_output_root(), &job.source, &name);
                let result = converter.convert(&request).await;
                if result.failed {
                    warn!(destination = %name, warnings = ?result.warnings, "CI conversion failed, code transfer stands");
                    Self::transition(job, JobStatus::CiFailed);
                } else {
                    info!(destination = %name, workflows = result.converted_count, "CI conversion succeeded");
                    Self::transition(job, JobStatus::CiSucceeded);
                }
                job.ci = Some(result);
            }
            _ => {}
        }
        Self::transition(job, JobStatus::Done);
    }

    fn ci_output_root(&self) -> PathBuf {
        self.config
            .ci
            .as_ref()
            .map(|ci| ci.output_dir.clone())
            .unwrap_or_default()
    }

    /// Record `err` as the job's terminal failure.
    fn fail(job: &mut MigrationJob, err: &MigrationError) {
        warn!(repo = %job.source.name, kind = %err.kind(), error = %err, "Job failed");
        if job.status == JobStatus::CodeTransferring {
            job.transfer = Some(TransferResult::failed(err.to_string()));
        }
        job.failure = Some(JobFailure::from(err));
        Self::transition(job, JobStatus::CodeFailed);
    }

    /// Settle a job whose work was dropped by an interrupt. A job still
    /// `PENDING` counts as cancelled once it waited on its name lock or
    /// existence check.
    fn interrupt(job: &mut MigrationJob, started: bool) {
        match job.status {
            JobStatus::Pending if started => Self::fail(job, &MigrationError::Cancelled),
            JobStatus::ConflictChecked | JobStatus::CodeTransferring => {
                Self::fail(job, &MigrationError::Cancelled);
            }
            JobStatus::CiConverting => {
                job.ci = Some(ConversionResult::failure("interrupted"));
                Self::transition(job, JobStatus::CiFailed);
                Self::transition(job, JobStatus::Done);
            }
            JobStatus::CodeSucceeded | JobStatus::CiFailed | JobStatus::CiSucceeded => {
                Self::transition(job, JobStatus::Done);
            }
            // Nothing was created yet, or the job already settled.
            _ => {}
        }
    }

    fn transition(job: &mut MigrationJob, next: JobStatus) {
        if let Err(e) = job.advance(next) {
            error!(repo = %job.source.name, error = %e, "Rejected job transition");
        }
    }
}
