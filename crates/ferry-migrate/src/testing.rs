//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::ci::{CiConverter, ConversionRequest};
use crate::config::TransferStrategy;
use crate::destination::{DestinationApi, ImportRequest, ImportStatus, NewRepository, RepoHandle};
use crate::error::{MigrationError, Result};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::transfer::TransferEngine;
use crate::types::{ConversionResult, DestinationName, SourceRepository, TransferResult, Visibility};

pub(crate) fn sample_repo(id: u64, path: &str) -> SourceRepository {
    SourceRepository {
        id,
        name: path.to_string(),
        path: path.to_string(),
        namespace: "alice".to_string(),
        http_url: format!("https://gitlab.com/alice/{path}.git"),
        visibility: Visibility::Private,
        description: Some(format!("{path} description")),
        default_branch: Some("main".to_string()),
        last_activity_at: None,
        ci_config_ref: None,
    }
}

/// Destination backed by a set of names.
#[derive(Default)]
pub(crate) struct FakeDestination {
    existing: Mutex<HashSet<String>>,
    failing_exists: Mutex<HashSet<String>>,
    created: Mutex<Vec<NewRepository>>,
    visibility: Mutex<Vec<(String, Visibility)>>,
    imports: Mutex<Vec<(String, ImportRequest)>>,
    import_script: Mutex<VecDeque<ImportStatus>>,
    import_polls: AtomicUsize,
    exists_delay: Duration,
}

impl FakeDestination {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every existence check take `delay`.
    pub(crate) fn with_exists_delay(mut self, delay: Duration) -> Self {
        self.exists_delay = delay;
        self
    }

    pub(crate) fn add_existing(&self, name: &str) {
        self.existing.lock().insert(name.to_string());
    }

    pub(crate) fn fail_exists_for(&self, name: &str) {
        self.failing_exists.lock().insert(name.to_string());
    }

    /// Statuses returned by successive polls; the last one repeats.
    pub(crate) fn script_imports(&self, statuses: impl IntoIterator<Item = ImportStatus>) {
        *self.import_script.lock() = statuses.into_iter().collect();
    }

    pub(crate) fn created(&self) -> Vec<NewRepository> {
        self.created.lock().clone()
    }

    pub(crate) fn visibility_updates(&self) -> Vec<(String, Visibility)> {
        self.visibility.lock().clone()
    }

    pub(crate) fn started_imports(&self) -> Vec<(String, ImportRequest)> {
        self.imports.lock().clone()
    }

    pub(crate) fn import_polls(&self) -> usize {
        self.import_polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationApi for FakeDestination {
    async fn authenticated_login(&self) -> Result<String> {
        Ok("alice".to_string())
    }

    async fn repository_exists(&self, _owner: &str, name: &str) -> Result<bool> {
        if !self.exists_delay.is_zero() {
            tokio::time::sleep(self.exists_delay).await;
        }
        if self.failing_exists.lock().contains(name) {
            return Err(MigrationError::NetworkError("connection reset".into()));
        }
        Ok(self.existing.lock().contains(name))
    }

    async fn create_repository(&self, owner: &str, request: &NewRepository) -> Result<RepoHandle> {
        if !self.existing.lock().insert(request.name.clone()) {
            return Err(MigrationError::NameConflict(format!("{owner}/{}", request.name)));
        }
        self.created.lock().push(request.clone());
        Ok(RepoHandle {
            full_name: format!("{owner}/{}", request.name),
            html_url: format!("https://github.com/{owner}/{}", request.name),
            private: request.private,
        })
    }

    async fn set_visibility(&self, _owner: &str, name: &str, visibility: Visibility) -> Result<()> {
        self.visibility.lock().push((name.to_string(), visibility));
        Ok(())
    }

    async fn start_import(&self, _owner: &str, name: &str, request: &ImportRequest) -> Result<()> {
        self.imports.lock().push((name.to_string(), request.clone()));
        Ok(())
    }

    async fn import_status(&self, _owner: &str, _name: &str) -> Result<ImportStatus> {
        self.import_polls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.import_script.lock();
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(status.unwrap_or(ImportStatus::Complete))
    }
}

type Script = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

/// Runner answering from a closure and recording every call.
pub(crate) struct ScriptedRunner {
    script: Script,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub(crate) fn new(
        script: impl Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub(crate) fn subcommands(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| c.subcommand().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().push(spec.clone());
        Ok((self.script)(spec))
    }
}

type Outcome = Box<dyn Fn(&DestinationName) -> Result<TransferResult> + Send + Sync>;

/// Engine that provisions through a [`FakeDestination`] and answers transfers
/// from a closure, tracking how many transfers overlap.
pub(crate) struct FakeEngine {
    api: Arc<FakeDestination>,
    outcome: Outcome,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    transfers: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub(crate) fn new(api: Arc<FakeDestination>) -> Self {
        Self::with_outcome(api, |_| Ok(TransferResult::succeeded("ok", 1, 0)))
    }

    pub(crate) fn with_outcome(
        api: Arc<FakeDestination>,
        outcome: impl Fn(&DestinationName) -> Result<TransferResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            api,
            outcome: Box::new(outcome),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            transfers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn transfers(&self) -> Vec<String> {
        self.transfers.lock().clone()
    }
}

#[async_trait]
impl TransferEngine for FakeEngine {
    fn strategy(&self) -> TransferStrategy {
        TransferStrategy::Mirror
    }

    async fn provision(&self, source: &SourceRepository, name: &DestinationName) -> Result<RepoHandle> {
        let request = NewRepository::new(name.as_str(), source.visibility, source.description.clone());
        self.api.create_repository("alice", &request).await
    }

    async fn transfer_code(
        &self,
        _source: &SourceRepository,
        name: &DestinationName,
    ) -> Result<TransferResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.transfers.lock().push(name.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.outcome)(name)
    }
}

/// Converter returning a fixed result and recording requests.
pub(crate) struct FakeConverter {
    result: ConversionResult,
    requests: Mutex<Vec<ConversionRequest>>,
}

impl FakeConverter {
    pub(crate) fn new(result: ConversionResult) -> Self {
        Self {
            result,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ConversionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CiConverter for FakeConverter {
    async fn convert(&self, request: &ConversionRequest) -> ConversionResult {
        self.requests.lock().push(request.clone());
        self.result.clone()
    }
}
