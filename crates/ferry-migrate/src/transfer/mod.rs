//! Code transfer strategies.
//!
//! Both strategies implement [`TransferEngine`]; one is built at startup from
//! [`TransferStrategy`] and injected into the orchestrator.

mod import;
mod mirror;
pub mod refs;

pub use import::RemoteImportTransfer;
pub use mirror::{parse_large_file_rejections, MirrorTransfer};

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{MigrationConfig, TransferStrategy};
use crate::destination::{DestinationApi, NewRepository, RepoHandle};
use crate::error::{MigrationError, Result};
use crate::process::CommandRunner;
use crate::types::{DestinationName, SourceRepository, TransferResult};

/// Moves a repository's code and refs to the destination.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Which strategy this is.
    fn strategy(&self) -> TransferStrategy;

    /// Create the destination repository. Runs inside the destination-name
    /// critical section.
    async fn provision(
        &self,
        source: &SourceRepository,
        name: &DestinationName,
    ) -> Result<RepoHandle>;

    /// Transfer every branch and tag. Any partial transfer is an error.
    async fn transfer_code(
        &self,
        source: &SourceRepository,
        name: &DestinationName,
    ) -> Result<TransferResult>;
}

/// Build the configured strategy.
pub fn build_engine(
    config: &MigrationConfig,
    api: Arc<dyn DestinationApi>,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn TransferEngine> {
    match config.strategy {
        TransferStrategy::Mirror => Arc::new(MirrorTransfer::new(config, api, runner)),
        TransferStrategy::Import => Arc::new(RemoteImportTransfer::new(config, api, runner)),
    }
}

/// Create the destination repository with the source's visibility and
/// description.
async fn create_destination(
    api: &dyn DestinationApi,
    owner: &str,
    source: &SourceRepository,
    name: &DestinationName,
) -> Result<RepoHandle> {
    let request = NewRepository::new(
        name.as_str(),
        source.visibility,
        source.description.clone(),
    );
    let handle = api.create_repository(owner, &request).await?;
    tracing::info!(
        repo = %source.name,
        destination = %handle.full_name,
        visibility = %source.visibility,
        "Created destination repository"
    );
    Ok(handle)
}

/// Insert credentials into an HTTPS URL.
pub fn authenticated_url(raw: &str, username: &str, token: &str) -> Result<String> {
    let mut url = url::Url::parse(raw)
        .map_err(|e| MigrationError::InvalidConfig(format!("invalid repository URL: {e}")))?;
    url.set_username(username)
        .and_then(|()| url.set_password(Some(token)))
        .map_err(|()| MigrationError::InvalidConfig("URL cannot carry credentials".to_string()))?;
    Ok(url.to_string())
}

const TRANSIENT_GIT_MARKERS: &[&str] = &[
    "could not resolve host",
    "connection timed out",
    "operation timed out",
    "connection reset",
    "connection refused",
    "failed to connect",
    "couldn't connect",
    "temporary failure",
    "early eof",
    "rpc failed",
    "the remote end hung up unexpectedly",
    "unexpected disconnect",
    "gnutls_handshake",
    "returned error: 500",
    "returned error: 502",
    "returned error: 503",
    "returned error: 504",
];

/// Rejections that also trip transport markers but never succeed on retry.
const PERMANENT_GIT_MARKERS: &[&str] = &["http 413", "returned error: 413"];

/// Classify a failed git command: transport problems become retryable
/// network errors, everything else a git error.
pub(crate) fn git_failure(operation: &str, stderr: &str) -> MigrationError {
    let lowered = stderr.to_lowercase();
    let message = format!("git {operation}: {}", stderr.trim());
    let permanent = PERMANENT_GIT_MARKERS.iter().any(|m| lowered.contains(m));
    if !permanent && TRANSIENT_GIT_MARKERS.iter().any(|m| lowered.contains(m)) {
        MigrationError::NetworkError(message)
    } else {
        MigrationError::GitError(message)
    }
}
