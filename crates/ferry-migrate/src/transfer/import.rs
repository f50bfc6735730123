//! Server-side import driven by the destination.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::refs::ls_remote;
use super::{authenticated_url, create_destination, TransferEngine};
use crate::config::{MigrationConfig, TransferStrategy};
use crate::destination::{DestinationApi, ImportRequest, ImportStatus, RepoHandle};
use crate::error::{MigrationError, Result};
use crate::process::CommandRunner;
use crate::retry::RetryPolicy;
use crate::types::{DestinationName, SourceRepository, TransferResult};

/// Asks the destination to pull the repository itself, then polls until the
/// import settles. No local workspace is used.
pub struct RemoteImportTransfer {
    api: Arc<dyn DestinationApi>,
    runner: Arc<dyn CommandRunner>,
    retry: RetryPolicy,
    owner: String,
    source_token: String,
    destination_git_url: String,
    destination_token: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl RemoteImportTransfer {
    /// Create the strategy from the run configuration.
    pub fn new(
        config: &MigrationConfig,
        api: Arc<dyn DestinationApi>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            api,
            runner,
            retry: config.retry.clone(),
            owner: config.destination.owner.clone(),
            source_token: config.source.token.clone(),
            destination_git_url: config.destination.git_url.trim_end_matches('/').to_string(),
            destination_token: config.destination.token.clone(),
            poll_interval: config.import_poll_interval,
            max_wait: config.import_max_wait,
        }
    }

    async fn wait_for_import(&self, name: &DestinationName) -> Result<()> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            match self.api.import_status(&self.owner, name.as_str()).await? {
                ImportStatus::Complete => return Ok(()),
                ImportStatus::Failed(reason) => return Err(MigrationError::ImportFailed(reason)),
                pending => {
                    if Instant::now() >= deadline {
                        return Err(MigrationError::ImportTimeout(self.max_wait.as_secs()));
                    }
                    debug!(destination = %name, status = ?pending, "Import in progress");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Compare source and destination refs over the network.
    async fn verify(&self, source: &SourceRepository, name: &DestinationName) -> Result<TransferResult> {
        let source_url = authenticated_url(&source.http_url, "oauth2", &self.source_token)?;
        let destination_url = authenticated_url(
            &format!("{}/{}/{name}.git", self.destination_git_url, self.owner),
            &self.owner,
            &self.destination_token,
        )?;

        let expected = self
            .retry
            .execute("git ls-remote", || ls_remote(self.runner.as_ref(), &source_url))
            .await?;
        let actual = self
            .retry
            .execute("git ls-remote", || {
                ls_remote(self.runner.as_ref(), &destination_url)
            })
            .await?;
        expected.ensure_present_in(&actual)?;

        Ok(TransferResult::succeeded(
            format!(
                "imported {} branches and {} tags",
                expected.branches(),
                expected.tags()
            ),
            expected.branches(),
            expected.tags(),
        ))
    }
}

#[async_trait]
impl TransferEngine for RemoteImportTransfer {
    fn strategy(&self) -> TransferStrategy {
        TransferStrategy::Import
    }

    async fn provision(
        &self,
        source: &SourceRepository,
        name: &DestinationName,
    ) -> Result<RepoHandle> {
        let handle = create_destination(self.api.as_ref(), &self.owner, source, name).await?;
        self.api
            .set_visibility(&self.owner, name.as_str(), source.visibility)
            .await?;
        Ok(RepoHandle {
            private: source.visibility.is_private(),
            ..handle
        })
    }

    async fn transfer_code(
        &self,
        source: &SourceRepository,
        name: &DestinationName,
    ) -> Result<TransferResult> {
        let request = ImportRequest::git(source.http_url.clone(), self.source_token.clone());
        info!(repo = %source.name, destination = %name, "Starting server-side import");
        self.api
            .start_import(&self.owner, name.as_str(), &request)
            .await?;

        self.wait_for_import(name).await?;
        info!(repo = %source.name, "Import complete, verifying refs");
        self.verify(source, name).await
    }
}
