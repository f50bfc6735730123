//! Source repository listing (GitLab).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;
use crate::types::{SourceRepository, Visibility};

/// GitLab's maximum page size.
const PER_PAGE: usize = 100;

/// CI configuration file probed on each repository.
pub const CI_CONFIG_FILE: &str = ".gitlab-ci.yml";

/// Lists the repositories the migration can pick from.
#[async_trait]
pub trait RepositoryCatalog: Send + Sync {
    /// Every visible repository, in provider order.
    async fn list_repositories(&self) -> Result<Vec<SourceRepository>>;
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: u64,
    name: String,
    path: String,
    description: Option<String>,
    visibility: String,
    http_url_to_repo: String,
    default_branch: Option<String>,
    namespace: GitLabNamespace,
    last_activity_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GitLabNamespace {
    path: String,
}

/// Catalog backed by the GitLab REST API.
pub struct GitLabCatalog {
    client: Client,
    base_url: String,
    token: String,
    namespace: String,
    retry: RetryPolicy,
}

impl GitLabCatalog {
    /// Create a catalog from the run configuration.
    pub fn new(config: &MigrationConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ferry-migrate/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.source.base_url.trim_end_matches('/').to_string(),
            token: config.source.token.clone(),
            namespace: config.source.namespace.clone(),
            retry: config.retry.clone(),
        })
    }

    /// One GET with auth, 5xx and 429 mapping, retried while transient.
    async fn gitlab_send(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        self.retry
            .execute(path, || async {
                let url = format!("{}/api/v4{path}", self.base_url);
                let response = self
                    .client
                    .get(&url)
                    .header("PRIVATE-TOKEN", &self.token)
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED {
                    return Err(MigrationError::AuthenticationFailed(
                        "Invalid GitLab token".to_string(),
                    ));
                }
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(MigrationError::NetworkError(format!(
                        "GitLab returned {status} for {path}"
                    )));
                }
                Ok(response)
            })
            .await
    }

    async fn gitlab_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.gitlab_send(path, query).await?;
        if response.status() == StatusCode::FORBIDDEN {
            return Err(MigrationError::AuthenticationFailed(format!(
                "GitLab token is not allowed to read {path}"
            )));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(MigrationError::ApiError { status, message });
        }
        Ok(response.json().await?)
    }

    async fn fetch_projects(&self) -> Result<Vec<GitLabProject>> {
        let mut all_items = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("owned", "true".to_string()),
                ("membership", "true".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let items: Vec<GitLabProject> = self.gitlab_get("/projects", &query).await?;
            debug!(page, count = items.len(), "Fetched project page");

            if items.is_empty() {
                break;
            }
            let count = items.len();
            all_items.extend(items);
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all_items)
    }

    /// Branch on which the CI file exists, trying the default branch, then
    /// `main` and `master`.
    async fn find_ci_config(&self, project: &GitLabProject) -> Result<Option<String>> {
        let mut candidates: Vec<String> = Vec::with_capacity(3);
        for branch in project
            .default_branch
            .iter()
            .map(String::as_str)
            .chain(["main", "master"])
        {
            if !candidates.iter().any(|c| c == branch) {
                candidates.push(branch.to_string());
            }
        }

        let path = format!("/projects/{}/repository/files/{CI_CONFIG_FILE}", project.id);
        for branch in candidates {
            let response = self.gitlab_send(&path, &[("ref", branch.clone())]).await?;
            match response.status() {
                s if s.is_success() => return Ok(Some(branch)),
                StatusCode::NOT_FOUND => continue,
                other => {
                    warn!(
                        project = %project.path,
                        branch = %branch,
                        status = %other,
                        "CI probe failed, treating as no CI"
                    );
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RepositoryCatalog for GitLabCatalog {
    async fn list_repositories(&self) -> Result<Vec<SourceRepository>> {
        info!(namespace = %self.namespace, "Listing GitLab repositories");

        let projects = self.fetch_projects().await?;
        let mut repositories = Vec::new();
        for project in projects {
            if project.namespace.path != self.namespace {
                continue;
            }
            let ci_config_ref = self.find_ci_config(&project).await?;
            repositories.push(SourceRepository {
                id: project.id,
                visibility: Visibility::from_gitlab(&project.visibility),
                name: project.name,
                path: project.path,
                namespace: project.namespace.path,
                http_url: project.http_url_to_repo,
                description: project.description,
                default_branch: project.default_branch,
                last_activity_at: project.last_activity_at,
                ci_config_ref,
            });
        }

        info!(count = repositories.len(), "Found GitLab repositories");
        Ok(repositories)
    }
}
