//! Destination provider API (GitHub REST).

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;
use crate::types::Visibility;

/// Repository creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRepository {
    /// Repository name.
    pub name: String,
    /// Description shown on the repository page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the repository is private.
    pub private: bool,
}

impl NewRepository {
    /// Build a request.
    pub fn new(name: impl Into<String>, visibility: Visibility, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description: description.filter(|d| !d.trim().is_empty()),
            private: visibility.is_private(),
        }
    }
}

/// A repository as returned by the destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoHandle {
    /// `owner/name`.
    pub full_name: String,
    /// Browser URL.
    pub html_url: String,
    /// Whether the repository is private.
    pub private: bool,
}

/// Server-side import request.
#[derive(Clone, Serialize)]
pub struct ImportRequest {
    /// Always `git`.
    pub vcs: String,
    /// Source clone URL.
    pub vcs_url: String,
    /// Source credential user.
    pub vcs_username: String,
    /// Source credential secret.
    pub vcs_password: String,
}

impl ImportRequest {
    /// A git import authenticated with a GitLab token.
    pub fn git(vcs_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            vcs: "git".to_string(),
            vcs_url: vcs_url.into(),
            vcs_username: "oauth2".to_string(),
            vcs_password: token.into(),
        }
    }
}

impl std::fmt::Debug for ImportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportRequest")
            .field("vcs", &self.vcs)
            .field("vcs_url", &self.vcs_url)
            .field("vcs_username", &self.vcs_username)
            .finish_non_exhaustive()
    }
}

/// Import job state reported by the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStatus {
    /// Accepted, not started.
    Queued,
    /// In progress, with the provider's raw status.
    Importing(String),
    /// Finished successfully.
    Complete,
    /// Finished unsuccessfully, with the provider's raw status or message.
    Failed(String),
}

impl ImportStatus {
    /// Map a GitHub import `status` value.
    pub fn from_github(status: &str, status_text: Option<&str>) -> Self {
        match status {
            "queued" | "none" | "detecting" => Self::Queued,
            "complete" => Self::Complete,
            "error" | "failed" | "auth_failed" | "detection_found_nothing"
            | "detection_found_multiple" | "detection_needs_auth" => Self::Failed(
                status_text
                    .filter(|t| !t.is_empty())
                    .map_or_else(|| status.to_string(), |t| format!("{status}: {t}")),
            ),
            other => Self::Importing(other.to_string()),
        }
    }

    /// Whether polling can stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

/// Operations the migration needs from the destination provider.
#[async_trait]
pub trait DestinationApi: Send + Sync {
    /// Login of the token's owner. Fails with an authentication error for a
    /// bad token.
    async fn authenticated_login(&self) -> Result<String>;

    /// Whether `owner/name` exists.
    async fn repository_exists(&self, owner: &str, name: &str) -> Result<bool>;

    /// Create a repository under `owner`. Fails with `NameConflict` if the
    /// name is taken.
    async fn create_repository(&self, owner: &str, request: &NewRepository) -> Result<RepoHandle>;

    /// Change a repository's visibility.
    async fn set_visibility(&self, owner: &str, name: &str, visibility: Visibility) -> Result<()>;

    /// Start a server-side import into an existing repository.
    async fn start_import(&self, owner: &str, name: &str, request: &ImportRequest) -> Result<()>;

    /// Current state of the repository's import.
    async fn import_status(&self, owner: &str, name: &str) -> Result<ImportStatus>;
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubImport {
    status: String,
    status_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubErrorBody {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// GitHub REST client shared by all jobs. Every request draws from one token
/// bucket.
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: String,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
    login: OnceCell<String>,
}

impl GitHubClient {
    /// Create a client from the run configuration.
    pub fn new(config: &MigrationConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ferry-migrate/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.destination.api_url.trim_end_matches('/').to_string(),
            token: config.destination.token.clone(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(
                config.rate_limit_per_second,
            ))),
            retry: config.retry.clone(),
            login: OnceCell::new(),
        })
    }

    /// Send one request, mapping auth failures, 5xx and rate limiting.
    /// Other statuses are left to the caller.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        self.retry
            .execute(path, || async {
                self.limiter.until_ready().await;

                let url = format!("{}{path}", self.api_url);
                let mut request = self
                    .client
                    .request(method.clone(), &url)
                    .header("Authorization", format!("Bearer {}", self.token))
                    .header("Accept", "application/vnd.github+json")
                    .header("X-GitHub-Api-Version", "2022-11-28");
                if let Some(body) = body {
                    request = request.json(body);
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| MigrationError::NetworkError(e.to_string()))?;

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED {
                    return Err(MigrationError::AuthenticationFailed(
                        "GitHub rejected the access token".to_string(),
                    ));
                }
                if status.is_server_error() || is_rate_limited(&response) {
                    return Err(MigrationError::NetworkError(format!(
                        "GitHub returned {status} for {path}"
                    )));
                }
                Ok(response)
            })
            .await
    }

    async fn api_error(response: Response) -> MigrationError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        MigrationError::ApiError { status, message }
    }
}

/// 429, or a 403 sent once the primary quota is spent.
fn is_rate_limited(response: &Response) -> bool {
    match response.status() {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => response
            .headers()
            .get("x-ratelimit-remaining")
            .is_some_and(|v| v.as_bytes() == b"0"),
        _ => false,
    }
}

#[async_trait]
impl DestinationApi for GitHubClient {
    async fn authenticated_login(&self) -> Result<String> {
        let login = self
            .login
            .get_or_try_init(|| async {
                let response = self.send(Method::GET, "/user", None).await?;
                if !response.status().is_success() {
                    return Err(Self::api_error(response).await);
                }
                let user: GitHubUser = response.json().await?;
                Ok::<_, MigrationError>(user.login)
            })
            .await?;
        Ok(login.clone())
    }

    async fn repository_exists(&self, owner: &str, name: &str) -> Result<bool> {
        let response = self
            .send(Method::GET, &format!("/repos/{owner}/{name}"), None)
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn create_repository(&self, owner: &str, request: &NewRepository) -> Result<RepoHandle> {
        let login = self.authenticated_login().await?;
        let path = if login.eq_ignore_ascii_case(owner) {
            "/user/repos".to_string()
        } else {
            format!("/orgs/{owner}/repos")
        };

        let body = serde_json::to_value(request)?;
        let response = self.send(Method::POST, &path, Some(&body)).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let text = response.text().await.unwrap_or_default();
            let parsed: Option<GitHubErrorBody> = serde_json::from_str(&text).ok();
            let mentions_existing = text.to_lowercase().contains("already exists")
                || parsed.as_ref().is_some_and(|b| {
                    b.errors
                        .iter()
                        .any(|e| e.get("field").and_then(|f| f.as_str()) == Some("name"))
                });
            if mentions_existing {
                return Err(MigrationError::NameConflict(format!("{owner}/{}", request.name)));
            }
            return Err(MigrationError::ApiError {
                status: status.as_u16(),
                message: parsed.and_then(|b| b.message).unwrap_or(text),
            });
        }

        Err(Self::api_error(response).await)
    }

    async fn set_visibility(&self, owner: &str, name: &str, visibility: Visibility) -> Result<()> {
        let body = serde_json::json!({ "private": visibility.is_private() });
        let response = self
            .send(Method::PATCH, &format!("/repos/{owner}/{name}"), Some(&body))
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(())
    }

    async fn start_import(&self, owner: &str, name: &str, request: &ImportRequest) -> Result<()> {
        let body = serde_json::to_value(request)?;
        let response = self
            .send(Method::PUT, &format!("/repos/{owner}/{name}/import"), Some(&body))
            .await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::OK => Ok(()),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn import_status(&self, owner: &str, name: &str) -> Result<ImportStatus> {
        let response = self
            .send(Method::GET, &format!("/repos/{owner}/{name}/import"), None)
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let import: GitHubImport = response.json().await?;
        Ok(ImportStatus::from_github(
            &import.status,
            import.status_text.as_deref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::config::Tunables;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GitHubClient {
        let mut tunables = Tunables::default();
        tunables.retry.initial_delay_ms = 1;
        tunables.retry.jitter = false;
        tunables.rate_limit_per_second = 1000;
        let mut config = test_config().with_tunables(&tunables);
        config.destination.api_url = server.uri();
        GitHubClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_exists_true_and_false() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/demo"))
            .and(header("Authorization", "Bearer ghp-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "full_name": "alice/demo", "html_url": "https://github.com/alice/demo", "private": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.repository_exists("alice", "demo").await.unwrap());
        assert!(!client.repository_exists("alice", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).authenticated_login().await.unwrap_err();
        assert!(matches!(err, MigrationError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/flaky"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(!client_for(&server)
            .repository_exists("alice", "flaky")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_too_many_requests_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/demo"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/demo"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(!client_for(&server)
            .repository_exists("alice", "demo")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_exhausted_quota_forbidden_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/demo"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/demo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "full_name": "alice/demo", "html_url": "https://github.com/alice/demo", "private": false
            })))
            .mount(&server)
            .await;

        assert!(client_for(&server)
            .repository_exists("alice", "demo")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_plain_forbidden_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/demo"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "4999"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .repository_exists("alice", "demo")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::ApiError { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_create_under_user_copies_visibility() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"login": "alice"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/user/repos"))
            .and(body_partial_json(serde_json::json!({
                "name": "demo", "private": true, "description": "Demo project"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "full_name": "alice/demo", "html_url": "https://github.com/alice/demo", "private": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let handle = client_for(&server)
            .create_repository(
                "alice",
                &NewRepository::new("demo", Visibility::Private, Some("Demo project".into())),
            )
            .await
            .unwrap();
        assert!(handle.private);
        assert_eq!(handle.full_name, "alice/demo");
    }

    #[tokio::test]
    async fn test_create_under_org_and_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"login": "alice"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "message": "Repository creation failed.",
                "errors": [{"resource": "Repository", "code": "custom", "field": "name",
                            "message": "name already exists on this account"}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_repository("acme", &NewRepository::new("demo", Visibility::Public, None))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::NameConflict(_)));
    }

    #[tokio::test]
    async fn test_import_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/alice/demo/import"))
            .and(body_partial_json(serde_json::json!({
                "vcs": "git", "vcs_username": "oauth2", "vcs_password": "glpat-secret"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"status": "detecting"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/demo/import"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "importing"})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .start_import(
                "alice",
                "demo",
                &ImportRequest::git("https://gitlab.com/alice/demo.git", "glpat-secret"),
            )
            .await
            .unwrap();
        assert_eq!(
            client.import_status("alice", "demo").await.unwrap(),
            ImportStatus::Importing("importing".into())
        );
    }

    #[test]
    fn test_import_status_mapping() {
        assert_eq!(ImportStatus::from_github("detecting", None), ImportStatus::Queued);
        assert_eq!(ImportStatus::from_github("complete", None), ImportStatus::Complete);
        assert_eq!(
            ImportStatus::from_github("auth_failed", Some("Bad credentials")),
            ImportStatus::Failed("auth_failed: Bad credentials".into())
        );
        assert!(!ImportStatus::from_github("pushing", None).is_terminal());
    }
}
