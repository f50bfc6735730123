//! Run configuration, built once at startup and passed to every component.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;

/// Default GitLab instance.
pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";

/// Default GitHub REST endpoint.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Default GitHub web / git host.
pub const DEFAULT_GITHUB_URL: &str = "https://github.com";

/// GitHub's hard per-file limit.
pub const DEFAULT_OBJECT_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

/// Behavior when the destination name already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Mark the job `SKIPPED_CONFLICT`.
    #[default]
    Skip,
    /// Mark the job `CODE_FAILED` with a name conflict.
    Fail,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "fail" => Ok(Self::Fail),
            other => Err(MigrationError::InvalidConfig(format!(
                "unknown conflict policy '{other}' (expected skip or fail)"
            ))),
        }
    }
}

/// How code reaches the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStrategy {
    /// Local mirror clone followed by a mirror push.
    #[default]
    Mirror,
    /// Server-side import on the destination.
    Import,
}

impl std::fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mirror => write!(f, "mirror"),
            Self::Import => write!(f, "import"),
        }
    }
}

/// Source provider connection.
#[derive(Clone)]
pub struct SourceSettings {
    /// GitLab base URL.
    pub base_url: String,
    /// Personal access token.
    pub token: String,
    /// Namespace whose repositories are listed.
    pub namespace: String,
}

/// Destination provider connection.
#[derive(Clone)]
pub struct DestinationSettings {
    /// REST API base URL.
    pub api_url: String,
    /// Web / git host URL.
    pub git_url: String,
    /// Personal access token.
    pub token: String,
    /// User or organization that owns created repositories.
    pub owner: String,
}

impl DestinationSettings {
    /// Browser URL of a destination repository.
    pub fn web_url(&self, name: &str) -> String {
        format!("{}/{}/{name}", self.git_url.trim_end_matches('/'), self.owner)
    }
}

/// CI conversion settings. Absent means conversion is disabled.
#[derive(Debug, Clone)]
pub struct CiSettings {
    /// Root directory for converter artifacts.
    pub output_dir: PathBuf,
    /// `gh` executable.
    pub gh_binary: String,
}

impl Default for CiSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./migration-output"),
            gh_binary: "gh".to_string(),
        }
    }
}

/// Optional numeric knobs, loadable from a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Retry policy for network operations.
    pub retry: RetryPolicy,
    /// Maximum blob size accepted by the destination.
    pub object_size_limit_bytes: u64,
    /// Delay between import status polls, in milliseconds.
    pub import_poll_interval_ms: u64,
    /// Maximum time to wait for an import, in seconds.
    pub import_max_wait_secs: u64,
    /// Destination API requests per second.
    pub rate_limit_per_second: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            object_size_limit_bytes: DEFAULT_OBJECT_SIZE_LIMIT,
            import_poll_interval_ms: 1_000,
            import_max_wait_secs: 120,
            rate_limit_per_second: 10,
        }
    }
}

/// Configuration for one migration run.
#[derive(Clone)]
pub struct MigrationConfig {
    /// Source provider.
    pub source: SourceSettings,
    /// Destination provider.
    pub destination: DestinationSettings,
    /// Conflict policy.
    pub conflict_policy: ConflictPolicy,
    /// Transfer strategy.
    pub strategy: TransferStrategy,
    /// Worker cap, 1 means sequential.
    pub max_concurrency: usize,
    /// Destination API token bucket refill rate.
    pub rate_limit_per_second: NonZeroU32,
    /// Collaborator-level retry policy.
    pub retry: RetryPolicy,
    /// Maximum blob size accepted by the destination.
    pub object_size_limit_bytes: u64,
    /// Delay between import status polls.
    pub import_poll_interval: Duration,
    /// Maximum time to wait for an import.
    pub import_max_wait: Duration,
    /// CI conversion, disabled when `None`.
    pub ci: Option<CiSettings>,
    /// Parent directory for mirror workspaces, system temp dir when `None`.
    pub workspace_root: Option<PathBuf>,
}

impl MigrationConfig {
    /// Create a configuration with default tunables.
    pub fn new(source: SourceSettings, destination: DestinationSettings) -> Self {
        let mut config = Self {
            source,
            destination,
            conflict_policy: ConflictPolicy::default(),
            strategy: TransferStrategy::default(),
            max_concurrency: 1,
            rate_limit_per_second: NonZeroU32::MIN,
            retry: RetryPolicy::default(),
            object_size_limit_bytes: DEFAULT_OBJECT_SIZE_LIMIT,
            import_poll_interval: Duration::ZERO,
            import_max_wait: Duration::ZERO,
            ci: None,
            workspace_root: None,
        };
        config.apply_tunables(&Tunables::default());
        config
    }

    /// Set the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Set the transfer strategy.
    pub fn with_strategy(mut self, strategy: TransferStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the worker cap.
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Enable CI conversion.
    pub fn with_ci(mut self, ci: CiSettings) -> Self {
        self.ci = Some(ci);
        self
    }

    /// Set the parent directory for mirror workspaces.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Override the numeric knobs.
    pub fn with_tunables(mut self, tunables: &Tunables) -> Self {
        self.apply_tunables(tunables);
        self
    }

    fn apply_tunables(&mut self, tunables: &Tunables) {
        self.retry = tunables.retry.clone();
        self.object_size_limit_bytes = tunables.object_size_limit_bytes;
        self.import_poll_interval = Duration::from_millis(tunables.import_poll_interval_ms);
        self.import_max_wait = Duration::from_secs(tunables.import_max_wait_secs);
        self.rate_limit_per_second =
            NonZeroU32::new(tunables.rate_limit_per_second).unwrap_or(NonZeroU32::MIN);
    }

    /// Whether jobs may run concurrently.
    pub fn is_concurrent(&self) -> bool {
        self.max_concurrency > 1
    }

    /// Reject configurations no job could succeed with.
    pub fn validate(&self) -> Result<()> {
        let required = [
            (&self.source.token, "source token (GITLAB_ACCESS_TOKEN)"),
            (&self.source.namespace, "source namespace (GITLAB_USERNAME)"),
            (&self.destination.token, "destination token (GITHUB_ACCESS_TOKEN)"),
            (&self.destination.owner, "destination owner (GITHUB_OWNER)"),
        ];
        for (value, name) in required {
            if value.trim().is_empty() {
                return Err(MigrationError::InvalidConfig(format!("missing {name}")));
            }
        }

        for (url, name) in [
            (&self.source.base_url, "source URL"),
            (&self.destination.api_url, "destination API URL"),
            (&self.destination.git_url, "destination git URL"),
        ] {
            url::Url::parse(url).map_err(|e| {
                MigrationError::InvalidConfig(format!("invalid {name} '{url}': {e}"))
            })?;
        }

        if self.max_concurrency == 0 {
            return Err(MigrationError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(MigrationError::InvalidConfig(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.strategy == TransferStrategy::Import && self.import_poll_interval.is_zero() {
            return Err(MigrationError::InvalidConfig(
                "import poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("source_url", &self.source.base_url)
            .field("source_namespace", &self.source.namespace)
            .field("destination_api", &self.destination.api_url)
            .field("destination_owner", &self.destination.owner)
            .field("conflict_policy", &self.conflict_policy)
            .field("strategy", &self.strategy)
            .field("max_concurrency", &self.max_concurrency)
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .field("retry", &self.retry)
            .field("object_size_limit_bytes", &self.object_size_limit_bytes)
            .field("import_poll_interval", &self.import_poll_interval)
            .field("import_max_wait", &self.import_max_wait)
            .field("ci", &self.ci)
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> MigrationConfig {
        MigrationConfig::new(
            SourceSettings {
                base_url: DEFAULT_GITLAB_URL.to_string(),
                token: "glpat-secret".to_string(),
                namespace: "alice".to_string(),
            },
            DestinationSettings {
                api_url: DEFAULT_GITHUB_API_URL.to_string(),
                git_url: DEFAULT_GITHUB_URL.to_string(),
                token: "ghp-secret".to_string(),
                owner: "alice".to_string(),
            },
        )
    }

    #[test]
    fn test_defaults() {
        let config = test_config();
        assert_eq!(config.conflict_policy, ConflictPolicy::Skip);
        assert_eq!(config.strategy, TransferStrategy::Mirror);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.import_max_wait, Duration::from_secs(120));
        assert_eq!(config.object_size_limit_bytes, 100 * 1024 * 1024);
        assert!(config.ci.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_token_is_configuration_error() {
        let mut config = test_config();
        config.destination.token = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("GITHUB_ACCESS_TOKEN"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(test_config().with_concurrency(0).validate().is_err());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", test_config());
        assert!(!rendered.contains("glpat-secret"));
        assert!(!rendered.contains("ghp-secret"));
    }

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!("SKIP".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Skip);
        assert_eq!("fail".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Fail);
        assert!("ignore".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn test_tunables_override() {
        let tunables = Tunables {
            import_max_wait_secs: 5,
            rate_limit_per_second: 0,
            ..Default::default()
        };
        let config = test_config().with_tunables(&tunables);
        assert_eq!(config.import_max_wait, Duration::from_secs(5));
        assert_eq!(config.rate_limit_per_second.get(), 1);
    }

    #[test]
    fn test_web_url() {
        let config = test_config();
        assert_eq!(
            config.destination.web_url("demo"),
            "https://github.com/alice/demo"
        );
    }
}
