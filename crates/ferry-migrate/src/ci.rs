//! CI configuration conversion through GitHub Actions Importer.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::MigrationConfig;
use crate::process::{CommandRunner, CommandSpec};
use crate::types::{ConversionResult, DestinationName, SourceRepository};

/// What to convert and where to put the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Source project path slug.
    pub project: String,
    /// Source namespace.
    pub namespace: String,
    /// Branch the CI file was found on.
    pub config_ref: Option<String>,
    /// Browser URL of the destination repository.
    pub target_url: String,
    /// Directory the converter writes into.
    pub output_dir: PathBuf,
}

impl ConversionRequest {
    /// Build the request for a job whose code already reached `name`.
    pub fn for_job(
        config: &MigrationConfig,
        output_root: &Path,
        source: &SourceRepository,
        name: &DestinationName,
    ) -> Self {
        let project = if source.path.is_empty() {
            source.name.clone()
        } else {
            source.path.clone()
        };
        Self {
            project,
            namespace: source.namespace.clone(),
            config_ref: source.ci_config_ref.clone(),
            target_url: config.destination.web_url(name.as_str()),
            output_dir: output_root.join(name.as_str()),
        }
    }
}

/// Converts a repository's CI configuration into destination workflows.
///
/// Conversion never fails the job, so the result carries failure as data.
#[async_trait]
pub trait CiConverter: Send + Sync {
    /// Convert one repository.
    async fn convert(&self, request: &ConversionRequest) -> ConversionResult;
}

/// `gh actions-importer migrate gitlab`.
pub struct ActionsImporter {
    runner: Arc<dyn CommandRunner>,
    gh_binary: String,
    env: Vec<(String, String)>,
}

impl ActionsImporter {
    /// Create a converter using the tokens and hosts of the run.
    pub fn new(config: &MigrationConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let gh_binary = config
            .ci
            .as_ref()
            .map_or_else(|| "gh".to_string(), |ci| ci.gh_binary.clone());
        let env = vec![
            ("GITLAB_ACCESS_TOKEN".to_string(), config.source.token.clone()),
            ("GITLAB_INSTANCE_URL".to_string(), config.source.base_url.clone()),
            ("GITHUB_ACCESS_TOKEN".to_string(), config.destination.token.clone()),
            ("GITHUB_INSTANCE_URL".to_string(), config.destination.git_url.clone()),
        ];
        Self {
            runner,
            gh_binary,
            env,
        }
    }

    fn command(&self, request: &ConversionRequest) -> CommandSpec {
        let spec = CommandSpec::new(
            self.gh_binary.as_str(),
            [
                "actions-importer".to_string(),
                "migrate".to_string(),
                "gitlab".to_string(),
                "--project".to_string(),
                request.project.clone(),
                "--namespace".to_string(),
                request.namespace.clone(),
                "--target-url".to_string(),
                request.target_url.clone(),
                "--output-dir".to_string(),
                request.output_dir.display().to_string(),
            ],
        );
        self.env
            .iter()
            .fold(spec, |spec, (key, value)| spec.env(key.as_str(), value.as_str()))
    }
}

#[async_trait]
impl CiConverter for ActionsImporter {
    async fn convert(&self, request: &ConversionRequest) -> ConversionResult {
        if let Err(e) = tokio::fs::create_dir_all(&request.output_dir).await {
            return ConversionResult::failure(format!(
                "cannot create {}: {e}",
                request.output_dir.display()
            ));
        }

        info!(project = %request.project, target = %request.target_url, "Converting CI configuration");
        let output = match self.runner.run(&self.command(request)).await {
            Ok(output) => output,
            Err(e) => {
                warn!(project = %request.project, error = %e, "CI converter could not start");
                return ConversionResult::failure(format!("converter could not start: {e}"));
            }
        };

        if !output.success() {
            let reason = match output.stderr.trim() {
                "" => format!("converter exited with {:?}", output.code),
                stderr => stderr.to_string(),
            };
            warn!(project = %request.project, reason = %reason, "CI conversion failed");
            return ConversionResult {
                output_dir: Some(request.output_dir.clone()),
                ..ConversionResult::failure(reason)
            };
        }

        let warnings = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| {
                line.get(..7)
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case("warning"))
            })
            .map(str::to_string)
            .collect();

        ConversionResult {
            converted_count: count_workflows(&request.output_dir),
            warnings,
            failed: false,
            output_dir: Some(request.output_dir.clone()),
        }
    }
}

/// Number of workflow files under `dir`, recursively.
fn count_workflows(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_workflows(&path)
            } else {
                usize::from(matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yml" | "yaml")
                ))
            }
        })
        .sum()
}
