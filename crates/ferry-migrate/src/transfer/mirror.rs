//! Local mirror clone followed by a mirror push.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

use super::refs::{ls_remote, RefSet};
use super::{authenticated_url, create_destination, git_failure, TransferEngine};
use crate::config::{MigrationConfig, TransferStrategy};
use crate::destination::{DestinationApi, RepoHandle};
use crate::error::{MigrationError, Result};
use crate::process::{CommandRunner, CommandSpec};
use crate::retry::RetryPolicy;
use crate::types::{DestinationName, SourceRepository, TransferResult};

static LARGE_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"File (.+?) is [\d.]+ [KMG]B; this exceeds").expect("valid regex")
});

/// Paths the destination rejected for exceeding its file size limit.
pub fn parse_large_file_rejections(push_output: &str) -> Vec<String> {
    let mut paths: Vec<String> = LARGE_FILE
        .captures_iter(push_output)
        .map(|c| c[1].to_string())
        .collect();
    paths.dedup();
    paths
}

/// Mirror transfer through a private temporary workspace.
pub struct MirrorTransfer {
    api: Arc<dyn DestinationApi>,
    runner: Arc<dyn CommandRunner>,
    retry: RetryPolicy,
    owner: String,
    source_token: String,
    destination_git_url: String,
    destination_token: String,
    size_limit: u64,
    workspace_root: Option<PathBuf>,
}

impl MirrorTransfer {
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
            size_limit: config.object_size_limit_bytes,
            workspace_root: config.workspace_root.clone(),
        }
    }

    /// Removed on drop, which also covers failure and cancellation.
    fn acquire_workspace(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ferry-");
        let workspace = match &self.workspace_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(workspace)
    }

    fn destination_url(&self, name: &DestinationName) -> Result<String> {
        authenticated_url(
            &format!("{}/{}/{name}.git", self.destination_git_url, self.owner),
            &self.owner,
            &self.destination_token,
        )
    }

    async fn clone_mirror(&self, source_url: &str, repo_path: &Path) -> Result<()> {
        self.retry
            .execute("git clone", || async {
                if repo_path.exists() {
                    tokio::fs::remove_dir_all(repo_path).await?;
                }
                let output = self
                    .runner
                    .run(&CommandSpec::git([
                        "clone".to_string(),
                        "--mirror".to_string(),
                        source_url.to_string(),
                        repo_path.display().to_string(),
                    ]))
                    .await?;
                if output.success() {
                    Ok(())
                } else {
                    Err(git_failure("clone", &output.stderr))
                }
            })
            .await
    }

    /// Blobs larger than the destination accepts, by path.
    async fn find_oversized_objects(&self, repo_path: &Path) -> Result<Vec<String>> {
        let objects = self
            .runner
            .run(&CommandSpec::git(["rev-list", "--objects", "--all"]).current_dir(repo_path))
            .await?;
        if !objects.success() {
            return Err(git_failure("rev-list", &objects.stderr));
        }

        let sizes = self
            .runner
            .run(
                &CommandSpec::git([
                    "cat-file",
                    "--batch-check=%(objecttype) %(objectname) %(objectsize) %(rest)",
                ])
                .current_dir(repo_path)
                .stdin(objects.stdout),
            )
            .await?;
        if !sizes.success() {
            return Err(git_failure("cat-file", &sizes.stderr));
        }

        let mut paths: Vec<String> = sizes
            .stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(4, ' ');
                let kind = parts.next()?;
                let _oid = parts.next()?;
                let size: u64 = parts.next()?.parse().ok()?;
                let path = parts.next().unwrap_or("").trim();
                (kind == "blob" && size > self.size_limit && !path.is_empty())
                    .then(|| path.to_string())
            })
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }

    async fn local_refs(&self, repo_path: &Path) -> Result<RefSet> {
        let output = self
            .runner
            .run(
                &CommandSpec::git([
                    "for-each-ref",
                    "--format=%(objectname) %(refname)",
                    "refs/heads",
                    "refs/tags",
                ])
                .current_dir(repo_path),
            )
            .await?;
        if !output.success() {
            return Err(git_failure("for-each-ref", &output.stderr));
        }
        Ok(RefSet::parse(&output.stdout))
    }

    async fn push_mirror(&self, destination_url: &str, repo_path: &Path) -> Result<()> {
        self.retry
            .execute("git push", || async {
                let output = self
                    .runner
                    .run(
                        &CommandSpec::git(["push", "--mirror", destination_url])
                            .current_dir(repo_path),
                    )
                    .await?;
                if output.success() {
                    return Ok(());
                }
                let rejected = parse_large_file_rejections(&output.stderr);
                if !rejected.is_empty() {
                    return Err(MigrationError::ObjectSizeLimit {
                        paths: rejected,
                        limit_bytes: self.size_limit,
                    });
                }
                Err(git_failure("push", &output.stderr))
            })
            .await
    }
}

#[async_trait]
impl TransferEngine for MirrorTransfer {
    fn strategy(&self) -> TransferStrategy {
        TransferStrategy::Mirror
    }

    async fn provision(
        &self,
        source: &SourceRepository,
        name: &DestinationName,
    ) -> Result<RepoHandle> {
        create_destination(self.api.as_ref(), &self.owner, source, name).await
    }

    async fn transfer_code(
        &self,
        source: &SourceRepository,
        name: &DestinationName,
    ) -> Result<TransferResult> {
        let workspace = self.acquire_workspace()?;
        let repo_path = workspace.path().join(format!("{name}.git"));
        debug!(workspace = %workspace.path().display(), "Acquired mirror workspace");

        let source_url = authenticated_url(&source.http_url, "oauth2", &self.source_token)?;
        info!(repo = %source.name, "Cloning source mirror");
        self.clone_mirror(&source_url, &repo_path).await?;

        let oversized = self.find_oversized_objects(&repo_path).await?;
        if !oversized.is_empty() {
            return Err(MigrationError::ObjectSizeLimit {
                paths: oversized,
                limit_bytes: self.size_limit,
            });
        }

        let expected = self.local_refs(&repo_path).await?;
        let destination_url = self.destination_url(name)?;
        info!(
            repo = %source.name,
            destination = %name,
            branches = expected.branches(),
            tags = expected.tags(),
            "Pushing all refs"
        );
        self.push_mirror(&destination_url, &repo_path).await?;

        let actual = self
            .retry
            .execute("git ls-remote", || {
                ls_remote(self.runner.as_ref(), &destination_url)
            })
            .await?;
        expected.ensure_present_in(&actual)?;

        drop(workspace);
        Ok(TransferResult::succeeded(
            format!(
                "mirrored {} branches and {} tags",
                expected.branches(),
                expected.tags()
            ),
            expected.branches(),
            expected.tags(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::process::CommandOutput;
    use crate::testing::{sample_repo, FakeDestination, ScriptedRunner};

    const REFS: &str = "\
1111111111111111111111111111111111111111 refs/heads/main
2222222222222222222222222222222222222222 refs/heads/dev
3333333333333333333333333333333333333333 refs/tags/v1
";

    fn engine(runner: Arc<ScriptedRunner>, root: &Path) -> MirrorTransfer {
        let mut config = test_config().with_workspace_root(root);
        config.retry.initial_delay_ms = 1;
        config.retry.jitter = false;
        MirrorTransfer::new(&config, Arc::new(FakeDestination::new()), runner)
    }

    fn happy_runner() -> ScriptedRunner {
        ScriptedRunner::new(|spec| match spec.subcommand() {
            Some("rev-list") => CommandOutput::ok("aaaa\nbbbb src/main.rs\n"),
            Some("cat-file") => CommandOutput::ok(
                "commit aaaa 250 \nblob bbbb 1024 src/main.rs\n",
            ),
            Some("for-each-ref") => CommandOutput::ok(REFS),
            Some("ls-remote") => CommandOutput::ok(REFS.replace(' ', "\t")),
            _ => CommandOutput::ok(""),
        })
    }

    #[tokio::test]
    async fn test_mirror_transfers_all_refs_and_cleans_workspace() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(happy_runner());
        let source = sample_repo(1, "demo");
        let name = crate::sanitize::derive_destination_name(&source);

        let result = engine(runner.clone(), root.path())
            .transfer_code(&source, &name)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.branches, 2);
        assert_eq!(result.tags, 1);

        let subcommands = runner.subcommands();
        assert_eq!(
            subcommands,
            vec!["clone", "rev-list", "cat-file", "for-each-ref", "push", "ls-remote"]
        );
        let clone = &runner.calls()[0];
        assert!(clone.args.contains(&"--mirror".to_string()));
        assert!(clone.args[2].starts_with("https://oauth2:glpat-secret@"));
        let push = &runner.calls()[4];
        assert_eq!(push.args[..2], ["push".to_string(), "--mirror".to_string()]);
        assert!(push.args[2].ends_with("github.com/alice/demo.git"));

        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_blob_fails_before_push() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| match spec.subcommand() {
            Some("rev-list") => CommandOutput::ok("bbbb assets/video.mp4\n"),
            Some("cat-file") => CommandOutput::ok(format!(
                "blob bbbb {} assets/video.mp4\nblob cccc 10 README.md\n",
                150 * 1024 * 1024
            )),
            _ => CommandOutput::ok(""),
        }));
        let source = sample_repo(1, "demo");
        let name = crate::sanitize::derive_destination_name(&source);

        let err = engine(runner.clone(), root.path())
            .transfer_code(&source, &name)
            .await
            .unwrap_err();

        assert_eq!(err.offending_paths(), ["assets/video.mp4".to_string()]);
        assert!(!runner.subcommands().contains(&"push".to_string()));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_transient_clone_failure_is_retried() {
        let root = tempfile::tempdir().unwrap();
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let runner = Arc::new(ScriptedRunner::new(move |spec| match spec.subcommand() {
            Some("clone") if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 => {
                CommandOutput::failed(128, "fatal: unable to access: Could not resolve host: gitlab.com")
            }
            Some("rev-list") => CommandOutput::ok(""),
            Some("cat-file") => CommandOutput::ok(""),
            Some("for-each-ref") | Some("ls-remote") => CommandOutput::ok(REFS),
            _ => CommandOutput::ok(""),
        }));
        let source = sample_repo(1, "demo");
        let name = crate::sanitize::derive_destination_name(&source);

        let result = engine(runner.clone(), root.path())
            .transfer_code(&source, &name)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            runner.subcommands().iter().filter(|s| *s == "clone").count(),
            2
        );
    }

    #[tokio::test]
    async fn test_push_rejection_reports_paths() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| match spec.subcommand() {
            Some("push") => CommandOutput::failed(
                1,
                "remote: error: File data/dump.sql is 120.50 MB; this exceeds GitHub's file size limit of 100.00 MB\n\
                 remote: error: GH001: Large files detected.",
            ),
            Some("for-each-ref") => CommandOutput::ok(REFS),
            _ => CommandOutput::ok(""),
        }));
        let source = sample_repo(1, "demo");
        let name = crate::sanitize::derive_destination_name(&source);

        let err = engine(runner, root.path())
            .transfer_code(&source, &name)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::ObjectSizeLimit { .. }));
        assert_eq!(err.offending_paths(), ["data/dump.sql".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_refs_after_push_is_failure() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| match spec.subcommand() {
            Some("for-each-ref") => CommandOutput::ok(REFS),
            Some("ls-remote") => CommandOutput::ok(
                "1111111111111111111111111111111111111111\trefs/heads/main\n",
            ),
            _ => CommandOutput::ok(""),
        }));
        let source = sample_repo(1, "demo");
        let name = crate::sanitize::derive_destination_name(&source);

        let err = engine(runner, root.path())
            .transfer_code(&source, &name)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::GitError(_)));
        assert!(err.to_string().contains("refs/tags/v1"));
    }

    #[test]
    fn test_parse_large_file_rejections() {
        let output = "remote: error: File big.bin is 150.00 MB; this exceeds GitHub's file size limit of 100.00 MB";
        assert_eq!(parse_large_file_rejections(output), vec!["big.bin"]);
        assert!(parse_large_file_rejections("error: failed to push some refs").is_empty());
    }
}
