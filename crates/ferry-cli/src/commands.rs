//! CLI command implementations.

use anyhow::{bail, Context, Result};
use clap::Args;
use ferry_migrate::{
    build_engine, parse_selection, resolve_selection, ActionsImporter, BatchReport, CiSettings,
    CommandRunner, ConflictPolicy, DestinationApi, DestinationSettings, GitHubClient,
    GitLabCatalog, MigrationConfig, MigrationOrchestrator, Redactor, RepositoryCatalog,
    Selection, SourceSettings, SystemRunner, TransferStrategy, Tunables,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::menu;
use crate::progress::ConsoleProgressReporter;

/// Source and destination connection flags.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// GitLab instance URL
    #[arg(long, env = "GITLAB_URL", default_value = ferry_migrate::config::DEFAULT_GITLAB_URL)]
    pub gitlab_url: String,

    /// GitLab personal access token
    #[arg(long, env = "GITLAB_ACCESS_TOKEN", hide_env_values = true)]
    pub gitlab_token: Option<String>,

    /// GitLab namespace whose repositories are listed
    #[arg(long, env = "GITLAB_USERNAME")]
    pub gitlab_namespace: Option<String>,

    /// GitHub REST API URL
    #[arg(long, env = "GITHUB_API_URL", default_value = ferry_migrate::config::DEFAULT_GITHUB_API_URL)]
    pub github_api_url: String,

    /// GitHub web URL
    #[arg(long, env = "GITHUB_URL", default_value = ferry_migrate::config::DEFAULT_GITHUB_URL)]
    pub github_url: String,

    /// GitHub personal access token
    #[arg(long, env = "GITHUB_ACCESS_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub user or organization receiving the repositories
    /// [env: GITHUB_OWNER, falls back to GITHUB_USERNAME]
    #[arg(long, env = "GITHUB_OWNER")]
    pub github_owner: Option<String>,

    /// YAML file with retry, size-limit, polling and rate-limit settings
    #[arg(long, env = "FERRY_TUNABLES")]
    pub tunables: Option<PathBuf>,
}

impl ConnectionArgs {
    /// Build and validate the run configuration.
    pub fn to_config(&self) -> Result<MigrationConfig> {
        let owner = self
            .github_owner
            .clone()
            .or_else(|| std::env::var("GITHUB_USERNAME").ok())
            .unwrap_or_default();

        let source = SourceSettings {
            base_url: self.gitlab_url.clone(),
            token: self.gitlab_token.clone().unwrap_or_default(),
            namespace: self.gitlab_namespace.clone().unwrap_or_default(),
        };
        let destination = DestinationSettings {
            api_url: self.github_api_url.clone(),
            git_url: self.github_url.clone(),
            token: self.github_token.clone().unwrap_or_default(),
            owner,
        };

        let mut config = MigrationConfig::new(source, destination);
        if let Some(path) = &self.tunables {
            config = config.with_tunables(&load_tunables(path)?);
        }
        Ok(config)
    }
}

/// Flags of `ferry migrate`.
#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// What to do when the destination repository already exists
    #[arg(long, env = "FERRY_CONFLICT_POLICY", default_value = "skip")]
    pub conflict_policy: ConflictPolicy,

    /// Let GitHub import the repositories instead of mirroring locally
    #[arg(
        long,
        env = "USE_GITHUB_IMPORT",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub import: bool,

    /// Maximum number of repositories migrated at once
    #[arg(short = 'j', long, env = "FERRY_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,

    /// Convert GitLab CI configuration with GitHub Actions Importer
    #[arg(
        long,
        env = "FERRY_CONVERT_CI",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub convert_ci: bool,

    /// Directory for converted workflows
    #[arg(long, default_value = "./migration-output")]
    pub ci_output_dir: PathBuf,

    /// `gh` executable used for CI conversion
    #[arg(long, env = "FERRY_GH", default_value = "gh")]
    pub gh_binary: String,

    /// Parent directory for temporary mirror clones
    #[arg(long, env = "FERRY_WORKSPACE")]
    pub workspace_dir: Option<PathBuf>,

    /// Selection, skipping the prompt (e.g. "1,3,5", "2-4", "all")
    #[arg(long)]
    pub select: Option<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Also write the report as JSON to this file
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

impl MigrateArgs {
    fn to_config(&self) -> Result<MigrationConfig> {
        let strategy = if self.import {
            TransferStrategy::Import
        } else {
            TransferStrategy::Mirror
        };
        let mut config = self
            .connection
            .to_config()?
            .with_conflict_policy(self.conflict_policy)
            .with_strategy(strategy)
            .with_concurrency(self.concurrency);
        if self.convert_ci {
            config = config.with_ci(CiSettings {
                output_dir: self.ci_output_dir.clone(),
                gh_binary: self.gh_binary.clone(),
            });
        }
        if let Some(dir) = &self.workspace_dir {
            config = config.with_workspace_root(dir);
        }
        Ok(config)
    }
}

fn load_tunables(path: &Path) -> Result<Tunables> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading tunables from {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Clients shared by both commands, after credentials were checked.
struct Session {
    api: Arc<dyn DestinationApi>,
    catalog: Vec<ferry_migrate::SourceRepository>,
}

async fn connect(config: &MigrationConfig) -> Result<Session> {
    config.validate()?;
    tracing::debug!(?config, "Configuration loaded");

    let api: Arc<dyn DestinationApi> = Arc::new(GitHubClient::new(config)?);
    let login = api
        .authenticated_login()
        .await
        .context("checking the GitHub token")?;
    tracing::info!(login = %login, owner = %config.destination.owner, "GitHub token accepted");

    let catalog = GitLabCatalog::new(config)?
        .list_repositories()
        .await
        .context("listing GitLab repositories")?;
    Ok(Session { api, catalog })
}

/// List the catalog with destination state.
pub async fn list(args: ConnectionArgs) -> Result<i32> {
    let config = args.to_config()?;
    let session = connect(&config).await?;
    let checker = ferry_migrate::ConflictChecker::new(session.api, config.destination.owner.clone());
    let entries = checker.annotate(&session.catalog).await;
    menu::print_catalog(&entries);
    Ok(0)
}

/// Interactive batch migration.
pub async fn migrate(args: MigrateArgs) -> Result<i32> {
    let config = args.to_config()?;
    let session = connect(&config).await?;
    if session.catalog.is_empty() {
        println!(
            "No repositories found in GitLab namespace '{}'.",
            config.source.namespace
        );
        return Ok(0);
    }

    let redactor = Redactor::new([config.source.token.clone(), config.destination.token.clone()]);
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(redactor));
    let engine = build_engine(&config, session.api.clone(), runner.clone());
    let mut orchestrator = MigrationOrchestrator::new(config.clone(), session.api, engine);
    if config.ci.is_some() {
        orchestrator = orchestrator.with_converter(Arc::new(ActionsImporter::new(&config, runner)));
    }

    let entries = orchestrator.preflight(&session.catalog).await;
    menu::print_catalog(&entries);

    let selection = match &args.select {
        Some(expr) => parse_selection(expr, entries.len())
            .with_context(|| format!("invalid --select '{expr}'"))?,
        None => menu::prompt_selection(entries.len())?,
    };
    if selection == Selection::Quit {
        println!("Cancelled.");
        return Ok(0);
    }

    let resolved = resolve_selection(&selection, &entries, config.conflict_policy);
    for (index, name) in &resolved.dropped {
        println!("Skipping #{index}: {}/{name} already exists.", config.destination.owner);
    }
    if resolved.indices.is_empty() {
        println!("Nothing to migrate.");
        return Ok(0);
    }

    menu::print_plan(&entries, &resolved.indices, &config);
    if !args.yes && !menu::confirm(resolved.indices.len())? {
        println!("Cancelled.");
        return Ok(0);
    }

    let reporter = ConsoleProgressReporter::new(resolved.indices.len() as u64);
    let token = CancellationToken::new();
    install_interrupt_handler(token.clone());
    let orchestrator = orchestrator
        .with_progress(reporter.callback())
        .with_cancellation(token);

    let started = chrono::Utc::now();
    let batch = orchestrator.run(&session.catalog, &resolved.indices).await;
    reporter.finish(if batch.interrupted { "Interrupted" } else { "Finished" });

    let report = BatchReport::from_batch(&batch).with_timing(started, chrono::Utc::now());
    println!("\n{report}");

    if let Some(path) = &args.report_json {
        let json = serde_json::to_string_pretty(&report)?;
        if let Err(e) = std::fs::write(path, json) {
            tracing::warn!(path = %path.display(), error = %e, "Could not write JSON report");
        }
    }
    Ok(report.exit_code())
}

/// Cancel `token` on the first Ctrl-C and exit on the second.
fn install_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("\nInterrupt received, finishing in-flight work. Press Ctrl-C again to quit.");
        tracing::warn!("Interrupt requested");
        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(ferry_migrate::EXIT_INTERRUPTED);
        }
    });
}
