//! # Ferry Migration Library
//!
//! Batch migration of repositories from a GitLab namespace to a GitHub user or
//! organization.
//!
//! ## Features
//!
//! - **Catalog**: paginated listing of the source namespace with CI detection
//! - **Name sanitizing**: deterministic, destination-safe repository names
//! - **Conflict handling**: existence checks with skip or fail policies
//! - **Transfer**: local mirror clone + push, or server-side import
//! - **CI conversion**: GitLab CI to GitHub Actions via Actions Importer
//! - **Reporting**: per-batch verdict and process exit code
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_migrate::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MigrationConfig::new(source, destination);
//!     config.validate()?;
//!
//!     let api: Arc<dyn DestinationApi> = Arc::new(GitHubClient::new(&config)?);
//!     let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::default());
//!     let engine = build_engine(&config, api.clone(), runner);
//!
//!     let catalog = GitLabCatalog::new(&config)?.list_repositories().await?;
//!     let orchestrator = MigrationOrchestrator::new(config, api, engine);
//!     let batch = orchestrator.run(&catalog, &(1..=catalog.len()).collect()).await;
//!
//!     let report = BatchReport::from_batch(&batch);
//!     println!("{report}");
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod catalog;
pub mod ci;
pub mod config;
pub mod conflict;
pub mod destination;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod progress;
pub mod report;
pub mod retry;
pub mod sanitize;
pub mod selection;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use catalog::{GitLabCatalog, RepositoryCatalog};
pub use ci::{ActionsImporter, CiConverter, ConversionRequest};
pub use config::{
    CiSettings, ConflictPolicy, DestinationSettings, MigrationConfig, SourceSettings,
    TransferStrategy, Tunables,
};
pub use conflict::{CatalogEntry, ConflictChecker, DestinationState, NameLocks};
pub use destination::{DestinationApi, GitHubClient};
pub use error::{FailureKind, MigrationError, Result};
pub use orchestrator::MigrationOrchestrator;
pub use process::{CommandRunner, Redactor, SystemRunner};
pub use progress::{JobPhase, MigrationProgress, ProgressCallback, ProgressUpdate};
pub use report::{BatchReport, Verdict, EXIT_FATAL, EXIT_INTERRUPTED};
pub use retry::RetryPolicy;
pub use sanitize::{derive_destination_name, sanitize};
pub use selection::{parse_selection, resolve_selection, ResolvedSelection, Selection, SelectionError};
pub use transfer::{build_engine, MirrorTransfer, RemoteImportTransfer, TransferEngine};
pub use types::*;

/// Version of the migration library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
