//! Destination name collision checks and the per-name creation guard.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

use crate::destination::DestinationApi;
use crate::error::Result;
use crate::sanitize::derive_destination_name;
use crate::types::{DestinationName, SourceRepository};

/// Whether a destination name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationState {
    /// Free.
    New,
    /// Taken.
    Exists,
    /// The check itself failed.
    Unknown,
}

/// One catalog row annotated for the operator.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// 1-based index the operator selects by.
    pub index: usize,
    /// Source repository.
    pub source: SourceRepository,
    /// Derived destination name.
    pub destination: DestinationName,
    /// Destination state at listing time.
    pub state: DestinationState,
}

/// Queries the destination for name collisions.
#[derive(Clone)]
pub struct ConflictChecker {
    api: Arc<dyn DestinationApi>,
    owner: String,
}

impl ConflictChecker {
    /// Create a checker for repositories under `owner`.
    pub fn new(api: Arc<dyn DestinationApi>, owner: impl Into<String>) -> Self {
        Self {
            api,
            owner: owner.into(),
        }
    }

    /// Whether `owner/name` exists at the destination.
    pub async fn exists(&self, name: &DestinationName) -> Result<bool> {
        self.api.repository_exists(&self.owner, name.as_str()).await
    }

    /// Annotate every catalog entry with its destination name and state.
    /// Failed checks become `Unknown` instead of aborting the listing.
    pub async fn annotate(&self, catalog: &[SourceRepository]) -> Vec<CatalogEntry> {
        let mut entries = Vec::with_capacity(catalog.len());
        for (i, source) in catalog.iter().enumerate() {
            let destination = derive_destination_name(source);
            let state = match self.exists(&destination).await {
                Ok(true) => DestinationState::Exists,
                Ok(false) => DestinationState::New,
                Err(e) => {
                    warn!(repo = %source.name, error = %e, "Existence check failed");
                    DestinationState::Unknown
                }
            };
            entries.push(CatalogEntry {
                index: i + 1,
                source: source.clone(),
                destination,
                state,
            });
        }
        entries
    }
}

/// Per-name mutual exclusion plus the batch's claimed-name registry.
#[derive(Default)]
pub struct NameLocks {
    locks: Mutex<HashMap<DestinationName, Arc<tokio::sync::Mutex<()>>>>,
    claimed: Mutex<HashSet<DestinationName>>,
}

impl NameLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &DestinationName) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(name.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Claim `name` for this batch. Returns `false` if an earlier job holds it.
    pub fn claim(&self, name: &DestinationName) -> bool {
        self.claimed.lock().insert(name.clone())
    }
}
