//! Operator selection syntax.
//!
//! Accepted forms: a single index (`3`), a comma-separated list (`1,3,5`),
//! inclusive ranges (`2-4`), any mix of those, `all`, and `q` / `quit`.
//! Indices are 1-based.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::config::ConflictPolicy;
use crate::conflict::{CatalogEntry, DestinationState};
use crate::types::DestinationName;

/// A parsed selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every catalog entry.
    All,
    /// Explicit 1-based indices.
    Indices(BTreeSet<usize>),
    /// The operator quit.
    Quit,
}

/// Malformed selection input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("empty selection")]
    Empty,

    #[error("'{0}' is not a number")]
    InvalidNumber(String),

    #[error("invalid range '{0}'")]
    InvalidRange(String),

    #[error("index {index} is out of range (1-{max})")]
    OutOfRange { index: usize, max: usize },
}

/// Parse operator input against a catalog of `catalog_len` entries.
pub fn parse_selection(input: &str, catalog_len: usize) -> Result<Selection, SelectionError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SelectionError::Empty);
    }
    match input.to_ascii_lowercase().as_str() {
        "q" | "quit" => return Ok(Selection::Quit),
        "all" => return Ok(Selection::All),
        _ => {}
    }

    let mut indices = BTreeSet::new();
    for token in input.split(',').map(str::trim) {
        if token.is_empty() {
            return Err(SelectionError::InvalidNumber(token.to_string()));
        }
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_index(start, token)?;
                let end = parse_index(end, token)?;
                if start > end {
                    return Err(SelectionError::InvalidRange(token.to_string()));
                }
                check_bounds(end, catalog_len)?;
                check_bounds(start, catalog_len)?;
                indices.extend(start..=end);
            }
            None => {
                let index = token
                    .parse::<usize>()
                    .map_err(|_| SelectionError::InvalidNumber(token.to_string()))?;
                check_bounds(index, catalog_len)?;
                indices.insert(index);
            }
        }
    }
    Ok(Selection::Indices(indices))
}

fn parse_index(part: &str, token: &str) -> Result<usize, SelectionError> {
    part.trim()
        .parse()
        .map_err(|_| SelectionError::InvalidRange(token.to_string()))
}

fn check_bounds(index: usize, max: usize) -> Result<(), SelectionError> {
    if index == 0 || index > max {
        Err(SelectionError::OutOfRange { index, max })
    } else {
        Ok(())
    }
}

/// Indices handed to the orchestrator, plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSelection {
    /// Indices to run.
    pub indices: BTreeSet<usize>,
    /// Entries dropped because their destination already exists.
    pub dropped: Vec<(usize, DestinationName)>,
}

/// Turn a selection into indices. Under the skip policy, entries whose
/// destination is already known to exist are dropped; under `fail` they are
/// kept so the orchestrator records the conflict.
pub fn resolve_selection(
    selection: &Selection,
    entries: &[CatalogEntry],
    policy: ConflictPolicy,
) -> ResolvedSelection {
    let wanted: BTreeSet<usize> = match selection {
        Selection::Quit => return ResolvedSelection::default(),
        Selection::All => entries.iter().map(|e| e.index).collect(),
        Selection::Indices(indices) => indices.clone(),
    };

    let mut resolved = ResolvedSelection::default();
    for entry in entries.iter().filter(|e| wanted.contains(&e.index)) {
        if policy == ConflictPolicy::Skip && entry.state == DestinationState::Exists {
            resolved.dropped.push((entry.index, entry.destination.clone()));
        } else {
            resolved.indices.insert(entry.index);
        }
    }
    resolved
}
