//! Branch and tag listings used to prove a transfer is complete.

use std::collections::BTreeMap;

use crate::error::{MigrationError, Result};
use crate::process::{CommandRunner, CommandSpec};

/// Branches and tags, by full ref name, pointing at object ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefSet(BTreeMap<String, String>);

impl RefSet {
    /// Parse `<oid> <ref>` lines as printed by `git ls-remote` or
    /// `git for-each-ref --format='%(objectname) %(refname)'`. Only heads and
    /// tags are kept; peeled `^{}` entries are dropped.
    pub fn parse(output: &str) -> Self {
        let refs = output
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let oid = parts.next()?;
                let name = parts.next()?;
                if name.ends_with("^{}") {
                    return None;
                }
                if name.starts_with("refs/heads/") || name.starts_with("refs/tags/") {
                    Some((name.to_string(), oid.to_string()))
                } else {
                    None
                }
            })
            .collect();
        Self(refs)
    }

    /// Number of branches.
    pub fn branches(&self) -> usize {
        self.0.keys().filter(|r| r.starts_with("refs/heads/")).count()
    }

    /// Number of tags.
    pub fn tags(&self) -> usize {
        self.0.keys().filter(|r| r.starts_with("refs/tags/")).count()
    }

    /// Refs of `self` absent from `other` or pointing elsewhere.
    pub fn missing_from(&self, other: &RefSet) -> Vec<String> {
        self.0
            .iter()
            .filter(|(name, oid)| other.0.get(*name) != Some(*oid))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Fail unless every ref of `self` is present in `destination`.
    pub fn ensure_present_in(&self, destination: &RefSet) -> Result<()> {
        let missing = self.missing_from(destination);
        if missing.is_empty() {
            return Ok(());
        }
        Err(MigrationError::GitError(format!(
            "{} ref(s) missing or different at destination: {}",
            missing.len(),
            missing.join(", ")
        )))
    }
}

/// List the heads and tags advertised by a remote.
pub async fn ls_remote(runner: &dyn CommandRunner, url: &str) -> Result<RefSet> {
    let output = runner
        .run(&CommandSpec::git(["ls-remote", "--heads", "--tags", url]))
        .await?;
    if !output.success() {
        return Err(super::git_failure("ls-remote", &output.stderr));
    }
    Ok(RefSet::parse(&output.stdout))
}
