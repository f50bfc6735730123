//! Destination name derivation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{DestinationName, SourceRepository};

/// Longest name GitHub accepts.
pub const MAX_NAME_LEN: usize = 100;

static ILLEGAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9._-]+").expect("valid regex"));
static SEPARATOR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_.]{2,}").expect("valid regex"));

/// Derive the destination name for a source repository.
///
/// Uses the path slug, then the last segment of the clone URL, then the display
/// name. Never fails: an empty result becomes `repo-<id>`.
pub fn derive_destination_name(source: &SourceRepository) -> DestinationName {
    let candidate = if !source.path.trim().is_empty() {
        source.path.clone()
    } else if let Some(segment) = url_basename(&source.http_url) {
        segment
    } else {
        source.name.clone()
    };

    let sanitized = sanitize(&candidate);
    if sanitized.is_empty() {
        DestinationName::from_sanitized(format!("repo-{}", source.id))
    } else {
        DestinationName::from_sanitized(sanitized)
    }
}

/// Sanitize an arbitrary string. May return an empty string.
pub fn sanitize(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let replaced = ILLEGAL.replace_all(&lowered, "-");
    let collapsed = SEPARATOR_RUN.replace_all(&replaced, |caps: &regex::Captures<'_>| {
        // Keep the first separator of the run
        caps[0][..1].to_string()
    });

    let trimmed = collapsed.trim_matches(|c| matches!(c, '-' | '_' | '.'));
    let mut bounded: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    while bounded.ends_with(['-', '_', '.']) {
        bounded.pop();
    }
    bounded
}

fn url_basename(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let last = last.strip_suffix(".git").unwrap_or(last);
    if last.is_empty() {
        None
    } else {
        Some(last.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Visibility;
    use proptest::prelude::*;

    fn repo(name: &str, path: &str, url: &str) -> SourceRepository {
        SourceRepository {
            id: 42,
            name: name.into(),
            path: path.into(),
            namespace: "alice".into(),
            http_url: url.into(),
            visibility: Visibility::Public,
            description: None,
            default_branch: None,
            last_activity_at: None,
            ci_config_ref: None,
        }
    }

    #[test]
    fn test_prefers_path_slug() {
        let source = repo("My Project", "my-project", "https://gitlab.com/alice/other.git");
        assert_eq!(derive_destination_name(&source).as_str(), "my-project");
    }

    #[test]
    fn test_falls_back_to_url_segment() {
        let source = repo("My Project", "", "https://gitlab.com/alice/TvcMall-WWW.git");
        assert_eq!(derive_destination_name(&source).as_str(), "tvcmall-www");
    }

    #[test]
    fn test_falls_back_to_display_name() {
        let source = repo("  Hello World!  ", "", "not a url");
        assert_eq!(derive_destination_name(&source).as_str(), "hello-world");
    }

    #[test]
    fn test_placeholder_when_empty() {
        let source = repo("???", "", "");
        assert_eq!(derive_destination_name(&source).as_str(), "repo-42");
    }

    #[test]
    fn test_collapses_and_trims_separators() {
        assert_eq!(sanitize("--a  b__c..d--"), "a-b_c.d");
        assert_eq!(sanitize("日本語 repo"), "repo");
    }

    #[test]
    fn test_bounded_length() {
        let long = "a".repeat(250);
        assert_eq!(sanitize(&long).len(), MAX_NAME_LEN);
    }

    proptest! {
        #[test]
        fn prop_derived_name_is_deterministic_and_legal(
            name in ".{0,120}",
            path in "[ -~]{0,40}",
            id in 0u64..10_000
        ) {
            let mut source = repo(&name, &path, "");
            source.id = id;
            let first = derive_destination_name(&source);
            let second = derive_destination_name(&source);

            prop_assert_eq!(&first, &second);
            prop_assert!(!first.as_str().is_empty());
            prop_assert!(first.as_str().len() <= MAX_NAME_LEN);
            prop_assert!(first
                .as_str()
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')));
            prop_assert!(!first.as_str().starts_with(['-', '_', '.']));
            prop_assert!(!first.as_str().ends_with(['-', '_', '.']));
        }
    }
}
