//! Catalog table, selection prompt and confirmation.

use anyhow::Result;
use console::{pad_str, style, Alignment, Term};
use ferry_migrate::{
    parse_selection, CatalogEntry, DestinationState, MigrationConfig, Selection, Visibility,
};
use std::collections::BTreeSet;
use std::io::BufRead;

const DESCRIPTION_WIDTH: usize = 50;

fn state_label(state: DestinationState) -> String {
    match state {
        DestinationState::New => style("new").green().to_string(),
        DestinationState::Exists => style("exists").yellow().to_string(),
        DestinationState::Unknown => style("unknown").red().to_string(),
    }
}

/// One table row, without a trailing newline.
fn format_row(entry: &CatalogEntry) -> String {
    let source = &entry.source;
    let visibility = match source.visibility {
        Visibility::Public => "public",
        Visibility::Private => "private",
    };
    let ci = if source.has_ci_config() { "yes" } else { "-" };
    let activity = source
        .last_activity_at
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d").to_string());
    let description = source
        .description
        .as_deref()
        .map(|d| d.replace(['\n', '\r'], " "))
        .unwrap_or_default();

    format!(
        "{:>4}  {}  {:<8} {:<3} {}  {}  {}",
        entry.index,
        pad_str(&entry.destination.to_string(), 30, Alignment::Left, Some("…")),
        visibility,
        ci,
        pad_str(&state_label(entry.state), 7, Alignment::Left, None),
        activity,
        console::truncate_str(&description, DESCRIPTION_WIDTH, "…"),
    )
}

/// Print the annotated catalog.
pub fn print_catalog(entries: &[CatalogEntry]) {
    println!(
        "\n{}",
        style(format!("Found {} repositories:", entries.len())).bold()
    );
    println!(
        "{:>4}  {:<30}  {:<8} {:<3} {:<7}  {:<10}  {}",
        "#", "destination", "access", "ci", "state", "activity", "description"
    );
    for entry in entries {
        println!("{}", format_row(entry));
    }
}

/// Print what is about to happen.
pub fn print_plan(entries: &[CatalogEntry], indices: &BTreeSet<usize>, config: &MigrationConfig) {
    println!(
        "\n{} {} repositories to {} ({} transfer, {} CI conversion):",
        style("Migrating").bold(),
        indices.len(),
        style(&config.destination.owner).cyan(),
        config.strategy,
        if config.ci.is_some() { "with" } else { "without" },
    );
    for entry in entries.iter().filter(|e| indices.contains(&e.index)) {
        println!("  {} -> {}", entry.source.full_path(), entry.destination);
    }
}

/// Ask for a selection until one parses. End of input counts as quit.
pub fn prompt_selection(catalog_len: usize) -> Result<Selection> {
    let term = Term::stdout();
    loop {
        term.write_line(&format!(
            "\nSelect repositories: index, list (1,3,5), range (2-4), {} or {}",
            style("all").bold(),
            style("q").bold()
        ))?;
        term.write_str("> ")?;
        let Some(line) = read_line()? else {
            return Ok(Selection::Quit);
        };
        match parse_selection(&line, catalog_len) {
            Ok(selection) => return Ok(selection),
            Err(e) => term.write_line(&style(format!("Invalid selection: {e}")).red().to_string())?,
        }
    }
}

/// One line of stdin, `None` at end of input.
fn read_line() -> Result<Option<String>> {
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// `(y/N)` confirmation.
pub fn confirm(count: usize) -> Result<bool> {
    let term = Term::stdout();
    term.write_str(&format!("Start migrating {count} repositories? (y/N) "))?;
    let answer = read_line()?.unwrap_or_default();
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_migrate::{derive_destination_name, SourceRepository};

    fn entry(description: Option<&str>, state: DestinationState) -> CatalogEntry {
        let source = SourceRepository {
            id: 1,
            name: "My Project".into(),
            path: "my-project".into(),
            namespace: "alice".into(),
            http_url: "https://gitlab.com/alice/my-project.git".into(),
            visibility: Visibility::Public,
            description: description.map(str::to_string),
            default_branch: Some("main".into()),
            last_activity_at: Some("2024-03-01T10:00:00Z".parse().unwrap()),
            ci_config_ref: Some("main".into()),
        };
        CatalogEntry {
            index: 7,
            destination: derive_destination_name(&source),
            source,
            state,
        }
    }

    #[test]
    fn test_row_contains_columns() {
        console::set_colors_enabled(false);
        let row = format_row(&entry(Some("A demo"), DestinationState::Exists));
        assert!(row.contains("   7  my-project"));
        assert!(row.contains("public"));
        assert!(row.contains("yes"));
        assert!(row.contains("exists"));
        assert!(row.contains("2024-03-01"));
        assert!(row.ends_with("A demo"));
    }

    #[test]
    fn test_long_description_is_truncated() {
        console::set_colors_enabled(false);
        let long = "x".repeat(120);
        let row = format_row(&entry(Some(&long), DestinationState::New));
        assert!(!row.contains(&long));
        assert!(row.ends_with('…'));
    }
}
