//! Everything the command line prints. The library crates only return plain
//! data; colouring and layout happen here.

use colored::{ColoredString, Colorize};
use lectern_library::{
    ConvertReport, Failure, FieldChange, ImportReport, LoadReport, PrepareReport, ProposedChange, ReadStatus,
    ReconcileReport, SyncReport,
};
use lectern_lookup::{Candidate, FieldDiff};
use std::io::{BufRead, Write};
use std::path::Path;

/// Colours `text` by read status: unread yellow, reading green, read blue.
pub fn annotate(text: &str, status: ReadStatus) -> ColoredString {
    match status {
        ReadStatus::Unread => text.bright_yellow(),
        ReadStatus::Reading => text.bright_green(),
        ReadStatus::Read => text.bright_blue(),
    }
}

/// Asks on stdin. Anything but `y`/`yes` is a no, including end of input.
pub fn confirm(change: &ProposedChange<'_>) -> bool {
    println!("{}", describe_change(change));
    print!("Proceed? [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub fn describe_change(change: &ProposedChange<'_>) -> String {
    match change {
        ProposedChange::Import { candidate, summary } => format!("Import {}\n  as {summary}", candidate.display()),
        ProposedChange::Metadata { path, changes } => {
            let mut text = format!("Update {}", path.display());
            for FieldChange { field, old, new } in changes.iter() {
                text.push_str(&format!("\n  {field}: {} -> {new}", quoted(&old.join(", "))));
            }
            text
        },
    }
}

fn quoted(value: &str) -> String {
    match value.is_empty() {
        true => "(empty)".to_string(),
        false => format!("'{value}'"),
    }
}

fn failures(failed: &[Failure]) {
    for Failure { path, error } in failed {
        println!("  {} {}: {error}", "failed".red(), path.display());
    }
}

fn paths<'a>(label: &str, paths: impl IntoIterator<Item = &'a std::path::PathBuf>) {
    for path in paths {
        println!("  {label} {}", path.display());
    }
}

pub fn load(report: &LoadReport) {
    paths(&"missing".yellow().to_string(), &report.missing);
    for key in &report.corrupt {
        println!("  {} snapshot record {key}", "skipped".red());
    }
}

pub fn reconcile(report: &ReconcileReport) {
    paths(&"added".green().to_string(), &report.added);
    paths(&"deleted".yellow().to_string(), &report.deleted);
    for (from, to) in &report.renamed {
        println!("  {} {} -> {}", "renamed".cyan(), from.display(), to.display());
    }
    paths(&"incomplete".yellow().to_string(), &report.incomplete);
    failures(&report.failed);
    println!(
        "{} added, {} deleted, {} renamed, {} incomplete, {} failed",
        report.added.len(),
        report.deleted.len(),
        report.renamed.len(),
        report.incomplete.len(),
        report.failed.len()
    );
}

pub fn prepare(report: &PrepareReport) {
    paths(&"converted".green().to_string(), &report.converted);
    failures(&report.failed);
}

pub fn import(report: &ImportReport) {
    paths(&"imported".green().to_string(), &report.imported);
    paths(&"duplicate".yellow().to_string(), &report.duplicates);
    paths(&"incomplete".yellow().to_string(), &report.incomplete);
    paths(&"already in library".yellow().to_string(), &report.already_in_library);
    paths(&"declined".dimmed().to_string(), &report.declined);
    failures(&report.failed);
    println!(
        "{} imported, {} duplicates, {} incomplete, {} already in library, {} failed",
        report.imported.len(),
        report.duplicates.len(),
        report.incomplete.len(),
        report.already_in_library.len(),
        report.failed.len()
    );
}

pub fn convert(report: &ConvertReport) {
    paths(&"converted".green().to_string(), &report.converted);
    failures(&report.failed);
    println!("{} converted, {} up to date, {} failed", report.converted.len(), report.current, report.failed.len());
}

pub fn sync(report: &SyncReport) {
    paths(&"synced".green().to_string(), &report.synced);
    paths(&"removed".yellow().to_string(), &report.removed);
    failures(&report.failed);
    println!(
        "{} synced, {} up to date, {} removed, {} failed",
        report.synced.len(),
        report.current,
        report.removed.len(),
        report.failed.len()
    );
}

/// A lookup candidate and where it disagrees with the entry at `path`.
pub fn candidate(path: &Path, candidate: &Candidate, diffs: &[FieldDiff]) {
    let year = candidate.first_publish_year.map(|year| year.to_string()).unwrap_or_default();
    println!("  {} {} ({year}) {} [{}]", "candidate".cyan(), candidate.author, candidate.title, candidate.key);
    if diffs.is_empty() {
        println!("    matches {}", path.display());
    }
    for FieldDiff { field, current, proposed } in diffs {
        println!("    {field}: {} -> {}", quoted(current), proposed.bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_annotate() {
        colored::control::set_override(true);
        let unread = annotate("Dune", ReadStatus::Unread).to_string();
        let read = annotate("Dune", ReadStatus::Read).to_string();
        assert!(unread.contains("Dune") && read.contains("Dune"));
        assert!(unread.starts_with("\u{1b}["));
        assert_ne!(unread, read);
        assert_ne!(unread, annotate("Dune", ReadStatus::Reading).to_string());
    }

    #[rstest]
    #[case("y\n", true)]
    #[case(" YES ", true)]
    #[case("n", false)]
    #[case("", false)]
    #[case("yep", false)]
    fn test_is_yes(#[case] answer: &str, #[case] expected: bool) {
        assert_eq!(is_yes(answer), expected);
    }

    #[test]
    fn test_describe_metadata_change() {
        let changes = [
            FieldChange { field: "title".to_string(), old: vec!["Dune".to_string()], new: "Dune Messiah".to_string() },
            FieldChange { field: "series".to_string(), old: vec![], new: "Dune Chronicles".to_string() },
        ];
        let text = describe_change(&ProposedChange::Metadata { path: Path::new("/books/dune.epub"), changes: &changes });
        assert_eq!(
            text,
            "Update /books/dune.epub\n  title: 'Dune' -> Dune Messiah\n  series: (empty) -> Dune Chronicles"
        );
    }
}
