use clap::{ArgAction, Args, Parser, Subcommand};
use lectern_library::ReadStatus;
use lectern_query::Mode;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "lectern", version, about = "Catalog, rename, convert and sync a personal e-book library")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, global = true, env = "LECTERN_CONFIG")]
    pub config: Option<PathBuf>,

    /// More logging: `-v` for debug, `-vv` for trace. `RUST_LOG` wins when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Answer yes to every confirmation.
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Search terms shared by every command that works on a selection of books.
#[derive(Debug, Clone, Default, Args)]
pub struct Selection {
    /// `series:`, `author:`, `title:`, `tag:` or `progress:` scoped terms, or
    /// free text. No terms selects everything.
    pub terms: Vec<String>,

    /// Drop books matching this term. Repeatable.
    #[arg(short = 'x', long = "exclude", value_name = "TERM")]
    pub exclude: Vec<String>,

    /// Every term must match, instead of any.
    #[arg(long)]
    pub all: bool,

    /// Match whole values instead of substrings.
    #[arg(long)]
    pub exact: bool,
}
impl Selection {
    pub fn mode(&self) -> Mode {
        match self.all {
            true => Mode::All,
            false => Mode::Any,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan the library, pick up new and removed files, and rename everything
    /// to its canonical name.
    Refresh,

    /// Import books waiting in the import directory.
    Import {
        /// First copy every e-book found under `scrape_root` into the import
        /// directory.
        #[arg(long)]
        scrape: bool,
    },

    /// Convert the selection for the reader device.
    Convert {
        #[command(flatten)]
        selection: Selection,
    },

    /// Copy the selection to the reader device, or mirror it into a directory.
    Sync {
        /// Mirror the library sources into this directory instead.
        #[arg(long, value_name = "DIR")]
        to: Option<PathBuf>,
        #[command(flatten)]
        selection: Selection,
    },

    /// List matching books.
    Search {
        #[command(flatten)]
        selection: Selection,
    },

    /// Count books per tag.
    Tags {
        #[command(flatten)]
        selection: Selection,
    },

    /// Add comma-separated tags to the selection.
    Tag {
        /// Comma-separated.
        tags: String,
        #[command(flatten)]
        selection: Selection,
    },

    /// Remove comma-separated tags from the selection.
    Untag {
        /// Comma-separated.
        tags: String,
        #[command(flatten)]
        selection: Selection,
    },

    /// Show every metadata field of the selection.
    Info {
        #[command(flatten)]
        selection: Selection,
    },

    /// Write metadata fields into the selected books.
    Set {
        /// `field=value`. Repeatable.
        #[arg(short, long = "field", value_name = "FIELD=VALUE", required = true, value_parser = parse_assignment)]
        fields: Vec<(String, String)>,
        #[command(flatten)]
        selection: Selection,
    },

    /// Mark the selection as unread, reading or read.
    Progress {
        status: ReadStatus,
        #[command(flatten)]
        selection: Selection,
    },

    /// Look the selection up on Open Library and show where it disagrees.
    Lookup {
        /// Candidates shown per book.
        #[arg(long, default_value_t = 3)]
        limit: usize,
        /// Also fetch each candidate's description.
        #[arg(long)]
        describe: bool,
        #[command(flatten)]
        selection: Selection,
    },

    /// Serve the selection to a reader device over HTTP.
    Serve {
        /// Serve the converted copies, converting them first.
        #[arg(long)]
        converted: bool,
        #[command(flatten)]
        selection: Selection,
    },

    /// List books whose metadata is missing a title, year or author.
    Incomplete,
}
impl Command {
    /// Whether the catalog may have changed and must be persisted.
    pub fn modifies_catalog(&self) -> bool {
        !matches!(self, Self::Search { .. } | Self::Tags { .. } | Self::Info { .. } | Self::Lookup { .. } | Self::Incomplete)
    }
}

/// Lowercased, trimmed, blanks dropped.
pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',').map(|tag| tag.trim().to_lowercase()).filter(|tag| !tag.is_empty()).collect()
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => Ok((field.trim().to_string(), value.to_string())),
        _ => Err(format!("expected FIELD=VALUE, got '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_flags() {
        let cli = Cli::parse_from(["lectern", "search", "author:herbert", "tag:scifi", "-x", "tag:fantasy", "--all", "--exact"]);
        let Command::Search { selection } = cli.command else { panic!("expected search") };
        assert_eq!(selection.terms, vec!["author:herbert", "tag:scifi"]);
        assert_eq!(selection.exclude, vec!["tag:fantasy"]);
        assert_eq!(selection.mode(), Mode::All);
        assert!(selection.exact);
    }

    #[test]
    fn test_tag_takes_comma_separated_tags_then_terms() {
        let cli = Cli::parse_from(["lectern", "tag", "SciFi, classic,", "author:herbert"]);
        let Command::Tag { tags, selection } = cli.command else { panic!("expected tag") };
        assert_eq!(split_tags(&tags), vec!["scifi", "classic"]);
        assert_eq!(selection.terms, vec!["author:herbert"]);
    }

    #[test]
    fn test_progress_status() {
        let cli = Cli::parse_from(["lectern", "-v", "progress", "read", "title:dune"]);
        assert_eq!(cli.verbose, 1);
        let Command::Progress { status, .. } = cli.command else { panic!("expected progress") };
        assert_eq!(status, ReadStatus::Read);
        assert!(Cli::try_parse_from(["lectern", "progress", "skimmed"]).is_err());
    }

    #[rstest]
    #[case("series=Dune Chronicles", Some(("series", "Dune Chronicles")))]
    #[case("title = Dune ", Some(("title", " Dune ")))]
    #[case("year=", Some(("year", "")))]
    #[case("=Dune", None)]
    #[case("Dune", None)]
    fn test_parse_assignment(#[case] input: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = parse_assignment(input).ok();
        assert_eq!(parsed.as_ref().map(|(f, v)| (f.as_str(), v.as_str())), expected);
    }

    #[test]
    fn test_read_only_commands() {
        assert!(!Cli::parse_from(["lectern", "search"]).command.modifies_catalog());
        assert!(!Cli::parse_from(["lectern", "incomplete"]).command.modifies_catalog());
        assert!(Cli::parse_from(["lectern", "refresh"]).command.modifies_catalog());
        assert!(Cli::parse_from(["lectern", "untag", "x", "dune"]).command.modifies_catalog());
    }
}
