//! Per-article metadata side-files (`.rpi`) and grouping by issue.
//!
//! A side-file is line oriented; only lines of the form `%field=value` are
//! read. Authors are separated by `\and`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use bibenrich_core::CitationRecord;

use crate::authors::AuthorSpec;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("cannot read metadata file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("author '{author}' has both \\organization and \\orcid")]
    ConflictingAuthorDirectives { author: String },
}

static FIELD_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*%\s*([A-Za-z]+)\s*=(.*)$").unwrap());
static AND: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\and\b").unwrap());

/// One article to deposit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaperMetadata {
    pub title: String,
    pub authors: Vec<AuthorSpec>,
    pub year: String,
    pub volume: String,
    pub issue: String,
    pub start_page: Option<String>,
    pub end_page: Option<String>,
    pub doi: Option<String>,
    pub paper_url: Option<String>,
    pub bibliography: Vec<CitationRecord>,
}

/// A parsed side-file plus the fields that were assigned more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMetadata {
    pub paper: PaperMetadata,
    pub duplicates: Vec<String>,
}

/// Parse side-file text. A repeated field keeps its last value and is
/// reported in [`ParsedMetadata::duplicates`].
pub fn parse_rpi(content: &str) -> Result<ParsedMetadata, MetadataError> {
    let mut parsed = ParsedMetadata::default();
    let mut seen: Vec<String> = Vec::new();

    for line in content.lines() {
        let Some(caps) = FIELD_LINE.captures(line) else {
            continue;
        };
        let field = caps[1].to_ascii_lowercase();
        let value = caps[2].trim();
        let paper = &mut parsed.paper;

        match field.as_str() {
            "authors" | "author" => {
                paper.authors = AND
                    .split(value)
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(AuthorSpec::parse)
                    .collect::<Result<_, _>>()?;
            }
            "title" => paper.title = value.to_string(),
            "year" => paper.year = value.to_string(),
            "volume" => paper.volume = value.to_string(),
            "issue" => paper.issue = value.to_string(),
            "startpage" => paper.start_page = non_empty(value),
            "endpage" => paper.end_page = non_empty(value),
            "doi" => paper.doi = non_empty(value),
            "paperurl" => paper.paper_url = non_empty(value),
            _ => {
                debug!(field = %field, "ignoring unknown metadata field");
                continue;
            }
        }

        let canonical = if field == "author" { "authors".to_string() } else { field };
        if seen.contains(&canonical) {
            warn!(field = %canonical, "metadata field assigned more than once, using the last value");
            if !parsed.duplicates.contains(&canonical) {
                parsed.duplicates.push(canonical);
            }
        } else {
            seen.push(canonical);
        }
    }

    Ok(parsed)
}

pub fn load_rpi(path: &Path) -> Result<ParsedMetadata, MetadataError> {
    let content = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rpi(&content)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Grouping key of an issue. Orders by year, then volume, then issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IssueKey {
    pub year: String,
    pub volume: String,
    pub issue: String,
}

impl IssueKey {
    pub fn of(paper: &PaperMetadata) -> Self {
        Self {
            year: paper.year.clone(),
            volume: paper.volume.clone(),
            issue: paper.issue.clone(),
        }
    }
}

/// Group papers by issue. Papers keep their input order within a group.
pub fn aggregate(papers: Vec<PaperMetadata>) -> BTreeMap<IssueKey, Vec<PaperMetadata>> {
    let mut groups: BTreeMap<IssueKey, Vec<PaperMetadata>> = BTreeMap::new();
    for paper in papers {
        groups.entry(IssueKey::of(&paper)).or_default().push(paper);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    const RPI: &str = r"%authors=A. Author\and B. Author
%title=A Title
%year=2024
%volume=12
%issue=3
%startpage=101
%endpage=120
%doi=10.1000/jrnl.2024.12.3.101
%paperUrl=https://journal.example.org/12/3/101
\documentclass{article}
";

    #[test]
    fn test_parse_fields() {
        let parsed = parse_rpi(RPI).unwrap();
        let paper = parsed.paper;
        assert_eq!(paper.title, "A Title");
        assert_eq!(paper.authors.len(), 2);
        assert_eq!(paper.authors[0].name.as_ref().unwrap().last, "Author");
        assert_eq!(paper.authors[1].name.as_ref().unwrap().first, "B.");
        assert_eq!(paper.year, "2024");
        assert_eq!(paper.volume, "12");
        assert_eq!(paper.issue, "3");
        assert_eq!(paper.start_page.as_deref(), Some("101"));
        assert_eq!(paper.end_page.as_deref(), Some("120"));
        assert_eq!(paper.doi.as_deref(), Some("10.1000/jrnl.2024.12.3.101"));
        assert_eq!(
            paper.paper_url.as_deref(),
            Some("https://journal.example.org/12/3/101")
        );
        assert!(parsed.duplicates.is_empty());
    }

    #[test]
    fn test_duplicate_field_last_wins() {
        let parsed = parse_rpi("%title=First\n%title=Second\n%year=2020\n%title=Third\n").unwrap();
        assert_eq!(parsed.paper.title, "Third");
        assert_eq!(parsed.duplicates, ["title"]);
    }

    #[test]
    fn test_author_alias_counts_as_duplicate() {
        let parsed = parse_rpi("%author=A. One\n%authors=B. Two\n").unwrap();
        assert_eq!(parsed.paper.authors.len(), 1);
        assert_eq!(parsed.paper.authors[0].display, "B. Two");
        assert_eq!(parsed.duplicates, ["authors"]);
    }

    #[test]
    fn test_conflicting_author_is_fatal() {
        let err = parse_rpi("%authors=\\organization ACME \\orcid{0000-0002-1825-0097}\n").unwrap_err();
        assert!(matches!(err, MetadataError::ConflictingAuthorDirectives { .. }));
    }

    #[test]
    fn test_non_field_lines_ignored() {
        let parsed = parse_rpi("% a comment\n%unknown=1\nplain text\n").unwrap();
        assert_eq!(parsed.paper, PaperMetadata::default());
    }

    #[test]
    fn test_aggregate_groups_and_orders() {
        let paper = |title: &str, year: &str, volume: &str, issue: &str| PaperMetadata {
            title: title.into(),
            year: year.into(),
            volume: volume.into(),
            issue: issue.into(),
            ..PaperMetadata::default()
        };
        let groups = aggregate(vec![
            paper("late", "2024", "12", "2"),
            paper("early", "2023", "11", "4"),
            paper("late again", "2024", "12", "2"),
            paper("first of issue 1", "2024", "12", "1"),
        ]);

        let keys: Vec<_> = groups.keys().map(|k| k.issue.as_str()).collect();
        assert_eq!(keys, ["4", "1", "2"]);
        let titles: Vec<_> = groups
            .values()
            .flat_map(|papers| papers.iter().map(|p| p.title.as_str()))
            .collect();
        assert_eq!(titles, ["early", "first of issue 1", "late", "late again"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_rpi(Path::new("/nonexistent/paper.rpi")).unwrap_err();
        assert!(matches!(err, MetadataError::Io { .. }));
    }
}
