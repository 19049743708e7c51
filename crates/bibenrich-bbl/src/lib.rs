use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use bibenrich_core::{CitationRecord, IdentifierKind, normalize};

#[derive(Error, Debug)]
pub enum BblError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const BEGIN_MARKER: &str = "\\begin{thebibliography}";
const END_MARKER: &str = "\\end{thebibliography}";
const ITEM_MARKER: &str = "\\bibitem";

/// What a scan of a document found: the citations plus whether the
/// bibliography markers were present at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibliographyScan {
    pub citations: Vec<CitationRecord>,
    pub found_begin: bool,
    pub found_end: bool,
}

impl BibliographyScan {
    /// True when a complete begin/end pair was seen.
    pub fn has_bibliography(&self) -> bool {
        self.found_begin && self.found_end
    }
}

/// Split a document into citation records.
///
/// Only text between `\begin{thebibliography}` and `\end{thebibliography}`
/// is looked at; a document may hold several such spans, and a marker may
/// share its line with bibliography text. Each `\bibitem` line starts a new
/// record, and every following non-blank line up to the next `\bibitem` or
/// the end marker is appended to its raw text. Text after the key on the
/// `\bibitem` line itself becomes the first raw line.
pub fn scan_bibliography<S: AsRef<str>>(lines: &[S]) -> BibliographyScan {
    let mut scan = BibliographyScan::default();
    let mut in_span = false;
    let mut current: Option<(String, Vec<String>)> = None;

    for line in lines {
        let mut line = line.as_ref().trim_end_matches(['\r', '\n']);

        loop {
            if !in_span {
                let Some(pos) = line.find(BEGIN_MARKER) else {
                    break;
                };
                in_span = true;
                scan.found_begin = true;
                line = skip_group(&line[pos + BEGIN_MARKER.len()..]);
                continue;
            }

            let Some(pos) = line.find(END_MARKER) else {
                scan_segment(&mut scan.citations, &mut current, line);
                break;
            };
            scan_segment(&mut scan.citations, &mut current, &line[..pos]);
            finish_item(&mut scan.citations, current.take());
            in_span = false;
            scan.found_end = true;
            line = &line[pos + END_MARKER.len()..];
        }
    }

    if in_span {
        debug!("bibliography not terminated, keeping items collected so far");
    }
    finish_item(&mut scan.citations, current.take());
    scan
}

/// Handle one piece of a line inside the bibliography.
fn scan_segment(
    out: &mut Vec<CitationRecord>,
    current: &mut Option<(String, Vec<String>)>,
    segment: &str,
) {
    match parse_bibitem(segment) {
        Some((key, rest)) => {
            finish_item(out, current.take());
            *current = Some((key, Vec::new()));
            push_line(current, rest.trim_start());
        }
        None => push_line(current, segment),
    }
}

/// Drop the widest-label argument `{99}` that follows the begin marker.
fn skip_group(text: &str) -> &str {
    let trimmed = text.trim_start();
    trimmed
        .strip_prefix('{')
        .and_then(|body| closing_delimiter(body, '{', '}').map(|end| &body[end + 1..]))
        .unwrap_or(text)
}

/// Citation records of a document, in order. Empty if it has no bibliography.
pub fn extract_citations<S: AsRef<str>>(lines: &[S]) -> Vec<CitationRecord> {
    scan_bibliography(lines).citations
}

pub fn extract_citations_from_str(content: &str) -> BibliographyScan {
    let lines: Vec<&str> = content.lines().collect();
    scan_bibliography(&lines)
}

/// Read a `.bbl` or `.tex` file and scan it.
pub fn extract_citations_from_path(path: &Path) -> Result<BibliographyScan, BblError> {
    let content = std::fs::read_to_string(path).map_err(|source| BblError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(extract_citations_from_str(&content))
}

fn push_line(current: &mut Option<(String, Vec<String>)>, line: &str) {
    if let Some((_, lines)) = current.as_mut() {
        if !line.trim().is_empty() {
            lines.push(line.to_string());
        }
    }
}

fn finish_item(out: &mut Vec<CitationRecord>, item: Option<(String, Vec<String>)>) {
    match item {
        Some((key, lines)) if !lines.is_empty() => out.push(CitationRecord::new(key, lines)),
        Some((key, _)) => debug!(key = %key, "dropping empty bibliography item"),
        None => {}
    }
}

/// Parse `\bibitem[label]{key} rest` at the start of a line, returning the
/// key and whatever follows it.
fn parse_bibitem(line: &str) -> Option<(String, &str)> {
    let rest = line.trim_start().strip_prefix(ITEM_MARKER)?;
    // \bibitemsep and friends are different commands
    if rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }

    let mut rest = rest.trim_start();
    if let Some(label) = rest.strip_prefix('[') {
        let end = closing_delimiter(label, '[', ']')?;
        rest = label[end + 1..].trim_start();
    }

    let body = rest.strip_prefix('{')?;
    let end = closing_delimiter(body, '{', '}')?;
    Some((body[..end].trim().to_string(), &body[end + 1..]))
}

/// Byte offset of the delimiter closing a group whose opener was already
/// consumed. Handles nesting.
fn closing_delimiter(text: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 1usize;
    for (i, ch) in text.char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// `\arxiv{...}`, `\MR{...}`, `\zbl{...}`, `\doi{...}` in scan order.
static ANNOTATIONS: Lazy<Vec<(IdentifierKind, Regex)>> = Lazy::new(|| {
    IdentifierKind::ALL
        .iter()
        .map(|kind| {
            let pattern = format!(r"\\(?i:{})\s*\{{([^{{}}]*)\}}", kind.annotation());
            (*kind, Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// Pull author-supplied identifier annotations out of a citation.
///
/// Works on the raw lines joined into one. Only the first annotation of each
/// kind is taken; it is removed from the working text, which is then
/// normalized into `normalized_text`. The raw text is left alone.
pub fn extract_fields(mut record: CitationRecord) -> CitationRecord {
    let mut working = record.joined_raw_text();

    for (kind, re) in ANNOTATIONS.iter() {
        let found = re.captures(&working).and_then(|caps| {
            let range = caps.get(0)?.range();
            Some((range, clean_identifier(caps.get(1)?.as_str())))
        });
        let Some((range, value)) = found else {
            continue;
        };

        working.replace_range(range, "");
        if !value.is_empty() {
            debug!(key = %record.key, kind = kind.annotation(), value = %value, "found annotation");
            record.extracted.set(*kind, value);
        }
    }

    record.normalized_text = normalize(&working);
    record
}

fn clean_identifier(value: &str) -> String {
    let value = value.trim();
    value.strip_suffix('.').unwrap_or(value).trim_end().to_string()
}
