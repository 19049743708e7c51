use std::io::{self, Write};

use bibenrich_core::CitationRecord;

/// One citation as a bibliography-database block: the original source lines
/// as `%` comments, then the resolved entry when there is one.
pub fn to_bibliography_entry(record: &CitationRecord) -> String {
    let mut out = String::new();
    for line in record.raw_text() {
        out.push_str("% ");
        out.push_str(line);
        out.push('\n');
    }
    if let Some(resolved) = &record.resolved {
        out.push_str(&resolved.record.to_bibtex());
    }
    out
}

/// Write every citation block, separated by blank lines.
pub fn write_bibliography<W: Write>(out: &mut W, records: &[CitationRecord]) -> io::Result<()> {
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        out.write_all(to_bibliography_entry(record).as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibenrich_core::{BibRecord, ResolvedRecord, Source};

    fn knuth() -> CitationRecord {
        CitationRecord::new(
            "knuth84",
            vec![
                "D.~E. Knuth, \\emph{The \\TeX book},".to_string(),
                "  Addison-Wesley, 1984.".to_string(),
            ],
        )
    }

    #[test]
    fn test_unresolved_entry_is_comment_only() {
        assert_eq!(
            to_bibliography_entry(&knuth()),
            "% D.~E. Knuth, \\emph{The \\TeX book},\n%   Addison-Wesley, 1984.\n"
        );
    }

    #[test]
    fn test_resolved_entry_follows_comment() {
        let mut record = knuth();
        record.resolved = Some(ResolvedRecord {
            source: Source::MathSciNet,
            record: BibRecord::new("book", "knuth84")
                .with("title", "The TeXbook")
                .with("mrnumber", "0734534"),
        });
        let entry = to_bibliography_entry(&record);
        assert!(entry.starts_with("% D.~E. Knuth"));
        assert!(entry.ends_with(
            "@book{knuth84,\n  title = {The TeXbook},\n  mrnumber = {0734534},\n}\n"
        ));
    }

    #[test]
    fn test_document_separates_entries() {
        let other = CitationRecord::new("b", vec!["B.".to_string()]);
        let mut buf = Vec::new();
        write_bibliography(&mut buf, &[knuth(), other]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("1984.\n\n% B.\n"));
    }

    #[test]
    fn test_empty_document() {
        let mut buf = Vec::new();
        write_bibliography(&mut buf, &[]).unwrap();
        assert!(buf.is_empty());
    }
}
