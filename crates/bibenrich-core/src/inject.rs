//! Adding a missing identifier to the entries of a `.bib` file.

use crate::{BibFile, BibRecord, CitationRecord, IdentifierKind, Orchestrator, Source};

/// Fields that make up the lookup text of an entry, in order.
const QUERY_FIELDS: &[&str] = &[
    "author", "title", "journal", "booktitle", "volume", "year", "pages",
];

/// The database that assigns identifiers of `kind`.
pub fn source_for(kind: IdentifierKind) -> Option<Source> {
    match kind {
        IdentifierKind::Doi => Some(Source::Crossref),
        IdentifierKind::Mr => Some(Source::MathSciNet),
        IdentifierKind::Zbl => Some(Source::ZbMath),
        IdentifierKind::Arxiv => None,
    }
}

/// Citation-like text for a structured entry, still in LaTeX. It is
/// normalized once, when the citation is built from it.
pub fn entry_query(record: &BibRecord) -> String {
    let parts: Vec<&str> = QUERY_FIELDS
        .iter()
        .filter(|name| **name != "booktitle" || !record.has("journal"))
        .filter_map(|name| record.get(name))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();
    parts.join(", ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionSummary {
    pub entries: usize,
    pub already_present: usize,
    pub added: usize,
    pub not_found: usize,
}

/// Look up `kind` for every entry of `file` that lacks it and store only
/// that field from the hit. Entries already carrying it are left alone.
///
/// `orchestrator` should be set up with the single database for `kind`.
pub async fn inject_identifiers(
    orchestrator: &Orchestrator,
    file: &mut BibFile,
    kind: IdentifierKind,
    mut on_entry: impl FnMut(&BibRecord) + Send,
) -> InjectionSummary {
    let field = kind.bib_field();
    let mut summary = InjectionSummary::default();

    for entry in file.entries_mut() {
        summary.entries += 1;
        if entry.has(field) {
            summary.already_present += 1;
            on_entry(entry);
            continue;
        }

        let query = entry_query(entry);
        let citation = orchestrator
            .resolve(CitationRecord::new(entry.key.clone(), vec![query]))
            .await;

        match citation
            .resolved
            .as_ref()
            .and_then(|r| r.record.get(field))
        {
            Some(value) => {
                tracing::info!(key = %entry.key, field, value, "identifier added");
                entry.set(field, value);
                summary.added += 1;
            }
            None => summary.not_found += 1,
        }
        on_entry(entry);
    }

    summary
}
