//! Deposit document (`doi_batch`, schema 5.3.1) for a set of articles.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;

use bibenrich_core::{Config, DepositorInfo, JournalInfo, escape_xml};

use crate::authors::AuthorSpec;
use crate::metadata::{IssueKey, PaperMetadata};
use crate::xml::{escape_text, title_to_xml, to_citation_xml_fragment};

pub const SCHEMA_VERSION: &str = "5.3.1";
const NAMESPACE: &str = "http://www.crossref.org/schema/5.3.1";
const SCHEMA_LOCATION: &str =
    "http://www.crossref.org/schema/5.3.1 https://www.crossref.org/schemas/crossref5.3.1.xsd";

#[derive(Error, Debug)]
pub enum DepositError {
    #[error("title contains markup <{tag}> that the deposit schema does not allow: {title}")]
    DisallowedMarkup { tag: String, title: String },
    #[error("journal full_title is not configured")]
    MissingJournalTitle,
}

/// Identity of one deposit batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHead {
    pub batch_id: String,
    pub timestamp: String,
}

impl BatchHead {
    /// Fill in whatever the caller did not supply. The timestamp defaults to
    /// now (UTC) and the batch id to `<registrant>-<timestamp>`.
    pub fn new(
        depositor: &DepositorInfo,
        batch_id: Option<String>,
        timestamp: Option<String>,
    ) -> Self {
        let timestamp =
            timestamp.unwrap_or_else(|| Utc::now().format("%Y%m%d%H%M%S").to_string());
        let batch_id = batch_id.unwrap_or_else(|| {
            let prefix = match depositor.registrant.trim() {
                "" => "bibenrich",
                registrant => registrant,
            };
            format!("{}-{}", prefix, timestamp)
        });
        Self {
            batch_id,
            timestamp,
        }
    }
}

#[derive(Default)]
struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, tag: &str, attrs: &str) {
        self.line(&format!("<{}{}>", tag, attrs));
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(&format!("</{}>", tag));
    }

    /// `content` must already be escaped.
    fn leaf(&mut self, tag: &str, attrs: &str, content: &str) {
        self.line(&format!("<{}{}>{}</{}>", tag, attrs, content, tag));
    }
}

/// Serialize grouped articles as a deposit document.
///
/// Fails on the first title carrying markup outside the allow-list.
pub fn deposit_document(
    config: &Config,
    head: &BatchHead,
    groups: &BTreeMap<IssueKey, Vec<PaperMetadata>>,
) -> Result<String, DepositError> {
    let journal = &config.journal;
    if journal.full_title.trim().is_empty() {
        return Err(DepositError::MissingJournalTitle);
    }

    let mut w = XmlWriter::default();
    w.line(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    w.open(
        "doi_batch",
        &format!(
            " xmlns=\"{}\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" version=\"{}\" xsi:schemaLocation=\"{}\"",
            NAMESPACE, SCHEMA_VERSION, SCHEMA_LOCATION
        ),
    );
    write_head(&mut w, config, head);

    w.open("body", "");
    w.open("journal", "");
    write_journal_metadata(&mut w, journal, config.input_is_xml);

    for (key, papers) in groups {
        write_issue(&mut w, key);
        for paper in papers {
            write_article(&mut w, paper, config.input_is_xml)?;
        }
    }

    w.close("journal");
    w.close("body");
    w.close("doi_batch");
    Ok(w.out)
}

fn write_head(w: &mut XmlWriter, config: &Config, head: &BatchHead) {
    let depositor = &config.depositor;
    let text = |s: &str| escape_text(s, config.input_is_xml);
    // the journal's publisher stands in for an unset registrant
    let registrant = match depositor.registrant.trim() {
        "" => config.journal.publisher.as_deref().unwrap_or(&depositor.name),
        registrant => registrant,
    };

    w.open("head", "");
    w.leaf("doi_batch_id", "", &escape_xml(&head.batch_id));
    w.leaf("timestamp", "", &escape_xml(&head.timestamp));
    w.open("depositor", "");
    w.leaf("depositor_name", "", &text(&depositor.name));
    w.leaf("email_address", "", &escape_xml(&depositor.email));
    w.close("depositor");
    w.leaf("registrant", "", &text(registrant));
    w.close("head");
}

fn write_journal_metadata(w: &mut XmlWriter, journal: &JournalInfo, input_is_xml: bool) {
    w.open("journal_metadata", "");
    w.leaf("full_title", "", &escape_text(&journal.full_title, input_is_xml));
    if let Some(abbrev) = &journal.abbrev_title {
        w.leaf("abbrev_title", "", &escape_text(abbrev, input_is_xml));
    }
    if let Some(issn) = &journal.issn {
        w.leaf("issn", " media_type=\"print\"", &escape_xml(issn));
    }
    if let Some(eissn) = &journal.eissn {
        w.leaf("issn", " media_type=\"electronic\"", &escape_xml(eissn));
    }
    if let Some(coden) = &journal.coden {
        w.leaf("coden", "", &escape_xml(coden));
    }
    w.close("journal_metadata");
}

fn write_issue(w: &mut XmlWriter, key: &IssueKey) {
    w.open("journal_issue", "");
    write_publication_date(w, &key.year);
    if !key.volume.is_empty() {
        w.open("journal_volume", "");
        w.leaf("volume", "", &escape_xml(&key.volume));
        w.close("journal_volume");
    }
    if !key.issue.is_empty() {
        w.leaf("issue", "", &escape_xml(&key.issue));
    }
    w.close("journal_issue");
}

fn write_publication_date(w: &mut XmlWriter, year: &str) {
    if year.is_empty() {
        return;
    }
    w.open("publication_date", " media_type=\"print\"");
    w.leaf("year", "", &escape_xml(year));
    w.close("publication_date");
}

fn write_article(
    w: &mut XmlWriter,
    paper: &PaperMetadata,
    input_is_xml: bool,
) -> Result<(), DepositError> {
    let title = title_to_xml(&paper.title, input_is_xml)?;

    w.open("journal_article", " publication_type=\"full_text\"");
    w.open("titles", "");
    w.leaf("title", "", &title);
    w.close("titles");

    if !paper.authors.is_empty() {
        w.open("contributors", "");
        for (i, author) in paper.authors.iter().enumerate() {
            write_contributor(w, author, i == 0, input_is_xml);
        }
        w.close("contributors");
    }

    write_publication_date(w, &paper.year);

    if let Some(first) = &paper.start_page {
        w.open("pages", "");
        w.leaf("first_page", "", &escape_xml(first));
        if let Some(last) = &paper.end_page {
            w.leaf("last_page", "", &escape_xml(last));
        }
        w.close("pages");
    }

    if let Some(doi) = &paper.doi {
        let resource = paper
            .paper_url
            .clone()
            .unwrap_or_else(|| format!("https://doi.org/{}", doi));
        w.open("doi_data", "");
        w.leaf("doi", "", &escape_xml(doi));
        w.leaf("resource", "", &escape_xml(&resource));
        w.close("doi_data");
    }

    if !paper.bibliography.is_empty() {
        w.open("citation_list", "");
        for citation in &paper.bibliography {
            w.line(&to_citation_xml_fragment(citation));
        }
        w.close("citation_list");
    }

    w.close("journal_article");
    Ok(())
}

fn write_contributor(w: &mut XmlWriter, author: &AuthorSpec, first: bool, input_is_xml: bool) {
    let attrs = format!(
        " sequence=\"{}\" contributor_role=\"author\"",
        if first { "first" } else { "additional" }
    );
    let text = |s: &str| escape_text(s, input_is_xml);

    let Some(name) = &author.name else {
        w.leaf("organization", &attrs, &text(&author.display));
        return;
    };

    w.open("person_name", &attrs);
    if !name.first.is_empty() {
        w.leaf("given_name", "", &text(&name.first));
    }
    let surname = name.surname();
    let surname = if surname.is_empty() { author.display.clone() } else { surname };
    w.leaf("surname", "", &text(&surname));
    if !name.suffix.is_empty() {
        w.leaf("suffix", "", &text(&name.suffix));
    }
    if let Some(orcid) = author.orcid_url() {
        w.leaf("ORCID", "", &escape_xml(&orcid));
    }
    w.close("person_name");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{aggregate, parse_rpi};
    use bibenrich_core::CitationRecord;

    fn config() -> Config {
        Config {
            journal: JournalInfo {
                full_title: "Journal of Examples".into(),
                abbrev_title: Some("J. Ex.".into()),
                issn: Some("1234-5678".into()),
                eissn: Some("8765-4321".into()),
                ..JournalInfo::default()
            },
            depositor: DepositorInfo {
                name: "Editorial Office".into(),
                email: "office@example.org".into(),
                registrant: "acme".into(),
            },
            ..Config::default()
        }
    }

    fn head() -> BatchHead {
        BatchHead::new(&config().depositor, None, Some("20240101120000".into()))
    }

    fn paper(rpi: &str) -> PaperMetadata {
        parse_rpi(rpi).unwrap().paper
    }

    #[test]
    fn test_batch_head_defaults() {
        assert_eq!(head().batch_id, "acme-20240101120000");

        let anon = BatchHead::new(&DepositorInfo::default(), Some("b1".into()), None);
        assert_eq!(anon.batch_id, "b1");
        assert_eq!(anon.timestamp.len(), 14);

        let anon = BatchHead::new(&DepositorInfo::default(), None, Some("1".into()));
        assert_eq!(anon.batch_id, "bibenrich-1");
    }

    #[test]
    fn test_two_authors_first_and_additional() {
        let groups = aggregate(vec![paper(
            "%authors=A. Author\\and B. Author\n%title=A Title\n%year=2024\n%volume=1\n%issue=1\n",
        )]);
        let xml = deposit_document(&config(), &head(), &groups).unwrap();

        assert_eq!(xml.matches("<person_name ").count(), 2);
        let first = xml.find("<person_name sequence=\"first\" contributor_role=\"author\">").unwrap();
        let additional = xml
            .find("<person_name sequence=\"additional\" contributor_role=\"author\">")
            .unwrap();
        assert!(first < additional);
        assert!(xml.contains("<given_name>A.</given_name>"));
        assert!(xml.contains("<surname>Author</surname>"));
        assert!(xml.contains("<title>A Title</title>"));
    }

    #[test]
    fn test_document_head_and_journal() {
        let xml = deposit_document(&config(), &head(), &BTreeMap::new()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<doi_batch xmlns=\"http://www.crossref.org/schema/5.3.1\""));
        assert!(xml.contains("version=\"5.3.1\""));
        assert!(xml.contains("<doi_batch_id>acme-20240101120000</doi_batch_id>"));
        assert!(xml.contains("<timestamp>20240101120000</timestamp>"));
        assert!(xml.contains("<depositor_name>Editorial Office</depositor_name>"));
        assert!(xml.contains("<email_address>office@example.org</email_address>"));
        assert!(xml.contains("<registrant>acme</registrant>"));
        assert!(xml.contains("<full_title>Journal of Examples</full_title>"));
        assert!(xml.contains("<issn media_type=\"print\">1234-5678</issn>"));
        assert!(xml.contains("<issn media_type=\"electronic\">8765-4321</issn>"));
        assert!(!xml.contains("<coden>"));
        assert_eq!(xml.matches("<journal>").count(), 1);
        assert!(xml.ends_with("</doi_batch>\n"));
    }

    #[test]
    fn test_issue_groups_in_order() {
        let groups = aggregate(vec![
            paper("%title=Second issue\n%year=2024\n%volume=7\n%issue=2\n"),
            paper("%title=First issue\n%year=2024\n%volume=7\n%issue=1\n"),
            paper("%title=Also first\n%year=2024\n%volume=7\n%issue=1\n"),
        ]);
        let xml = deposit_document(&config(), &head(), &groups).unwrap();

        assert_eq!(xml.matches("<journal_issue>").count(), 2);
        let pos = |needle: &str| xml.find(needle).unwrap();
        assert!(pos("<issue>1</issue>") < pos("<title>First issue</title>"));
        assert!(pos("<title>First issue</title>") < pos("<title>Also first</title>"));
        assert!(pos("<title>Also first</title>") < pos("<issue>2</issue>"));
        assert!(pos("<issue>2</issue>") < pos("<title>Second issue</title>"));
        assert!(xml.contains("<journal_volume>\n"));
    }

    #[test]
    fn test_article_details() {
        let mut p = paper(
            "%authors=\\organization The Polymath Project\\and van Doe, Jr., Jane \\orcid{0000-0002-1825-0097}\n%title=Density \\emph{Hales--Jewett} \\& more\n%year=2012\n%startpage=1283\n%endpage=1327\n%doi=10.4007/annals.2012.175.3.6\n",
        );
        p.bibliography = vec![CitationRecord::new("k1", vec!["A & B, 1999.".into()])];
        let xml = deposit_document(&config(), &head(), &aggregate(vec![p])).unwrap();

        assert!(xml.contains(
            "<organization sequence=\"first\" contributor_role=\"author\">The Polymath Project</organization>"
        ));
        assert!(xml.contains("<surname>van Doe</surname>"));
        assert!(xml.contains("<suffix>Jr.</suffix>"));
        assert!(xml.contains("<ORCID>https://orcid.org/0000-0002-1825-0097</ORCID>"));
        assert!(xml.contains("<title>Density Hales–Jewett &amp; more</title>"));
        assert!(xml.contains("<first_page>1283</first_page>"));
        assert!(xml.contains("<last_page>1327</last_page>"));
        assert!(xml.contains("<resource>https://doi.org/10.4007/annals.2012.175.3.6</resource>"));
        assert!(xml.contains(
            "<citation key=\"k1\"><unstructured_citation>A &amp; B, 1999.</unstructured_citation></citation>"
        ));
    }

    #[test]
    fn test_no_citation_list_without_bibliography() {
        let groups = aggregate(vec![paper("%title=T\n%year=2020\n")]);
        let xml = deposit_document(&config(), &head(), &groups).unwrap();
        assert!(!xml.contains("citation_list"));
        assert!(!xml.contains("doi_data"));
    }

    #[test]
    fn test_disallowed_title_markup_fails() {
        let groups = aggregate(vec![paper("%title=Bad <blink>title</blink>\n")]);
        let err = deposit_document(&config(), &head(), &groups).unwrap_err();
        assert!(matches!(err, DepositError::DisallowedMarkup { ref tag, .. } if tag == "blink"));
    }

    #[test]
    fn test_missing_journal_title() {
        let cfg = Config::default();
        assert!(matches!(
            deposit_document(&cfg, &head(), &BTreeMap::new()),
            Err(DepositError::MissingJournalTitle)
        ));
    }

    #[test]
    fn test_registrant_falls_back_to_publisher() {
        let mut cfg = config();
        cfg.depositor.registrant.clear();
        cfg.journal.publisher = Some("Example Press".into());
        let xml = deposit_document(&cfg, &head(), &BTreeMap::new()).unwrap();
        assert!(xml.contains("<registrant>Example Press</registrant>"));
    }
}
