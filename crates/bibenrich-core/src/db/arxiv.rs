use super::{DatabaseBackend, DbQueryError, QueryFuture, ResolverQuery, check_status, user_agent};
use crate::matching::{query_words, title_in_citation};
use crate::{BibRecord, Source};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Trailing version suffix of an arXiv id (`2101.00001v2`).
static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());

pub struct Arxiv {
    pub base_url: String,
}

impl Default for Arxiv {
    fn default() -> Self {
        Self {
            base_url: "http://export.arxiv.org".to_string(),
        }
    }
}

impl DatabaseBackend for Arxiv {
    fn name(&self) -> &str {
        "arXiv"
    }

    fn source(&self) -> Source {
        Source::Arxiv
    }

    fn query<'a>(
        &'a self,
        query: ResolverQuery<'a>,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> QueryFuture<'a> {
        Box::pin(self.lookup(query, client, timeout))
    }
}

impl Arxiv {
    async fn lookup(
        &self,
        query: ResolverQuery<'_>,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Option<BibRecord>, DbQueryError> {
        let base = self.base_url.trim_end_matches('/');
        let by_id = query.fields.arxiv_id.as_deref();
        let url = match by_id {
            Some(id) => format!("{}/api/query?id_list={}", base, urlencoding::encode(id)),
            None => {
                let words = query_words(query.text, 6);
                if words.is_empty() {
                    return Ok(None);
                }
                format!(
                    "{}/api/query?search_query=all:{}&start=0&max_results=5",
                    base,
                    urlencoding::encode(&words.join(" "))
                )
            }
        };

        let resp = client
            .get(&url)
            .header("User-Agent", user_agent(None))
            .timeout(timeout)
            .send()
            .await?;
        let body = check_status(resp)?.text().await?;

        let entries = parse_atom_feed(&body)?;
        let hit = if by_id.is_some() {
            entries.into_iter().find(|e| e.id.contains("/abs/"))
        } else {
            entries
                .into_iter()
                .find(|e| title_in_citation(&e.title, query.text))
        };

        Ok(hit.map(|entry| entry.into_record(query.key)))
    }
}

#[derive(Debug, Default, Clone)]
struct AtomEntry {
    id: String,
    title: String,
    authors: Vec<String>,
    published: String,
    primary_category: Option<String>,
    doi: Option<String>,
}

impl AtomEntry {
    fn into_record(self, key: &str) -> BibRecord {
        let eprint = self
            .id
            .rsplit_once("/abs/")
            .map(|(_, id)| VERSION_SUFFIX.replace(id, "").into_owned())
            .unwrap_or_default();

        let mut record = BibRecord::new("misc", key);
        if !self.authors.is_empty() {
            record.set("author", self.authors.join(" and "));
        }
        let title = self.title.split_whitespace().collect::<Vec<_>>().join(" ");
        if !title.is_empty() {
            record.set("title", title);
        }
        if let Some(year) = self.published.get(..4) {
            record.set("year", year);
        }
        if !eprint.is_empty() {
            record.set("eprint", eprint);
            record.set("archiveprefix", "arXiv");
        }
        if let Some(class) = self.primary_category {
            record.set("primaryclass", class);
        }
        if let Some(doi) = self.doi {
            record.set("doi", doi);
        }
        record
    }
}

/// Parse an arXiv Atom feed into its entries.
fn parse_atom_feed(xml: &str) -> Result<Vec<AtomEntry>, DbQueryError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut entries = Vec::new();
    let mut current: Option<AtomEntry> = None;
    // Local name of the element whose text we are collecting.
    let mut field: Option<Vec<u8>> = None;
    let mut in_author = false;
    let mut name = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"entry" => current = Some(AtomEntry::default()),
                    b"author" if current.is_some() => {
                        in_author = true;
                        name.clear();
                    }
                    b"primary_category" => {
                        if let Some(entry) = current.as_mut() {
                            entry.primary_category = term_attr(e);
                        }
                    }
                    other if current.is_some() => field = Some(other.to_vec()),
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"primary_category" {
                    if let Some(entry) = current.as_mut() {
                        entry.primary_category = term_attr(e);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default();
                if let (Some(entry), Some(f)) = (current.as_mut(), field.as_deref()) {
                    match f {
                        b"id" => entry.id.push_str(&text),
                        b"title" => entry.title.push_str(&text),
                        b"published" => entry.published.push_str(&text),
                        b"doi" => entry
                            .doi
                            .get_or_insert_with(String::new)
                            .push_str(text.trim()),
                        b"name" if in_author => name.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                b"author" => {
                    if let Some(entry) = current.as_mut() {
                        let n = name.trim();
                        if !n.is_empty() {
                            entry.authors.push(n.to_string());
                        }
                    }
                    in_author = false;
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DbQueryError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn term_attr(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"term")
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <published>2017-06-12T17:57:34Z</published>
    <title>Attention Is All
      You Need</title>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <arxiv:doi>10.48550/arXiv.1706.03762</arxiv:doi>
    <link href="http://arxiv.org/abs/1706.03762v7" rel="alternate" type="text/html"/>
    <arxiv:primary_category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let entries = parse_atom_feed(FEED).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.authors, ["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(entry.primary_category.as_deref(), Some("cs.CL"));
        assert_eq!(entry.doi.as_deref(), Some("10.48550/arXiv.1706.03762"));
    }

    #[test]
    fn test_entry_to_record() {
        let entry = parse_atom_feed(FEED).unwrap().remove(0);
        let record = entry.into_record("vaswani17");
        assert_eq!(record.entry_type, "misc");
        assert_eq!(record.key, "vaswani17");
        assert_eq!(record.get("title"), Some("Attention Is All You Need"));
        assert_eq!(record.get("author"), Some("Ashish Vaswani and Noam Shazeer"));
        assert_eq!(record.get("year"), Some("2017"));
        assert_eq!(record.get("eprint"), Some("1706.03762"));
        assert_eq!(record.get("archiveprefix"), Some("arXiv"));
        assert_eq!(record.get("primaryclass"), Some("cs.CL"));
    }

    #[test]
    fn test_feed_title_outside_entry_ignored() {
        let entries = parse_atom_feed(r#"<feed><title>Only feed</title></feed>"#).unwrap();
        assert!(entries.is_empty());
    }
}
