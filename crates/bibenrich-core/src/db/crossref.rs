use super::{DatabaseBackend, DbQueryError, QueryFuture, ResolverQuery, check_status, user_agent};
use crate::matching::title_in_citation;
use crate::normalize::escape_xml;
use crate::{BibRecord, CrossrefCredentials, Source};
use std::time::Duration;

/// Crossref, via the public REST API (email) or the member query servlet
/// (username and password).
pub struct CrossRef {
    pub credentials: CrossrefCredentials,
    pub api_base: String,
    pub query_base: String,
}

impl CrossRef {
    pub fn new(credentials: CrossrefCredentials) -> Self {
        Self {
            credentials,
            api_base: "https://api.crossref.org".to_string(),
            query_base: "https://doi.crossref.org".to_string(),
        }
    }
}

impl DatabaseBackend for CrossRef {
    fn name(&self) -> &str {
        "Crossref"
    }

    fn source(&self) -> Source {
        Source::Crossref
    }

    fn query<'a>(
        &'a self,
        query: ResolverQuery<'a>,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> QueryFuture<'a> {
        Box::pin(async move {
            match &self.credentials {
                CrossrefCredentials::Email(email) => {
                    self.query_rest(query, email, client, timeout).await
                }
                CrossrefCredentials::Account {
                    username,
                    password,
                    email,
                } => {
                    self.query_servlet(query, username, password, email.as_deref(), client, timeout)
                        .await
                }
            }
        })
    }
}

impl CrossRef {
    async fn query_rest(
        &self,
        query: ResolverQuery<'_>,
        email: &str,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Option<BibRecord>, DbQueryError> {
        let url = format!(
            "{}/works?query.bibliographic={}&rows=3&mailto={}",
            self.api_base.trim_end_matches('/'),
            urlencoding::encode(query.text),
            urlencoding::encode(email)
        );

        let resp = client
            .get(&url)
            .header("User-Agent", user_agent(Some(email)))
            .timeout(timeout)
            .send()
            .await?;
        let data: serde_json::Value = check_status(resp)?
            .json()
            .await
            .map_err(|e| DbQueryError::Parse(e.to_string()))?;

        let items = data["message"]["items"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        for item in items {
            let found_title = item["title"]
                .as_array()
                .and_then(|a| a.first())
                .and_then(|v| v.as_str())
                .unwrap_or("");

            if title_in_citation(found_title, query.text) {
                return Ok(Some(record_from_work(&item, query.key)));
            }
            tracing::debug!(title = found_title, "Crossref candidate not in citation");
        }

        Ok(None)
    }

    async fn query_servlet(
        &self,
        query: ResolverQuery<'_>,
        username: &str,
        password: &str,
        email: Option<&str>,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Option<BibRecord>, DbQueryError> {
        let url = format!(
            "{}/servlet/query?usr={}&pwd={}&format=unixsd&qdata={}",
            self.query_base.trim_end_matches('/'),
            urlencoding::encode(username),
            urlencoding::encode(password),
            urlencoding::encode(&query_batch(query.key, query.text, email))
        );

        let resp = client
            .get(&url)
            .header("User-Agent", user_agent(email))
            .timeout(timeout)
            .send()
            .await?;
        let body = check_status(resp)?.text().await?;

        let doi = first_doi(&body)?;
        Ok(doi.map(|doi| BibRecord::new("misc", query.key).with("doi", doi)))
    }
}

/// Query-batch XML wrapping one unstructured citation. The head carries no
/// `<email_address>` when there is no contact address.
fn query_batch(key: &str, text: &str, email: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str(
        r#"<query_batch version="2.0" xmlns="http://www.crossref.org/qschema/2.0" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
    );
    out.push_str("<head>");
    if let Some(email) = email {
        out.push_str(&format!("<email_address>{}</email_address>", escape_xml(email)));
    }
    out.push_str(&format!(
        "<doi_batch_id>bibenrich-{}</doi_batch_id>",
        escape_xml(key)
    ));
    out.push_str("</head><body>");
    out.push_str(&format!(
        r#"<query key="{}" enable-multiple-hits="false">"#,
        escape_xml(key)
    ));
    out.push_str(&format!(
        "<unstructured_citation>{}</unstructured_citation>",
        escape_xml(text)
    ));
    out.push_str("</query></body></query_batch>");
    out
}

/// First non-empty `<doi>` element in a unixsd reply.
fn first_doi(xml: &str) -> Result<Option<String>, DbQueryError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut in_doi = false;
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"doi" => {
                in_doi = true;
                current.clear();
            }
            Ok(Event::Text(ref e)) if in_doi => {
                current.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"doi" => {
                in_doi = false;
                let doi = current.trim();
                if !doi.is_empty() {
                    return Ok(Some(doi.to_string()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DbQueryError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(None)
}

fn bibtex_type(crossref_type: &str) -> &'static str {
    match crossref_type {
        "journal-article" => "article",
        "book" | "monograph" | "edited-book" => "book",
        "book-chapter" | "book-section" => "incollection",
        "proceedings-article" => "inproceedings",
        "report" => "techreport",
        "dissertation" => "phdthesis",
        _ => "misc",
    }
}

/// Turn one item of a `/works` reply into a record.
fn record_from_work(item: &serde_json::Value, key: &str) -> BibRecord {
    let entry_type = bibtex_type(item["type"].as_str().unwrap_or(""));
    let mut record = BibRecord::new(entry_type, key);

    let authors: Vec<String> = item["author"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| {
                    let family = a["family"].as_str()?;
                    Some(match a["given"].as_str() {
                        Some(given) => format!("{}, {}", family, given),
                        None => family.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    if !authors.is_empty() {
        record.set("author", authors.join(" and "));
    }

    let first = |field: &str| {
        item[field]
            .as_array()
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    if let Some(title) = first("title") {
        record.set("title", title);
    }
    if let Some(container) = first("container-title") {
        let field = match entry_type {
            "article" => "journal",
            "inproceedings" | "incollection" => "booktitle",
            _ => "series",
        };
        record.set(field, container);
    }
    if let Some(volume) = item["volume"].as_str() {
        record.set("volume", volume);
    }
    if let Some(issue) = item["issue"].as_str() {
        record.set("number", issue);
    }
    if let Some(pages) = item["page"].as_str() {
        record.set("pages", pages.replace('-', "--"));
    }
    if let Some(year) = item["issued"]["date-parts"][0][0].as_i64() {
        record.set("year", year.to_string());
    }
    if let Some(publisher) = item["publisher"].as_str() {
        record.set("publisher", publisher);
    }
    if let Some(doi) = item["DOI"].as_str() {
        record.set("doi", doi);
    }
    record
}
