use super::{DatabaseBackend, DbQueryError, QueryFuture, ResolverQuery, check_status, user_agent};
use crate::matching::title_in_citation;
use crate::{BibRecord, Source};
use std::time::Duration;

/// zbMATH Open citation matcher.
pub struct ZbMath {
    pub base_url: String,
}

impl Default for ZbMath {
    fn default() -> Self {
        Self {
            base_url: "https://zbmath.org".to_string(),
        }
    }
}

impl DatabaseBackend for ZbMath {
    fn name(&self) -> &str {
        "zbMATH"
    }

    fn source(&self) -> Source {
        Source::ZbMath
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

impl ZbMath {
    async fn lookup(
        &self,
        query: ResolverQuery<'_>,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Option<BibRecord>, DbQueryError> {
        let url = format!(
            "{}/citationmatching/match?q={}&n=1&m=5",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query.text)
        );

        let resp = client
            .get(&url)
            .header("User-Agent", user_agent(None))
            .timeout(timeout)
            .send()
            .await?;
        let data: serde_json::Value = check_status(resp)?
            .json()
            .await
            .map_err(|e| DbQueryError::Parse(e.to_string()))?;

        Ok(parse_match_response(&data, query.text, query.key))
    }
}

/// Pick the first result that carries a Zbl id and whose title occurs in
/// the citation text.
fn parse_match_response(data: &serde_json::Value, citation: &str, key: &str) -> Option<BibRecord> {
    let results = data["results"].as_array()?;

    for item in results {
        let Some(zbl) = item["zbl_id"].as_str().filter(|z| !z.is_empty()) else {
            continue;
        };
        let title = item["title"].as_str().unwrap_or("");
        if !title.is_empty() && !title_in_citation(title, citation) {
            tracing::debug!(zbl, title, "zbMATH candidate title not in citation");
            continue;
        }

        let authors = match &item["authors"] {
            serde_json::Value::Array(list) => list
                .iter()
                .filter_map(|a| a.as_str())
                .collect::<Vec<_>>()
                .join(" and "),
            serde_json::Value::String(s) => s.replace("; ", " and "),
            _ => String::new(),
        };

        let mut record = BibRecord::new("article", key);
        if !authors.is_empty() {
            record.set("author", authors);
        }
        if !title.is_empty() {
            record.set("title", title);
        }
        if let Some(source) = item["source"].as_str() {
            record.set("journal", source);
        }
        match &item["year"] {
            serde_json::Value::String(y) => record.set("year", y.as_str()),
            serde_json::Value::Number(y) => record.set("year", y.to_string()),
            _ => {}
        }
        record.set("zbl", zbl);
        return Some(record);
    }
    None
}
