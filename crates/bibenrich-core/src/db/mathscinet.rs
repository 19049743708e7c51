use super::{DatabaseBackend, DbQueryError, QueryFuture, ResolverQuery, check_status, user_agent};
use crate::{BibRecord, Source};
use std::time::Duration;

/// MathSciNet's free reference-matching service (MRef).
pub struct MathSciNet {
    pub base_url: String,
}

impl Default for MathSciNet {
    fn default() -> Self {
        Self {
            base_url: "https://mathscinet.ams.org".to_string(),
        }
    }
}

impl DatabaseBackend for MathSciNet {
    fn name(&self) -> &str {
        "MathSciNet"
    }

    fn source(&self) -> Source {
        Source::MathSciNet
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

impl MathSciNet {
    async fn lookup(
        &self,
        query: ResolverQuery<'_>,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Option<BibRecord>, DbQueryError> {
        let url = format!(
            "{}/mathscinet-mref?ref={}&dataType=bibtex",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query.text)
        );

        let resp = client
            .get(&url)
            .header("User-Agent", user_agent(None))
            .timeout(timeout)
            .send()
            .await?;
        let body = check_status(resp)?.text().await?;

        Ok(parse_mref_response(&body, query.key))
    }
}

/// Pull the first BibTeX entry out of an MRef reply.
///
/// The entry sits inside a `<pre>` block with HTML entities; plain-text
/// replies are accepted too. The entry is re-keyed to `key` and its
/// `mrnumber` padded.
fn parse_mref_response(body: &str, key: &str) -> Option<BibRecord> {
    let document = scraper::Html::parse_document(body);
    let pre_sel = scraper::Selector::parse("pre").unwrap();
    let mut record = document
        .select(&pre_sel)
        .map(|pre| pre.text().collect::<String>())
        .find_map(|text| BibRecord::parse_first(&text))
        .or_else(|| BibRecord::parse_first(body))?;

    record.key = key.to_string();
    record.pad_mr_number();
    Some(record)
}
