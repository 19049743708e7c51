use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::db::{DatabaseBackend, DbQueryError, ResolverQuery, backend_for};
use crate::{BibRecord, CitationRecord, Config, CoreError, ExtractedFields, ResolvedRecord, Source};

/// Upper bound on a single rate-limit wait.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Outcome of asking one database about one citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbStatus {
    Match,
    NoMatch,
    /// Still rate limited after all retries.
    RateLimited,
    Error,
}

/// Counts gathered over a whole [`Orchestrator::resolve_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub total: usize,
    pub resolved: usize,
    pub by_source: BTreeMap<Source, usize>,
    /// Queries that failed (network, parse, rate limit) and were treated
    /// as "not found".
    pub failed_queries: usize,
}

impl ResolutionSummary {
    pub fn unresolved(&self) -> usize {
        self.total - self.resolved
    }
}

/// Drives the configured databases in search order, one citation at a
/// time, stopping at the first database that returns a record.
pub struct Orchestrator {
    backends: Vec<Box<dyn DatabaseBackend>>,
    client: reqwest::Client,
    timeout: Duration,
    max_rate_limit_retries: u32,
}

impl Orchestrator {
    /// Build the resolvers for `config.search_order`.
    ///
    /// Fails before any lookup if Crossref is requested without credentials.
    pub fn new(config: &Config) -> Result<Self, CoreError> {
        config.validate()?;
        let backends = config
            .search_order
            .sources()
            .iter()
            .filter_map(|source| backend_for(*source, config))
            .collect();
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_backends(backends, client, config))
    }

    /// Use explicit backends, in the given order.
    pub fn with_backends(
        backends: Vec<Box<dyn DatabaseBackend>>,
        client: reqwest::Client,
        config: &Config,
    ) -> Self {
        Self {
            backends,
            client,
            timeout: config.timeout(),
            max_rate_limit_retries: config.max_rate_limit_retries,
        }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Resolve one citation. The returned record carries `resolved` if any
    /// database matched; no database after the first match is consulted.
    pub async fn resolve(&self, record: CitationRecord) -> CitationRecord {
        self.resolve_inner(record, &mut |_, _| {}).await
    }

    async fn resolve_inner(
        &self,
        mut record: CitationRecord,
        on_db_complete: &mut (dyn FnMut(Source, DbStatus) + Send),
    ) -> CitationRecord {
        if record.is_resolved() {
            return record;
        }
        if record.normalized_text.is_empty() && record.extracted.is_empty() {
            tracing::debug!(key = %record.key, "nothing to query");
            return record;
        }

        for backend in &self.backends {
            let query = ResolverQuery {
                key: &record.key,
                text: &record.normalized_text,
                fields: &record.extracted,
            };
            let start = Instant::now();
            let result = self.query_with_retry(backend.as_ref(), query).await;
            let elapsed = start.elapsed();

            match result {
                Ok(Some(mut hit)) => {
                    tracing::info!(
                        key = %record.key,
                        db = backend.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "resolved"
                    );
                    on_db_complete(backend.source(), DbStatus::Match);
                    hit.key = record.key.clone();
                    merge_extracted(&mut hit, &record.extracted);
                    record.resolved = Some(ResolvedRecord {
                        source: backend.source(),
                        record: hit,
                    });
                    return record;
                }
                Ok(None) => {
                    tracing::debug!(key = %record.key, db = backend.name(), "no match, falling through");
                    on_db_complete(backend.source(), DbStatus::NoMatch);
                }
                Err(e) => {
                    tracing::warn!(key = %record.key, db = backend.name(), error = %e, "query failed");
                    let status = match e {
                        DbQueryError::RateLimited { .. } => DbStatus::RateLimited,
                        _ => DbStatus::Error,
                    };
                    on_db_complete(backend.source(), status);
                }
            }
        }

        record
    }

    /// Resolve citations strictly one after another.
    ///
    /// `on_progress` is called after each citation with its final state.
    pub async fn resolve_all(
        &self,
        records: Vec<CitationRecord>,
        mut on_progress: impl FnMut(&CitationRecord) + Send,
    ) -> (Vec<CitationRecord>, ResolutionSummary) {
        let mut summary = ResolutionSummary {
            total: records.len(),
            ..ResolutionSummary::default()
        };
        let mut out = Vec::with_capacity(records.len());

        for record in records {
            let mut failed = 0;
            let record = self
                .resolve_inner(record, &mut |_, status| {
                    if matches!(status, DbStatus::Error | DbStatus::RateLimited) {
                        failed += 1;
                    }
                })
                .await;
            summary.failed_queries += failed;
            if let Some(resolved) = &record.resolved {
                summary.resolved += 1;
                *summary.by_source.entry(resolved.source).or_default() += 1;
            }
            on_progress(&record);
            out.push(record);
        }

        (out, summary)
    }

    /// Query one backend, retrying on 429 with exponential backoff
    /// (honouring `Retry-After` when given). A call that outlives the
    /// configured timeout counts as [`DbQueryError::Timeout`].
    async fn query_with_retry(
        &self,
        backend: &dyn DatabaseBackend,
        query: ResolverQuery<'_>,
    ) -> Result<Option<BibRecord>, DbQueryError> {
        let mut attempt = 0;
        loop {
            let call = backend.query(query, &self.client, self.timeout);
            let result = tokio::time::timeout(self.timeout, call)
                .await
                .unwrap_or(Err(DbQueryError::Timeout));
            match result {
                Err(DbQueryError::RateLimited { retry_after }) if attempt < self.max_rate_limit_retries => {
                    let wait = retry_after
                        .unwrap_or_else(|| {
                            Duration::from_secs(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
                        })
                        .min(MAX_BACKOFF);
                    tracing::debug!(
                        db = backend.name(),
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Copy author-supplied identifiers the database did not return into the
/// record, then zero-pad `mrnumber`.
pub fn merge_extracted(record: &mut BibRecord, fields: &ExtractedFields) {
    if let Some(doi) = &fields.doi {
        if !record.has("doi") {
            record.set("doi", doi.as_str());
        }
    }
    if let Some(mr) = &fields.mr_number {
        if !record.has("mrnumber") {
            record.set("mrnumber", mr.as_str());
        }
    }
    if let Some(zbl) = &fields.zbl_id {
        if !record.has("zbl") {
            record.set("zbl", zbl.as_str());
        }
    }
    if let Some(arxiv) = &fields.arxiv_id {
        if !record.has("eprint") {
            record.set("eprint", arxiv.as_str());
            record.set("archiveprefix", "arXiv");
        }
    }
    record.pad_mr_number();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::{MockDb, MockResponse};
    use std::sync::Arc;

    fn orchestrator(mocks: &[Arc<MockDb>]) -> Orchestrator {
        let backends = mocks
            .iter()
            .map(|m| Box::new(Arc::clone(m)) as Box<dyn DatabaseBackend>)
            .collect();
        Orchestrator::with_backends(backends, reqwest::Client::new(), &Config::default())
    }

    fn citation() -> CitationRecord {
        CitationRecord::new("foo", vec!["Some Author, A title, 2001.".to_string()])
    }

    fn found(entry_type: &str) -> MockResponse {
        MockResponse::Found(BibRecord::new(entry_type, "remote-key").with("title", "A title"))
    }

    #[tokio::test]
    async fn test_first_match_stops_search() {
        let a = Arc::new(MockDb::new(Source::MathSciNet, found("article")));
        let b = Arc::new(MockDb::new(Source::ZbMath, found("book")));
        let orch = orchestrator(&[a.clone(), b.clone()]);

        let record = orch.resolve(citation()).await;
        let resolved = record.resolved.unwrap();
        assert_eq!(resolved.source, Source::MathSciNet);
        assert_eq!(resolved.record.key, "foo");
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_through_not_found_and_errors() {
        let a = Arc::new(MockDb::new(Source::MathSciNet, MockResponse::NotFound));
        let b = Arc::new(MockDb::new(
            Source::ZbMath,
            MockResponse::Error("connection reset".into()),
        ));
        let c = Arc::new(MockDb::new(Source::Crossref, found("article")));
        let orch = orchestrator(&[a.clone(), b.clone(), c.clone()]);

        let record = orch.resolve(citation()).await;
        assert_eq!(record.resolved.unwrap().source, Source::Crossref);
        assert_eq!(a.queries(), ["Some Author, A title, 2001."]);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test]
    async fn test_all_sources_exhausted() {
        let a = Arc::new(MockDb::new(Source::MathSciNet, MockResponse::NotFound));
        let orch = orchestrator(&[a.clone()]);
        let record = orch.resolve(citation()).await;
        assert!(record.resolved.is_none());
        assert_eq!(record.raw_text(), ["Some Author, A title, 2001."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out_and_falls_through() {
        let a = Arc::new(
            MockDb::new(Source::MathSciNet, found("article")).with_delay(Duration::from_secs(60)),
        );
        let b = Arc::new(MockDb::new(Source::ZbMath, found("book")));
        let config = Config {
            timeout_secs: 1,
            ..Config::default()
        };
        let orch = Orchestrator::with_backends(
            vec![
                Box::new(Arc::clone(&a)) as Box<dyn DatabaseBackend>,
                Box::new(Arc::clone(&b)) as Box<dyn DatabaseBackend>,
            ],
            reqwest::Client::new(),
            &config,
        );

        let (records, summary) = orch.resolve_all(vec![citation()], |_| {}).await;
        let resolved = records[0].resolved.as_ref().unwrap();
        assert_eq!(resolved.source, Source::ZbMath);
        assert_eq!(resolved.record.entry_type, "book");
        assert_eq!(a.call_count(), 1);
        assert_eq!(summary.failed_queries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_rate_limit_retries_do_not_overflow_backoff() {
        let mut responses = vec![MockResponse::RateLimited { retry_after: None }; 66];
        responses.push(found("article"));
        let a = Arc::new(MockDb::with_sequence(Source::Crossref, responses));
        let config = Config {
            max_rate_limit_retries: 70,
            ..Config::default()
        };
        let orch = Orchestrator::with_backends(
            vec![Box::new(Arc::clone(&a)) as Box<dyn DatabaseBackend>],
            reqwest::Client::new(),
            &config,
        );

        let record = orch.resolve(citation()).await;
        assert!(record.is_resolved());
        assert_eq!(a.call_count(), 67);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried() {
        let a = Arc::new(MockDb::with_sequence(
            Source::ZbMath,
            vec![
                MockResponse::RateLimited {
                    retry_after: Some(Duration::from_secs(3)),
                },
                found("article"),
            ],
        ));
        let orch = orchestrator(&[a.clone()]);
        let record = orch.resolve(citation()).await;
        assert!(record.is_resolved());
        assert_eq!(a.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gives_up_after_retries() {
        let a = Arc::new(MockDb::new(
            Source::ZbMath,
            MockResponse::RateLimited { retry_after: None },
        ));
        let b = Arc::new(MockDb::new(Source::Crossref, MockResponse::NotFound));
        let orch = orchestrator(&[a.clone(), b.clone()]);
        let (records, summary) = orch.resolve_all(vec![citation()], |_| {}).await;
        assert!(!records[0].is_resolved());
        // one try plus the default two retries
        assert_eq!(a.call_count(), 3);
        assert_eq!(b.call_count(), 1);
        assert_eq!(summary.failed_queries, 1);
    }

    #[tokio::test]
    async fn test_resolve_all_summary_and_progress() {
        let a = Arc::new(MockDb::with_sequence(
            Source::MathSciNet,
            vec![found("article"), MockResponse::NotFound],
        ));
        let b = Arc::new(MockDb::new(Source::Arxiv, MockResponse::NotFound));
        let orch = orchestrator(&[a.clone(), b.clone()]);

        let records = vec![
            citation(),
            CitationRecord::new("bar", vec!["Other text".to_string()]),
        ];
        let mut seen = Vec::new();
        let (out, summary) = orch
            .resolve_all(records, |r| seen.push(r.key.clone()))
            .await;

        assert_eq!(seen, ["foo", "bar"]);
        assert_eq!(out.len(), 2);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.unresolved(), 1);
        assert_eq!(summary.by_source.get(&Source::MathSciNet), Some(&1));
        // second citation only: first one stopped at MathSciNet
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test]
    async fn test_merges_extracted_identifiers() {
        let a = Arc::new(MockDb::new(Source::Arxiv, found("misc")));
        let orch = orchestrator(&[a]);
        let mut record = citation();
        record.extracted.mr_number = Some("123".into());
        record.extracted.doi = Some("10.1/x".into());

        let record = orch.resolve(record).await;
        let resolved = record.resolved.unwrap().record;
        assert_eq!(resolved.get("mrnumber"), Some("0000123"));
        assert_eq!(resolved.get("doi"), Some("10.1/x"));
    }

    #[test]
    fn test_merge_keeps_database_values() {
        let mut record = BibRecord::new("article", "k").with("doi", "10.9/remote");
        let fields = ExtractedFields {
            doi: Some("10.1/local".into()),
            arxiv_id: Some("2101.00001".into()),
            ..ExtractedFields::default()
        };
        merge_extracted(&mut record, &fields);
        assert_eq!(record.get("doi"), Some("10.9/remote"));
        assert_eq!(record.get("eprint"), Some("2101.00001"));
        assert_eq!(record.get("archiveprefix"), Some("arXiv"));
    }

    #[test]
    fn test_new_requires_crossref_credentials() {
        let config = Config {
            search_order: "mc".parse().unwrap(),
            ..Config::default()
        };
        assert!(matches!(
            Orchestrator::new(&config),
            Err(CoreError::Config(crate::ConfigError::MissingCrossrefCredentials))
        ));
    }

    #[test]
    fn test_new_builds_backends_in_order() {
        let config = Config {
            search_order: "zam".parse().unwrap(),
            ..Config::default()
        };
        let orch = Orchestrator::new(&config).unwrap();
        assert_eq!(orch.backend_names(), ["zbMATH", "arXiv", "MathSciNet"]);
    }
}
