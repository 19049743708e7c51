//! Mock database backend for testing.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{DatabaseBackend, DbQueryError, QueryFuture, ResolverQuery};
use crate::{BibRecord, Source};

/// A configurable mock response for [`MockDb`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Simulate a successful match.
    Found(BibRecord),
    /// Simulate "not found in this database".
    NotFound,
    /// Simulate a 429 rate-limit response.
    RateLimited { retry_after: Option<Duration> },
    /// Simulate a generic error.
    Error(String),
}

/// A hand-rolled mock implementing [`DatabaseBackend`] for tests.
///
/// Supports:
/// - A fixed response (used for every call), **or**
/// - A sequence of responses (one per call, repeating the last if exhausted).
/// - Optional per-call latency.
/// - Call counting via [`call_count()`](MockDb::call_count) and the query
///   texts it was handed via [`queries()`](MockDb::queries).
pub struct MockDb {
    source: Source,
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockDb {
    /// Create a mock that always returns `response`.
    pub fn new(source: Source, response: MockResponse) -> Self {
        Self {
            source,
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that returns responses in order, repeating the last one.
    pub fn with_sequence(source: Source, mut responses: Vec<MockResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        // Reverse so we can pop() from the front cheaply.
        responses.reverse();
        let fallback = responses[0].clone();
        Self {
            responses: Mutex::new(responses),
            ..Self::new(source, fallback)
        }
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `query()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Query texts received, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> MockResponse {
        match self.responses.lock() {
            Ok(mut seq) => seq.pop().unwrap_or_else(|| self.fallback.clone()),
            Err(_) => self.fallback.clone(),
        }
    }
}

impl DatabaseBackend for MockDb {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn source(&self) -> Source {
        self.source
    }

    fn query<'a>(
        &'a self,
        query: ResolverQuery<'a>,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> QueryFuture<'a> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.queries.lock() {
            seen.push(query.text.to_string());
        }
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockResponse::Found(record) => Ok(Some(record)),
                MockResponse::NotFound => Ok(None),
                MockResponse::RateLimited { retry_after } => {
                    Err(DbQueryError::RateLimited { retry_after })
                }
                MockResponse::Error(msg) => Err(DbQueryError::Other(msg)),
            }
        })
    }
}
