//! Database backend trait and the resolvers for each reference database.

pub mod arxiv;
pub mod crossref;
pub mod mathscinet;
pub mod mock;
pub mod zbmath;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::{BibRecord, Config, CrossrefCredentials, ExtractedFields, Source};

/// What a resolver gets to work with for one citation.
#[derive(Debug, Clone, Copy)]
pub struct ResolverQuery<'a> {
    /// Citation key; stamped onto the returned record by the orchestrator.
    pub key: &'a str,
    /// Normalized free text with identifier annotations removed.
    pub text: &'a str,
    pub fields: &'a ExtractedFields,
}

/// Error from a single database query.
///
/// None of these are fatal for a run: the orchestrator retries
/// `RateLimited` and treats everything else as "not found".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbQueryError {
    #[error("rate limited (429){}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {0}")]
    Http(u16),
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("{0}")]
    Other(String),
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

impl From<reqwest::Error> for DbQueryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DbQueryError::Timeout
        } else {
            DbQueryError::Other(e.to_string())
        }
    }
}

pub type QueryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<BibRecord>, DbQueryError>> + Send + 'a>>;

/// A reference database that can turn a citation into a structured record.
pub trait DatabaseBackend: Send + Sync {
    /// The canonical name of this database (e.g., "Crossref", "arXiv").
    fn name(&self) -> &str;

    fn source(&self) -> Source;

    /// Look the citation up. `Ok(None)` means the database had no match.
    fn query<'a>(
        &'a self,
        query: ResolverQuery<'a>,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> QueryFuture<'a>;
}

/// A shared backend, so callers can keep a handle on it (tests inspect
/// mocks this way).
impl<T: DatabaseBackend + ?Sized> DatabaseBackend for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn source(&self) -> Source {
        (**self).source()
    }

    fn query<'a>(
        &'a self,
        query: ResolverQuery<'a>,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> QueryFuture<'a> {
        (**self).query(query, client, timeout)
    }
}

/// Build the resolver for `source` from the run configuration.
///
/// Returns `None` for Crossref when no credentials are configured.
pub fn backend_for(source: Source, config: &Config) -> Option<Box<dyn DatabaseBackend>> {
    let endpoints = &config.endpoints;
    let backend: Box<dyn DatabaseBackend> = match source {
        Source::Arxiv => Box::new(arxiv::Arxiv {
            base_url: endpoints.arxiv.clone(),
        }),
        Source::MathSciNet => Box::new(mathscinet::MathSciNet {
            base_url: endpoints.mathscinet.clone(),
        }),
        Source::ZbMath => Box::new(zbmath::ZbMath {
            base_url: endpoints.zbmath.clone(),
        }),
        Source::Crossref => Box::new(crossref::CrossRef {
            credentials: with_contact_email(config.crossref.clone()?, &config.depositor.email),
            api_base: endpoints.crossref_api.clone(),
            query_base: endpoints.crossref_query.clone(),
        }),
    };
    Some(backend)
}

/// Fill a member account's missing contact address from the depositor's.
fn with_contact_email(credentials: CrossrefCredentials, fallback: &str) -> CrossrefCredentials {
    match credentials {
        CrossrefCredentials::Account {
            username,
            password,
            email: None,
        } if !fallback.trim().is_empty() => CrossrefCredentials::Account {
            username,
            password,
            email: Some(fallback.trim().to_string()),
        },
        other => other,
    }
}

/// `User-Agent` sent with every request.
pub(crate) fn user_agent(mailto: Option<&str>) -> String {
    match mailto {
        Some(email) => format!(
            "bibenrich/{} (mailto:{})",
            env!("CARGO_PKG_VERSION"),
            email
        ),
        None => format!("bibenrich/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Map a non-success status to an error, extracting `Retry-After` on 429.
pub(crate) fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DbQueryError> {
    let status = resp.status();
    if status.as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        return Err(DbQueryError::RateLimited { retry_after });
    }
    if !status.is_success() {
        return Err(DbQueryError::Http(status.as_u16()));
    }
    Ok(resp)
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date form: fall back to a fixed wait
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_error_display() {
        let e = DbQueryError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(e.to_string(), "rate limited (429), retry after 2.0s");
        assert_eq!(
            DbQueryError::RateLimited { retry_after: None }.to_string(),
            "rate limited (429)"
        );
        assert_eq!(DbQueryError::Http(503).to_string(), "HTTP 503");
    }

    #[test]
    fn test_backend_for_each_source() {
        let config = Config {
            crossref: Some(CrossrefCredentials::Email("me@example.org".into())),
            ..Config::default()
        };
        for source in Source::ALL {
            let backend = backend_for(source, &config).unwrap();
            assert_eq!(backend.source(), source);
            assert_eq!(backend.name(), source.name());
        }
    }

    #[test]
    fn test_crossref_backend_needs_credentials() {
        assert!(backend_for(Source::Crossref, &Config::default()).is_none());
        assert!(backend_for(Source::ZbMath, &Config::default()).is_some());
    }

    #[test]
    fn test_account_contact_email_falls_back_to_depositor() {
        let account = |email: Option<&str>| CrossrefCredentials::Account {
            username: "member".into(),
            password: "secret".into(),
            email: email.map(String::from),
        };
        assert_eq!(
            with_contact_email(account(None), "deposit@journal.org"),
            account(Some("deposit@journal.org"))
        );
        assert_eq!(
            with_contact_email(account(Some("editor@journal.org")), "deposit@journal.org"),
            account(Some("editor@journal.org"))
        );
        assert_eq!(with_contact_email(account(None), " "), account(None));
    }

    #[test]
    fn test_user_agent() {
        assert!(user_agent(Some("a@b.org")).ends_with("(mailto:a@b.org)"));
        assert!(user_agent(None).starts_with("bibenrich/"));
    }
}
