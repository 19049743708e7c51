use std::time::Duration;

use thiserror::Error;

pub mod config_file;
pub mod db;
pub mod inject;
pub mod matching;
pub mod normalize;
pub mod orchestrator;
pub mod record;
pub mod source;

// Re-export for convenience
pub use config_file::ConfigError;
pub use db::{DatabaseBackend, DbQueryError, ResolverQuery};
pub use inject::{InjectionSummary, inject_identifiers};
pub use normalize::{escape_xml, normalize};
pub use orchestrator::{Orchestrator, ResolutionSummary};
pub use record::{BibFile, BibItem, BibRecord, pad_mr_number};
pub use source::{SearchOrder, Source};

/// The kinds of persistent identifier an author can annotate a citation with.
///
/// The order of [`IdentifierKind::ALL`] is the order annotations are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Arxiv,
    Mr,
    Zbl,
    Doi,
}

impl IdentifierKind {
    pub const ALL: [IdentifierKind; 4] = [
        IdentifierKind::Arxiv,
        IdentifierKind::Mr,
        IdentifierKind::Zbl,
        IdentifierKind::Doi,
    ];

    /// Name of the annotation command, matched case-insensitively (`\mr{...}`, `\MR{...}`).
    pub fn annotation(&self) -> &'static str {
        match self {
            IdentifierKind::Arxiv => "arxiv",
            IdentifierKind::Mr => "mr",
            IdentifierKind::Zbl => "zbl",
            IdentifierKind::Doi => "doi",
        }
    }

    /// Field name used for this identifier in a [`BibRecord`].
    pub fn bib_field(&self) -> &'static str {
        match self {
            IdentifierKind::Arxiv => "eprint",
            IdentifierKind::Mr => "mrnumber",
            IdentifierKind::Zbl => "zbl",
            IdentifierKind::Doi => "doi",
        }
    }
}

/// Identifiers an author supplied inline in a citation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub arxiv_id: Option<String>,
    pub mr_number: Option<String>,
    pub zbl_id: Option<String>,
    pub doi: Option<String>,
}

impl ExtractedFields {
    pub fn get(&self, kind: IdentifierKind) -> Option<&str> {
        match kind {
            IdentifierKind::Arxiv => self.arxiv_id.as_deref(),
            IdentifierKind::Mr => self.mr_number.as_deref(),
            IdentifierKind::Zbl => self.zbl_id.as_deref(),
            IdentifierKind::Doi => self.doi.as_deref(),
        }
    }

    pub fn set(&mut self, kind: IdentifierKind, value: String) {
        let slot = match kind {
            IdentifierKind::Arxiv => &mut self.arxiv_id,
            IdentifierKind::Mr => &mut self.mr_number,
            IdentifierKind::Zbl => &mut self.zbl_id,
            IdentifierKind::Doi => &mut self.doi,
        };
        *slot = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        IdentifierKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

/// A structured record returned by one of the databases, tagged with the
/// database that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
    pub source: Source,
    pub record: BibRecord,
}

/// One entry of a bibliography listing.
///
/// `raw_text` holds the verbatim source lines and is fixed at construction;
/// everything else is derived from it by the extraction and resolution steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationRecord {
    pub key: String,
    raw_text: Vec<String>,
    pub normalized_text: String,
    pub extracted: ExtractedFields,
    pub resolved: Option<ResolvedRecord>,
}

impl CitationRecord {
    pub fn new(key: impl Into<String>, raw_text: Vec<String>) -> Self {
        let normalized_text = normalize(&raw_text.join(" "));
        Self {
            key: key.into(),
            raw_text,
            normalized_text,
            extracted: ExtractedFields::default(),
            resolved: None,
        }
    }

    /// The original source lines, in order.
    pub fn raw_text(&self) -> &[String] {
        &self.raw_text
    }

    /// The original source lines joined into a single line.
    pub fn joined_raw_text(&self) -> String {
        self.raw_text.join(" ")
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Credentials for Crossref lookups.
#[derive(Clone, PartialEq, Eq)]
pub enum CrossrefCredentials {
    /// Free-tier (polite pool) access identified by an email address.
    Email(String),
    /// Member account access to the query servlet. `email` is the contact
    /// address written into each query batch.
    Account {
        username: String,
        password: String,
        email: Option<String>,
    },
}

impl std::fmt::Debug for CrossrefCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrossrefCredentials::Email(email) => f.debug_tuple("Email").field(email).finish(),
            CrossrefCredentials::Account {
                username, email, ..
            } => f
                .debug_struct("Account")
                .field("username", username)
                .field("password", &"***")
                .field("email", email)
                .finish(),
        }
    }
}

/// Bibliographic identity of the journal being deposited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalInfo {
    pub full_title: String,
    pub abbrev_title: Option<String>,
    pub issn: Option<String>,
    pub eissn: Option<String>,
    pub coden: Option<String>,
    pub publisher: Option<String>,
}

/// Who submits a deposit batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositorInfo {
    pub name: String,
    pub email: String,
    pub registrant: String,
}

/// Base URLs of the external services. Overridden in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub mathscinet: String,
    pub zbmath: String,
    pub crossref_api: String,
    pub crossref_query: String,
    pub arxiv: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            mathscinet: "https://mathscinet.ams.org".to_string(),
            zbmath: "https://zbmath.org".to_string(),
            crossref_api: "https://api.crossref.org".to_string(),
            crossref_query: "https://doi.crossref.org".to_string(),
            arxiv: "http://export.arxiv.org".to_string(),
        }
    }
}

/// Resolved run configuration. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub search_order: SearchOrder,
    pub crossref: Option<CrossrefCredentials>,
    pub timeout_secs: u64,
    pub max_rate_limit_retries: u32,
    pub journal: JournalInfo,
    pub depositor: DepositorInfo,
    /// Input text is already XML-escaped; ampersands are passed through.
    pub input_is_xml: bool,
    /// Treat a document without a bibliography listing as a fatal error.
    pub require_bibliography: bool,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_order: SearchOrder::default(),
            crossref: None,
            timeout_secs: 10,
            max_rate_limit_retries: 2,
            journal: JournalInfo::default(),
            depositor: DepositorInfo::default(),
            input_is_xml: false,
            require_bibliography: false,
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check preconditions that must hold before any lookup starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_order.contains(Source::Crossref) && self.crossref.is_none() {
            return Err(ConfigError::MissingCrossrefCredentials);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_normalizes_raw_text() {
        let record = CitationRecord::new(
            "knuth",
            vec!["D.~E. Knuth,".to_string(), "\\emph{The Art}".to_string()],
        );
        assert_eq!(record.normalized_text, "D. E. Knuth, The Art");
        assert_eq!(record.raw_text().len(), 2);
        assert!(!record.is_resolved());
    }

    #[test]
    fn extracted_fields_get_set() {
        let mut fields = ExtractedFields::default();
        assert!(fields.is_empty());
        fields.set(IdentifierKind::Mr, "1234567".into());
        assert_eq!(fields.get(IdentifierKind::Mr), Some("1234567"));
        assert_eq!(fields.mr_number.as_deref(), Some("1234567"));
        assert!(!fields.is_empty());
    }

    #[test]
    fn crossref_in_order_requires_credentials() {
        let config = Config {
            search_order: "mc".parse().unwrap(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCrossrefCredentials)
        ));

        let config = Config {
            crossref: Some(CrossrefCredentials::Email("a@b.org".into())),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn order_without_crossref_needs_no_credentials() {
        let config = Config {
            search_order: "mz".parse().unwrap(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = CrossrefCredentials::Account {
            username: "user".into(),
            password: "hunter2".into(),
            email: Some("user@example.org".into()),
        };
        let shown = format!("{:?}", creds);
        assert!(shown.contains("user"));
        assert!(!shown.contains("hunter2"));
    }
}
