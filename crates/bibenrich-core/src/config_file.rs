use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Config, CrossrefCredentials, DepositorInfo, JournalInfo, SearchOrder};

/// Configuration problems. All of these abort a run before any output.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Crossref is in the search order but no Crossref email or username/password is configured")]
    MissingCrossrefCredentials,
    #[error("Crossref username and password must be given together")]
    IncompleteCrossrefAccount,
    #[error("unknown source '{0}' in search order (use a, m, z, c or arxiv, mathscinet, zbmath, crossref)")]
    InvalidSearchOrder(String),
}

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub crossref: Option<CrossrefConfig>,
    pub search: Option<SearchConfig>,
    pub journal: Option<JournalConfig>,
    pub depositor: Option<DepositorConfig>,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossrefConfig {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub order: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_rate_limit_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalConfig {
    pub full_title: Option<String>,
    pub abbrev_title: Option<String>,
    pub issn: Option<String>,
    pub eissn: Option<String>,
    pub coden: Option<String>,
    pub publisher: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositorConfig {
    pub name: Option<String>,
    pub email: Option<String>,
    pub registrant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub input_is_xml: Option<bool>,
    pub require_bibliography: Option<bool>,
}

/// Platform config directory path: `<config_dir>/bibenrich/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bibenrich").join("config.toml"))
}

/// Load config by cascading CWD `.bibenrich.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".bibenrich.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    match load_required(path) {
        Ok(config) => Some(config),
        Err(ConfigError::Read { .. }) => None,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            None
        }
    }
}

/// Load a config the user asked for explicitly; missing or malformed is an error.
pub fn load_required(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Take a field from `overlay` if set there, otherwise from `base`.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        crossref: Some(CrossrefConfig {
            email: pick(&overlay.crossref, &base.crossref, |c| c.email.clone()),
            username: pick(&overlay.crossref, &base.crossref, |c| c.username.clone()),
            password: pick(&overlay.crossref, &base.crossref, |c| c.password.clone()),
        }),
        search: Some(SearchConfig {
            order: pick(&overlay.search, &base.search, |s| s.order.clone()),
            timeout_secs: pick(&overlay.search, &base.search, |s| s.timeout_secs),
            max_rate_limit_retries: pick(&overlay.search, &base.search, |s| {
                s.max_rate_limit_retries
            }),
        }),
        journal: Some(JournalConfig {
            full_title: pick(&overlay.journal, &base.journal, |j| j.full_title.clone()),
            abbrev_title: pick(&overlay.journal, &base.journal, |j| j.abbrev_title.clone()),
            issn: pick(&overlay.journal, &base.journal, |j| j.issn.clone()),
            eissn: pick(&overlay.journal, &base.journal, |j| j.eissn.clone()),
            coden: pick(&overlay.journal, &base.journal, |j| j.coden.clone()),
            publisher: pick(&overlay.journal, &base.journal, |j| j.publisher.clone()),
        }),
        depositor: Some(DepositorConfig {
            name: pick(&overlay.depositor, &base.depositor, |d| d.name.clone()),
            email: pick(&overlay.depositor, &base.depositor, |d| d.email.clone()),
            registrant: pick(&overlay.depositor, &base.depositor, |d| d.registrant.clone()),
        }),
        output: Some(OutputConfig {
            input_is_xml: pick(&overlay.output, &base.output, |o| o.input_is_xml),
            require_bibliography: pick(&overlay.output, &base.output, |o| {
                o.require_bibliography
            }),
        }),
    }
}

/// Decide which Crossref access mode the given values select.
///
/// A username/password pair wins over an email, which is then kept as the
/// account's contact address; half a pair is an error.
pub fn crossref_credentials(
    email: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Result<Option<CrossrefCredentials>, ConfigError> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    match (non_empty(username), non_empty(password)) {
        (Some(username), Some(password)) => Ok(Some(CrossrefCredentials::Account {
            username,
            password,
            email: non_empty(email),
        })),
        (None, None) => Ok(non_empty(email).map(CrossrefCredentials::Email)),
        _ => Err(ConfigError::IncompleteCrossrefAccount),
    }
}

impl ConfigFile {
    /// Resolve against built-in defaults.
    pub fn to_config(&self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let crossref = self.crossref.clone().unwrap_or_default();
        let search = self.search.clone().unwrap_or_default();
        let journal = self.journal.clone().unwrap_or_default();
        let depositor = self.depositor.clone().unwrap_or_default();
        let output = self.output.clone().unwrap_or_default();

        let search_order = match search.order.as_deref() {
            Some(order) => order.parse::<SearchOrder>()?,
            None => defaults.search_order,
        };

        Ok(Config {
            search_order,
            crossref: crossref_credentials(crossref.email, crossref.username, crossref.password)?,
            timeout_secs: search.timeout_secs.unwrap_or(defaults.timeout_secs),
            max_rate_limit_retries: search
                .max_rate_limit_retries
                .unwrap_or(defaults.max_rate_limit_retries),
            journal: JournalInfo {
                full_title: journal.full_title.unwrap_or_default(),
                abbrev_title: journal.abbrev_title,
                issn: journal.issn,
                eissn: journal.eissn,
                coden: journal.coden,
                publisher: journal.publisher,
            },
            depositor: DepositorInfo {
                name: depositor.name.unwrap_or_default(),
                email: depositor.email.unwrap_or_default(),
                registrant: depositor.registrant.unwrap_or_default(),
            },
            input_is_xml: output.input_is_xml.unwrap_or(defaults.input_is_xml),
            require_bibliography: output
                .require_bibliography
                .unwrap_or(defaults.require_bibliography),
            endpoints: defaults.endpoints,
        })
    }
}
