use std::fmt;
use std::str::FromStr;

use crate::config_file::ConfigError;

/// An external reference database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Arxiv,
    MathSciNet,
    ZbMath,
    Crossref,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Arxiv,
        Source::MathSciNet,
        Source::ZbMath,
        Source::Crossref,
    ];

    /// Single-letter code used in compact search orders such as `"mzc"`.
    pub fn letter(&self) -> char {
        match self {
            Source::Arxiv => 'a',
            Source::MathSciNet => 'm',
            Source::ZbMath => 'z',
            Source::Crossref => 'c',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Source::Arxiv => "arXiv",
            Source::MathSciNet => "MathSciNet",
            Source::ZbMath => "zbMATH",
            Source::Crossref => "Crossref",
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.letter() == c.to_ascii_lowercase())
    }

    fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        match lower.as_str() {
            "arxiv" => Some(Source::Arxiv),
            "mathscinet" | "mr" => Some(Source::MathSciNet),
            "zbmath" | "zbl" => Some(Source::ZbMath),
            "crossref" | "doi" => Some(Source::Crossref),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The ordered sequence of sources consulted for each citation.
///
/// Each source appears at most once; parsing drops later duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOrder(Vec<Source>);

impl SearchOrder {
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Self {
        let mut seen = Vec::new();
        for source in sources {
            if !seen.contains(&source) {
                seen.push(source);
            }
        }
        Self(seen)
    }

    pub fn sources(&self) -> &[Source] {
        &self.0
    }

    pub fn contains(&self, source: Source) -> bool {
        self.0.contains(&source)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SearchOrder {
    fn default() -> Self {
        Self(vec![Source::MathSciNet, Source::ZbMath, Source::Crossref])
    }
}

impl FromStr for SearchOrder {
    type Err = ConfigError;

    /// Accepts a compact letter string (`"mzc"`) or a comma separated list
    /// of names (`"arxiv, crossref"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let sources = if s.contains(',') {
            s.split(',')
                .filter(|tok| !tok.trim().is_empty())
                .map(|tok| {
                    Source::from_name(tok)
                        .ok_or_else(|| ConfigError::InvalidSearchOrder(tok.trim().to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        } else if let Some(source) = Source::from_name(s) {
            vec![source]
        } else {
            s.chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| {
                    Source::from_letter(c).ok_or_else(|| ConfigError::InvalidSearchOrder(c.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        if sources.is_empty() {
            return Err(ConfigError::InvalidSearchOrder(s.to_string()));
        }
        Ok(Self::new(sources))
    }
}

impl fmt::Display for SearchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for source in &self.0 {
            write!(f, "{}", source.letter())?;
        }
        Ok(())
    }
}
