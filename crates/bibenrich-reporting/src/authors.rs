//! Author entries of a metadata side-file.
//!
//! An entry is a BibTeX-style name, optionally carrying `\organization`
//! (the whole entry names a corporate author) or `\orcid{...}`. Names are
//! accepted in the three BibTeX forms:
//!
//! - `First von Last`
//! - `von Last, First`
//! - `von Last, Jr, First`
//!
//! The von part is the run of tokens starting with a lowercase letter. A
//! `Jr` written without commas, or a multi-word family name with no von
//! part, can't be told apart from the given names; use the comma forms for
//! those.

use once_cell::sync::Lazy;
use regex::Regex;

use bibenrich_core::normalize;

use crate::metadata::MetadataError;

static ORGANIZATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\organization\b(?:\s*\{\s*\})?").unwrap());
static ORCID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\orcid\s*\{([^{}]*)\}").unwrap());

/// The parts of a personal name, already normalized to plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonName {
    pub first: String,
    pub von: String,
    pub last: String,
    pub suffix: String,
}

impl PersonName {
    /// Family name including any particle (`van Beethoven`).
    pub fn surname(&self) -> String {
        if self.von.is_empty() {
            self.last.clone()
        } else {
            format!("{} {}", self.von, self.last)
        }
    }
}

/// One contributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorSpec {
    /// The entry as written in the side-file.
    pub raw: String,
    pub organization: bool,
    pub orcid: Option<String>,
    /// Plain-text name with the directives removed.
    pub display: String,
    /// Parsed parts; `None` for organizations.
    pub name: Option<PersonName>,
}

impl AuthorSpec {
    pub fn parse(raw: &str) -> Result<Self, MetadataError> {
        let organization = ORGANIZATION.is_match(raw);
        let orcid = ORCID
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|id| !id.is_empty());

        if organization && orcid.is_some() {
            return Err(MetadataError::ConflictingAuthorDirectives {
                author: raw.trim().to_string(),
            });
        }

        let stripped = ORGANIZATION.replace_all(raw, "");
        let stripped = ORCID.replace_all(&stripped, "");
        let stripped = stripped.trim();

        Ok(Self {
            raw: raw.trim().to_string(),
            organization,
            orcid,
            display: normalize(stripped),
            name: (!organization).then(|| parse_name(stripped)),
        })
    }

    /// ORCID as the URL the deposit schema wants.
    pub fn orcid_url(&self) -> Option<String> {
        self.orcid.as_ref().map(|id| {
            if id.starts_with("http://") || id.starts_with("https://") {
                id.clone()
            } else {
                format!("https://orcid.org/{}", id)
            }
        })
    }
}

/// Split a BibTeX name into first, von, last and suffix parts.
pub fn parse_name(name: &str) -> PersonName {
    let parts = split_top_level(name, |c| c == ',');
    let tokens = |s: &str| -> Vec<String> {
        split_top_level(s, |c| c.is_whitespace() || c == '~')
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect()
    };

    let (first, von, last, suffix) = match parts.len() {
        0 | 1 => {
            let words = tokens(name);
            let (first, von, last) = split_first_von_last(&words);
            (first, von, last, Vec::new())
        }
        2 => {
            let (von, last) = split_von_last(&tokens(&parts[0]));
            (tokens(&parts[1]), von, last, Vec::new())
        }
        _ => {
            let (von, last) = split_von_last(&tokens(&parts[0]));
            // anything past the third part is folded into the given names
            let first = tokens(&parts[2..].join(","));
            (first, von, last, tokens(&parts[1]))
        }
    };

    PersonName {
        first: join_normalized(&first),
        von: join_normalized(&von),
        last: join_normalized(&last),
        suffix: join_normalized(&suffix),
    }
}

type Words = Vec<String>;

fn split_first_von_last(words: &[String]) -> (Words, Words, Words) {
    let Some((last_word, rest)) = words.split_last() else {
        return Default::default();
    };

    let von_start = rest.iter().position(|w| is_von(w));
    match von_start {
        Some(start) => {
            let von_end = rest.iter().rposition(|w| is_von(w)).unwrap_or(start) + 1;
            let mut last = rest[von_end..].to_vec();
            last.push(last_word.clone());
            (rest[..start].to_vec(), rest[start..von_end].to_vec(), last)
        }
        None => (rest.to_vec(), Vec::new(), vec![last_word.clone()]),
    }
}

/// In the comma forms the von part must open the first part.
fn split_von_last(words: &[String]) -> (Words, Words) {
    if words.len() < 2 || !is_von(&words[0]) {
        return (Vec::new(), words.to_vec());
    }
    let head = &words[..words.len() - 1];
    let end = head.iter().rposition(|w| is_von(w)).unwrap_or(0);
    (words[..=end].to_vec(), words[end + 1..].to_vec())
}

/// A von token starts with a lowercase letter at brace depth zero.
fn is_von(word: &str) -> bool {
    let mut depth = 0usize;
    let mut chars = word.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            // skip the name of a control sequence such as \'
            '\\' => {
                chars.next();
            }
            c if c.is_alphabetic() => return depth == 0 && c.is_lowercase(),
            _ => {}
        }
    }
    false
}

/// Split on `sep` characters that are not inside braces.
fn split_top_level(text: &str, sep: impl Fn(char) -> bool) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 && sep(c) {
            parts.push(std::mem::take(&mut current).trim().to_string());
        } else {
            current.push(c);
        }
    }
    parts.push(current.trim().to_string());
    if parts.len() == 1 && parts[0].is_empty() {
        parts.clear();
    }
    parts
}

fn join_normalized(words: &[String]) -> String {
    normalize(&words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> PersonName {
        parse_name(raw)
    }

    #[test]
    fn test_first_last() {
        let n = name("Donald E. Knuth");
        assert_eq!(n.first, "Donald E.");
        assert_eq!(n.last, "Knuth");
        assert!(n.von.is_empty());
    }

    #[test]
    fn test_first_von_last() {
        let n = name("Ludwig van Beethoven");
        assert_eq!(n.first, "Ludwig");
        assert_eq!(n.von, "van");
        assert_eq!(n.last, "Beethoven");
        assert_eq!(n.surname(), "van Beethoven");

        let n = name("Charles Louis de la Vall\\'ee Poussin");
        assert_eq!(n.first, "Charles Louis");
        assert_eq!(n.von, "de la");
        assert_eq!(n.last, "Vallée Poussin");
    }

    #[test]
    fn test_von_last_first() {
        let n = name("van der Waerden, B. L.");
        assert_eq!(n.first, "B. L.");
        assert_eq!(n.von, "van der");
        assert_eq!(n.last, "Waerden");
    }

    #[test]
    fn test_comma_form_without_von() {
        let n = name("Vall\\'ee Poussin, Charles");
        assert!(n.von.is_empty());
        assert_eq!(n.last, "Vallée Poussin");
    }

    #[test]
    fn test_von_last_jr_first() {
        let n = name("Steele, Jr., Guy L.");
        assert_eq!(n.first, "Guy L.");
        assert_eq!(n.last, "Steele");
        assert_eq!(n.suffix, "Jr.");
    }

    #[test]
    fn test_braced_family_name() {
        let n = name("{de Gruyter} Walter");
        assert_eq!(n.first, "de Gruyter");
        assert_eq!(n.last, "Walter");

        let n = name("Walter {de Gruyter}");
        assert_eq!(n.last, "de Gruyter");
        assert!(n.von.is_empty());
    }

    #[test]
    fn test_tie_and_accents() {
        let n = name("P.~Erd\\H{o}s");
        assert_eq!(n.first, "P.");
        assert_eq!(n.last, "Erdős");
    }

    #[test]
    fn test_single_word() {
        let n = name("Euclid");
        assert_eq!(n.last, "Euclid");
        assert!(n.first.is_empty());
    }

    #[test]
    fn test_organization() {
        let author = AuthorSpec::parse("\\organization The Polymath Project").unwrap();
        assert!(author.organization);
        assert!(author.name.is_none());
        assert_eq!(author.display, "The Polymath Project");
    }

    #[test]
    fn test_orcid() {
        let author = AuthorSpec::parse("Jane Doe \\orcid{0000-0002-1825-0097}").unwrap();
        assert_eq!(author.orcid.as_deref(), Some("0000-0002-1825-0097"));
        assert_eq!(
            author.orcid_url().as_deref(),
            Some("https://orcid.org/0000-0002-1825-0097")
        );
        assert_eq!(author.name.unwrap().last, "Doe");

        let author = AuthorSpec::parse("X Y \\orcid{https://orcid.org/0000-0001-2345-6789}").unwrap();
        assert_eq!(
            author.orcid_url().as_deref(),
            Some("https://orcid.org/0000-0001-2345-6789")
        );
    }

    #[test]
    fn test_organization_with_orcid_is_fatal() {
        let err = AuthorSpec::parse("\\organization ACME \\orcid{0000-0002-1825-0097}").unwrap_err();
        assert!(matches!(
            err,
            MetadataError::ConflictingAuthorDirectives { .. }
        ));
    }
}
