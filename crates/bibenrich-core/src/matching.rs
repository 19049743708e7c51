use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Score a database title must reach against a same-length window of the
/// citation text to count as present in it.
const WINDOW_THRESHOLD: f64 = 0.90;

/// Titles shorter than this (after normalization) must occur verbatim.
const MIN_FUZZY_LEN: usize = 12;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

const STOP_WORDS: &[&str] = &[
    "about", "after", "among", "and", "from", "into", "over", "some", "that", "their", "these",
    "this", "under", "with", "without", "vol", "pages", "proc", "journal", "url", "doi",
];

/// Normalize a title for comparison: lowercase ASCII alphanumerics only.
///
/// HTML entities are unescaped and Greek letters spelled out first, so
/// `"&alpha;"`-free inputs like `"α-stable"` still compare as `"alphastable"`.
pub fn normalize_title(title: &str) -> String {
    let title = title
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");

    // NFKD doesn't map Greek to ASCII
    let title = title
        .replace(['α', 'Α'], "alpha")
        .replace(['β', 'Β'], "beta")
        .replace(['γ', 'Γ'], "gamma")
        .replace(['δ', 'Δ'], "delta")
        .replace(['ε', 'Ε'], "epsilon")
        .replace(['ζ', 'Ζ'], "zeta")
        .replace(['η', 'Η'], "eta")
        .replace(['θ', 'Θ'], "theta")
        .replace(['κ', 'Κ'], "kappa")
        .replace(['λ', 'Λ'], "lambda")
        .replace(['μ', 'Μ'], "mu")
        .replace(['ν', 'Ν'], "nu")
        .replace(['ξ', 'Ξ'], "xi")
        .replace(['π', 'Π'], "pi")
        .replace(['ρ', 'Ρ'], "rho")
        .replace(['σ', 'ς', 'Σ'], "sigma")
        .replace(['τ', 'Τ'], "tau")
        .replace(['φ', 'Φ'], "phi")
        .replace(['χ', 'Χ'], "chi")
        .replace(['ψ', 'Ψ'], "psi")
        .replace(['ω', 'Ω'], "omega")
        .replace('ß', "ss")
        .replace('ø', "o")
        .replace('ł', "l");

    let ascii: String = title.nfkd().filter(|c| c.is_ascii()).collect();
    NON_ALNUM.replace_all(&ascii, "").to_lowercase()
}

/// Check if two titles match using fuzzy comparison (95% threshold).
pub fn titles_match(title_a: &str, title_b: &str) -> bool {
    let norm_a = normalize_title(title_a);
    let norm_b = normalize_title(title_b);

    if norm_a.is_empty() || norm_b.is_empty() {
        return false;
    }

    rapidfuzz::fuzz::ratio(norm_a.chars(), norm_b.chars()) >= 0.95
}

/// Whether a title returned by a database plausibly occurs inside a
/// free-text citation.
///
/// Short titles must appear exactly (after normalization); longer ones may
/// differ slightly from the best-matching stretch of the citation.
pub fn title_in_citation(title: &str, citation: &str) -> bool {
    let t = normalize_title(title);
    let c = normalize_title(citation);

    if t.is_empty() || c.is_empty() {
        return false;
    }
    if c.contains(&t) {
        return true;
    }
    if t.len() < MIN_FUZZY_LEN {
        return false;
    }
    if c.len() <= t.len() {
        return rapidfuzz::fuzz::ratio(t.chars(), c.chars()) >= WINDOW_THRESHOLD;
    }

    // Both strings are ASCII, so byte windows are char windows.
    (0..=c.len() - t.len())
        .any(|i| rapidfuzz::fuzz::ratio(t.chars(), c[i..i + t.len()].chars()) >= WINDOW_THRESHOLD)
}

/// Pick up to `max` distinctive words from free text for a keyword search.
pub fn query_words(text: &str, max: usize) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str())
        .filter(|w| w.chars().count() >= 4)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .take(max)
        .collect()
}
