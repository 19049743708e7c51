//! LaTeX-to-plain-text normalization.
//!
//! [`normalize`] runs an ordered table of `(pattern, replacement)` rules over
//! the input, then collapses whitespace and composes Unicode. Each rule is
//! exposed through [`rules`] so it can be exercised on its own.

use once_cell::sync::Lazy;
use regex::{Captures, NoExpand, Regex};
use unicode_normalization::UnicodeNormalization;

/// Private-use stand-ins for escaped characters that later rules would
/// otherwise strip (`\{`, `\}`, `\$`).
const OPEN_BRACE: char = '\u{E000}';
const CLOSE_BRACE: char = '\u{E001}';
const DOLLAR: char = '\u{E002}';

enum Replacement {
    /// `$n` references are expanded.
    Template(&'static str),
    Literal(&'static str),
    With(fn(&Captures<'_>) -> String),
}

/// One substitution step of the normalizer pipeline.
pub struct Rule {
    pub name: &'static str,
    pattern: Regex,
    replacement: Replacement,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, replacement: Replacement) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).unwrap(),
            replacement,
        }
    }

    pub fn apply(&self, text: &str) -> String {
        match &self.replacement {
            Replacement::Template(t) => self.pattern.replace_all(text, *t).into_owned(),
            Replacement::Literal(t) => self.pattern.replace_all(text, NoExpand(*t)).into_owned(),
            Replacement::With(f) => self
                .pattern
                .replace_all(text, |caps: &Captures<'_>| f(caps))
                .into_owned(),
        }
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    use Replacement::*;
    vec![
        Rule::new("comment", r"(?m)(^|[^\\])%.*$", Template("$1")),
        Rule::new("line_break", r"\\\\\*?(?:\[[^\]]*\])?", Literal(" ")),
        Rule::new("escaped_special", r"\\([{}$&%#_])", With(escaped_special)),
        Rule::new(
            "url",
            r"(?:\\urlprefix\s*)?\\(?:url|path)\s*\{([^{}]*)\}",
            Template("URL: $1"),
        ),
        Rule::new(
            "doi",
            r"(?:\\doiprefix\s*)?\\doi\s*\{([^{}]*)\}",
            Template("DOI: $1"),
        ),
        Rule::new("url_prefix", r"\\urlprefix\b\s*", Literal("URL: ")),
        Rule::new("doi_prefix", r"\\doiprefix\b\s*", Literal("DOI: ")),
        Rule::new("href", r"\\href\s*\{[^{}]*\}\s*", Literal("")),
        Rule::new(
            "special_letter",
            r"\\(i|j|ss|o|O|l|L|ae|AE|oe|OE|aa|AA)\b(?:\{\}|\s+)?",
            With(special_letter),
        ),
        Rule::new(
            "symbol_accent",
            r#"\\(['"`^~=.])\s*(?:\{\s*([A-Za-z])\s*\}|([A-Za-z]))"#,
            With(accent),
        ),
        Rule::new(
            "letter_accent",
            r"\\([uvHckrdb])(?:\s*\{\s*([A-Za-z])\s*\}|\s+([A-Za-z]))",
            With(accent),
        ),
        Rule::new("em_dash", r"---", Literal("\u{2014}")),
        Rule::new("en_dash", r"--", Literal("\u{2013}")),
        Rule::new("quotes", r"``|''", Literal("\"")),
        Rule::new("symbol", r"\\([A-Za-z]+)\b", With(symbol)),
        Rule::new("newblock", r"\\newblock\b", Literal(" ")),
        Rule::new(
            "bibinfo",
            r"\\(?:bibinfo|bibfield)\s*\{[^{}]*\}\s*|\\BibitemShut\s*\{[^{}]*\}|\\BibitemOpen\b",
            Literal(""),
        ),
        Rule::new(
            "markup_command",
            r"\\(?:emph|text(?:it|bf|sc|rm|sf|tt|up|sl|md|normal|superscript|subscript)|mbox|hbox|underline|uppercase|lowercase|MakeUppercase|MakeLowercase|ensuremath|enquote|showarticletitle|showDOI|showURL|natexlab|bibnamefont|bibfnamefont|citenamefont)\b\s*",
            Literal(""),
        ),
        Rule::new(
            "font_switch",
            r"\\(?:em|it|bf|sc|rm|sl|sf|tt|itshape|bfseries|scshape|upshape|slshape|rmfamily|sffamily|ttfamily|mdseries|normalfont|small|footnotesize|large|Large)\b\s*",
            Literal(""),
        ),
        Rule::new(
            "spacing_command",
            r"\\(?:newline|linebreak|allowbreak|nobreak|break|par|relax|hfill|quad|qquad|space|nobreakspace|thinspace|enspace)\b\s*|\\[hv](?:space|skip)\*?\s*\{[^{}]*\}|\\[,;:! >]",
            Literal(" "),
        ),
        Rule::new("discretionary", r"\\[-/@]", Literal("")),
        Rule::new("math_delimiter", r"\$|\\[()\[\]]", Literal("")),
        Rule::new("unknown_command", r"\\(?:[A-Za-z]+\*?|[^A-Za-z\s])?", Literal(" ")),
        Rule::new("brace", r"[{}]", Literal("")),
        Rule::new("tie", r"~", Literal(" ")),
        Rule::new(
            "restore_escaped",
            "[\u{E000}\u{E001}\u{E002}]",
            With(restore_escaped),
        ),
        Rule::new("whitespace", r"\s+", Literal(" ")),
    ]
});

/// The normalizer pipeline in application order.
pub fn rules() -> &'static [Rule] {
    &RULES
}

/// Convert markup-laden citation text into plain readable text.
///
/// Known commands are rewritten, accents composed, unknown control
/// sequences replaced by a space. Never fails.
pub fn normalize(text: &str) -> String {
    let mut out = text.to_string();
    for rule in RULES.iter() {
        out = rule.apply(&out);
    }
    out.trim().nfc().collect()
}

/// Escape text for inclusion in XML character data or attribute values.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn escaped_special(caps: &Captures<'_>) -> String {
    match &caps[1] {
        "{" => OPEN_BRACE.to_string(),
        "}" => CLOSE_BRACE.to_string(),
        "$" => DOLLAR.to_string(),
        other => other.to_string(),
    }
}

fn restore_escaped(caps: &Captures<'_>) -> String {
    match caps[0].chars().next() {
        Some(OPEN_BRACE) => "{".to_string(),
        Some(CLOSE_BRACE) => "}".to_string(),
        _ => "$".to_string(),
    }
}

fn special_letter(caps: &Captures<'_>) -> String {
    let s = match &caps[1] {
        "i" => "i",
        "j" => "j",
        "ss" => "ß",
        "o" => "ø",
        "O" => "Ø",
        "l" => "ł",
        "L" => "Ł",
        "ae" => "æ",
        "AE" => "Æ",
        "oe" => "œ",
        "OE" => "Œ",
        "aa" => "å",
        _ => "Å",
    };
    s.to_string()
}

fn combining_mark(command: &str) -> Option<char> {
    let mark = match command {
        "'" => '\u{0301}',
        "`" => '\u{0300}',
        "^" => '\u{0302}',
        "\"" => '\u{0308}',
        "~" => '\u{0303}',
        "=" => '\u{0304}',
        "." => '\u{0307}',
        "u" => '\u{0306}',
        "v" => '\u{030C}',
        "H" => '\u{030B}',
        "c" => '\u{0327}',
        "k" => '\u{0328}',
        "r" => '\u{030A}',
        "d" => '\u{0323}',
        "b" => '\u{0331}',
        _ => return None,
    };
    Some(mark)
}

fn accent(caps: &Captures<'_>) -> String {
    let letter = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
    match combining_mark(&caps[1]) {
        Some(mark) => format!("{letter}{mark}"),
        None => letter.to_string(),
    }
}

fn symbol(caps: &Captures<'_>) -> String {
    let s = match &caps[1] {
        "alpha" => "α",
        "beta" => "β",
        "gamma" => "γ",
        "delta" => "δ",
        "epsilon" | "varepsilon" => "ε",
        "zeta" => "ζ",
        "eta" => "η",
        "theta" | "vartheta" => "θ",
        "iota" => "ι",
        "kappa" => "κ",
        "lambda" => "λ",
        "mu" => "μ",
        "nu" => "ν",
        "xi" => "ξ",
        "pi" => "π",
        "rho" => "ρ",
        "sigma" => "σ",
        "tau" => "τ",
        "upsilon" => "υ",
        "phi" | "varphi" => "φ",
        "chi" => "χ",
        "psi" => "ψ",
        "omega" => "ω",
        "Gamma" => "Γ",
        "Delta" => "Δ",
        "Theta" => "Θ",
        "Lambda" => "Λ",
        "Xi" => "Ξ",
        "Pi" => "Π",
        "Sigma" => "Σ",
        "Phi" => "Φ",
        "Psi" => "Ψ",
        "Omega" => "Ω",
        "infty" => "∞",
        "le" | "leq" => "≤",
        "ge" | "geq" => "≥",
        "times" => "×",
        "cdot" => "·",
        "pm" => "±",
        "ldots" | "dots" | "textellipsis" => "…",
        "textendash" => "\u{2013}",
        "textemdash" => "\u{2014}",
        "S" => "§",
        "copyright" => "©",
        "TeX" => "TeX",
        "LaTeX" => "LaTeX",
        "BibTeX" => "BibTeX",
        "AMS" => "AMS",
        _ => return caps[0].to_string(),
    };
    s.to_string()
}
