use once_cell::sync::Lazy;
use regex::Regex;

use bibenrich_core::{CitationRecord, escape_xml, normalize};

use crate::deposit::DepositError;

/// Inline markup the deposit schema accepts inside a title.
pub const ALLOWED_TITLE_TAGS: &[&str] = &[
    "b", "i", "u", "ovl", "sup", "sub", "scp", "tt", "em", "strong", "font",
];

static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?([A-Za-z][A-Za-z0-9]*)(?:\s[^<>]*)?/?>").unwrap());

/// `<citation>` element carrying the normalized text of a citation.
pub fn to_citation_xml_fragment(record: &CitationRecord) -> String {
    format!(
        "<citation key=\"{}\"><unstructured_citation>{}</unstructured_citation></citation>",
        escape_xml(&record.key),
        escape_xml(&record.normalized_text)
    )
}

/// Turn a LaTeX title into deposit title text.
///
/// The title is normalized and every tag left in it must be in
/// [`ALLOWED_TITLE_TAGS`]. Tags that pass are dropped; the text between them
/// is escaped unless the input is already XML.
pub fn title_to_xml(title: &str, input_is_xml: bool) -> Result<String, DepositError> {
    let normalized = normalize(title);

    let mut out = String::with_capacity(normalized.len());
    let mut last = 0;
    for caps in TAG.captures_iter(&normalized) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str().to_ascii_lowercase();
        if !ALLOWED_TITLE_TAGS.contains(&name.as_str()) {
            return Err(DepositError::DisallowedMarkup {
                tag: name,
                title: normalized.clone(),
            });
        }
        out.push_str(&escape_text(&normalized[last..whole.start()], input_is_xml));
        last = whole.end();
    }
    out.push_str(&escape_text(&normalized[last..], input_is_xml));
    Ok(out)
}

/// Escape character data. Pre-escaped input is passed through untouched.
pub(crate) fn escape_text(text: &str, input_is_xml: bool) -> String {
    if input_is_xml {
        text.to_string()
    } else {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_citation_fragment() {
        let mut record = CitationRecord::new("a&b", vec!["x".into()]);
        record.normalized_text = "Smith & Jones, <Title>".into();
        assert_eq!(
            to_citation_xml_fragment(&record),
            "<citation key=\"a&amp;b\"><unstructured_citation>Smith &amp; Jones, &lt;Title&gt;</unstructured_citation></citation>"
        );
    }

    #[test]
    fn test_allowed_tag_dropped_and_ampersand_escaped() {
        assert_eq!(
            title_to_xml("<b>Foo</b> & Bar", false).unwrap(),
            "Foo &amp; Bar"
        );
    }

    #[test]
    fn test_disallowed_tag_is_fatal() {
        let err = title_to_xml("A <script>bad</script> title", false).unwrap_err();
        match err {
            DepositError::DisallowedMarkup { tag, .. } => assert_eq!(tag, "script"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_face_commands_become_plain_text() {
        assert_eq!(
            title_to_xml(r"On \emph{the} \textbf{bold} \textsc{Caps}", false).unwrap(),
            "On the bold Caps"
        );
    }

    #[test]
    fn test_latex_normalized_in_title() {
        assert_eq!(
            title_to_xml(r#"Sur les {\'e}quations de G\"odel \& Co"#, false).unwrap(),
            "Sur les équations de Gödel &amp; Co"
        );
    }

    #[test]
    fn test_input_is_xml_passes_through() {
        assert_eq!(
            title_to_xml("Fish &amp; Chips <i>now</i>", true).unwrap(),
            "Fish &amp; Chips now"
        );
    }

    #[test]
    fn test_tag_attributes_and_case() {
        assert_eq!(
            title_to_xml(r#"<FONT face="Symbol">a</FONT> b"#, false).unwrap(),
            "a b"
        );
    }

    #[test]
    fn test_stray_angle_bracket_escaped() {
        assert_eq!(title_to_xml("$a < b$", false).unwrap(), "a &lt; b");
    }
}
