use std::path::Path;

use bibenrich_bbl::{extract_citations_from_path, extract_fields};

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

#[test]
fn amsplain_listing() {
    let scan = extract_citations_from_path(&fixture("amsplain.bbl")).unwrap();
    assert!(scan.has_bibliography());

    let keys: Vec<_> = scan.citations.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, ["ER60", "Knu84", "VSP17", "Ser73"]);
    assert_eq!(scan.citations[0].raw_text().len(), 3);
    assert_eq!(
        scan.citations[1].raw_text(),
        ["D.~E. Knuth, \\emph{The {\\TeX}book}, Addison-Wesley, Reading, MA, 1984."]
    );
}

#[test]
fn amsplain_annotations() {
    let scan = extract_citations_from_path(&fixture("amsplain.bbl")).unwrap();
    let records: Vec<_> = scan.citations.into_iter().map(extract_fields).collect();

    let er = &records[0];
    assert_eq!(er.extracted.mr_number.as_deref(), Some("0125031"));
    assert_eq!(
        er.normalized_text,
        "P. Erdős and A. Rényi, On the evolution of random graphs, Magyar Tud. Akad. Mat. Kutató Int. Közl. 5 (1960), 17–61."
    );

    assert!(records[1].extracted.is_empty());
    assert_eq!(records[2].extracted.arxiv_id.as_deref(), Some("1706.03762"));

    let serre = &records[3];
    assert_eq!(serre.extracted.doi.as_deref(), Some("10.1007/978-1-4684-9884-4"));
    assert_eq!(serre.extracted.zbl_id.as_deref(), Some("0256.12001"));
    assert!(!serre.normalized_text.contains("DOI"));
    // raw text is kept for the audit comment
    assert!(serre.joined_raw_text().contains("\\zbl{0256.12001}"));
}
