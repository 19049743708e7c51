//! Output side of the pipeline: bibliography entry documents, citation XML
//! fragments and the deposit document built from per-article metadata.

pub mod authors;
pub mod bib;
pub mod deposit;
pub mod metadata;
pub mod xml;

pub use authors::{AuthorSpec, PersonName};
pub use bib::{to_bibliography_entry, write_bibliography};
pub use deposit::{BatchHead, DepositError, deposit_document};
pub use metadata::{
    IssueKey, MetadataError, PaperMetadata, ParsedMetadata, aggregate, load_rpi, parse_rpi,
};
pub use xml::{ALLOWED_TITLE_TAGS, title_to_xml, to_citation_xml_fragment};
