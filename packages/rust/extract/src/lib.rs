//! Document text normalization and section extraction.
//!
//! Filing documents arrive as HTML or plain text. [`text`] flattens them into
//! normalized plain text; [`sections`] cuts the risk-factor and
//! financial-statement windows out of that text with bounded heuristics.

pub mod sections;
pub mod text;

pub use sections::{SectionSpec, extract_key_sections, extract_section};
pub use text::{document_to_text, html_to_text};
