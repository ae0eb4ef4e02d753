//! Document ingestion: decoding, structure detection and HTML rendering

pub mod html;
mod parser;
pub mod structure;

pub use html::{split_chunks, HtmlChunk};
pub use parser::{hash_bytes, DocumentMetadata, DocumentParser, ParsedDocument};
