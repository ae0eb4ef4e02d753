//! selfstudy-import: accreditation self-study document ingestion and standards mapping
//!
//! Uploaded PDF, DOCX and PPTX documents are parsed into sections and tables,
//! mapped onto a standards taxonomy (locally by pattern, or by an external
//! classifier over a chunked callback protocol) and, once reviewed, applied to
//! the narrative slots of a submission.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ingestion;
pub mod mapping;
pub mod processing;
pub mod server;
pub mod storage;
pub mod types;

pub use config::ImportConfig;
pub use error::{Error, Result};
pub use types::{
    document::FileType,
    import::{ImportJob, ImportStatus},
    response::ImportStatusResponse,
};
