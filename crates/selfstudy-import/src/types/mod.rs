//! Core types for the import pipeline

pub mod document;
pub mod extraction;
pub mod import;
pub mod mapping;
pub mod request;
pub mod response;

pub use document::FileType;
pub use extraction::{ExtractedSection, ExtractedTable, SectionOrigin, SectionType, TableType};
pub use import::{ImportJob, ImportPhase, ImportStatus};
pub use mapping::{
    AlternativeMatch, ApplySummary, ImportLink, MappingSuggestion, NarrativeSlot, Provenance,
    ReviewAction, SectionMapping, UnmappedItem, DEFAULT_FIELD_TYPE,
};
pub use request::{ManualMappingRequest, ReviewDecision, ReviewRequest};
pub use response::{
    ApplyResponse, CallbackAck, ChunkProgress, ImportCounts, ImportStatusResponse,
    MappingActivity, SectionListResponse, SectionView, SubmitImportResponse,
    UnmappedListResponse, UnmappedView,
};
