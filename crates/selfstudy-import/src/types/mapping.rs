//! Mapping records: section -> standard/spec, and the human review queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Field used when a mapping does not name one
pub const DEFAULT_FIELD_TYPE: &str = "narrative";

/// Who produced a mapping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Auto,
    Manual,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "manual" => Self::Manual,
            _ => Self::Auto,
        }
    }
}

/// Active mapping of one extracted section onto the taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMapping {
    pub extracted_section_id: Uuid,
    pub import_id: Uuid,
    pub standard_code: String,
    pub spec_code: Option<String>,
    pub field_type: String,
    pub provenance: Provenance,
    pub confidence: f32,
    pub mapped_by: String,
    pub mapped_at: DateTime<Utc>,
}

impl SectionMapping {
    /// Spec code as used in narrative slot keys ("" for standard-level)
    pub fn spec_key(&self) -> &str {
        self.spec_code.as_deref().unwrap_or("")
    }
}

/// Disposition of an unmapped item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Pending,
    Assigned,
    Discarded,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Discarded => "discarded",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "assigned" => Self::Assigned,
            "discarded" => Self::Discarded,
            _ => Self::Pending,
        }
    }
}

/// A section that did not clear the acceptance threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedItem {
    pub extracted_section_id: Uuid,
    pub import_id: Uuid,
    pub reason: String,
    pub review_action: ReviewAction,
    pub reviewer: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Runner-up standards offered to the reviewer
    #[serde(default)]
    pub alternatives: Vec<AlternativeMatch>,
}

/// Runner-up standard for a section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeMatch {
    pub standard_code: String,
    pub spec_code: Option<String>,
    pub confidence: f32,
}

/// A classifier's proposal for one section, before reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSuggestion {
    pub extracted_section_id: Uuid,
    pub standard_code: Option<String>,
    pub spec_code: Option<String>,
    pub field_type: String,
    /// Normalised to 0.0-1.0
    pub confidence: f32,
    /// Recorded on the unmapped item if the suggestion is not accepted
    pub reason: String,
    pub alternatives: Vec<AlternativeMatch>,
}

impl MappingSuggestion {
    /// Suggestion with nothing to propose
    pub fn none(extracted_section_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            extracted_section_id,
            standard_code: None,
            spec_code: None,
            field_type: DEFAULT_FIELD_TYPE.to_string(),
            confidence: 0.0,
            reason: reason.into(),
            alternatives: Vec::new(),
        }
    }
}

/// Narrative content for one (standard, spec, field) slot of a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeSlot {
    pub submission_id: String,
    pub standard_code: String,
    pub spec_code: String,
    pub field_type: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// Audit link from a submission back to the import that enriched it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLink {
    pub submission_id: String,
    pub import_id: Uuid,
    pub applied_at: DateTime<Utc>,
    pub sections_applied: u32,
}

/// Outcome of applying an import's mappings to its submission
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    /// Sections whose content was appended to a slot
    pub sections_applied: u32,
    /// Sections already applied to the same slot earlier
    pub sections_skipped: u32,
    /// Distinct (standard, spec, field) slots written
    pub slots_touched: u32,
}
