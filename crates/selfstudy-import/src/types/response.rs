//! Response types for the import API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extraction::{ExtractedSection, SectionOrigin, SectionType};
use super::import::{ImportJob, ImportPhase, ImportStatus};
use super::mapping::{
    AlternativeMatch, ApplySummary, Provenance, ReviewAction, SectionMapping, UnmappedItem,
};

/// Returned as soon as an upload is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitImportResponse {
    pub import_id: Uuid,
    /// Always "processing": work continues in the background
    pub status: String,
}

impl SubmitImportResponse {
    pub fn accepted(import_id: Uuid) -> Self {
        Self {
            import_id,
            status: ImportStatus::Processing.as_str().to_string(),
        }
    }
}

/// Chunk progress of the external hand-off
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub sent: bool,
    pub total_chunks: u32,
    pub received_chunks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_callback_at: Option<DateTime<Utc>>,
}

/// Section and mapping totals for one import
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub sections: u32,
    pub tables: u32,
    pub mapped: u32,
    pub manual: u32,
    pub unmapped: u32,
    pub pending_review: u32,
}

/// One recent mapping write, newest first in the status view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingActivity {
    pub extracted_section_id: Uuid,
    pub heading: Option<String>,
    pub standard_code: String,
    pub spec_code: Option<String>,
    pub field_type: String,
    pub provenance: Provenance,
    pub confidence: f32,
    pub mapped_at: DateTime<Utc>,
}

/// Polling view of an import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatusResponse {
    pub import_id: Uuid,
    pub submission_id: String,
    pub filename: String,
    pub status: ImportStatus,
    pub phase: ImportPhase,
    pub phase_message: String,
    pub elapsed_seconds: i64,
    pub progress: ChunkProgress,
    pub counts: ImportCounts,
    pub recent_activity: Vec<MappingActivity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportStatusResponse {
    pub fn build(job: &ImportJob, counts: ImportCounts, recent_activity: Vec<MappingActivity>) -> Self {
        let phase = job.phase();
        Self {
            import_id: job.id,
            submission_id: job.submission_id.clone(),
            filename: job.source_filename.clone(),
            status: job.status,
            phase,
            phase_message: phase.describe().to_string(),
            elapsed_seconds: job.elapsed_secs(),
            progress: ChunkProgress {
                sent: job.sent_at.is_some(),
                total_chunks: job.total_chunks,
                received_chunks: job.received_chunks,
                sent_at: job.sent_at,
                first_callback_at: job.first_callback_at,
            },
            counts,
            recent_activity,
            error: job.error.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Compact mapping state attached to a section view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingState {
    pub standard_code: String,
    pub spec_code: Option<String>,
    pub field_type: String,
    pub provenance: Provenance,
    pub confidence: f32,
}

impl From<&SectionMapping> for MappingState {
    fn from(mapping: &SectionMapping) -> Self {
        Self {
            standard_code: mapping.standard_code.clone(),
            spec_code: mapping.spec_code.clone(),
            field_type: mapping.field_type.clone(),
            provenance: mapping.provenance,
            confidence: mapping.confidence,
        }
    }
}

/// Compact review state attached to a section view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedState {
    pub reason: String,
    pub review_action: ReviewAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<AlternativeMatch>,
}

impl From<&UnmappedItem> for UnmappedState {
    fn from(item: &UnmappedItem) -> Self {
        Self {
            reason: item.reason.clone(),
            review_action: item.review_action,
            reviewer: item.reviewer.clone(),
            alternatives: item.alternatives.clone(),
        }
    }
}

/// Section listing entry with a truncated preview
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionView {
    pub id: Uuid,
    pub origin: SectionOrigin,
    pub page_number: u32,
    pub section_type: SectionType,
    pub heading: Option<String>,
    pub preview: String,
    pub confidence: f32,
    pub suggested_standard: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<MappingState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmapped: Option<UnmappedState>,
}

impl SectionView {
    pub fn build(
        section: &ExtractedSection,
        preview_chars: usize,
        mapping: Option<&SectionMapping>,
        unmapped: Option<&UnmappedItem>,
    ) -> Self {
        Self {
            id: section.id,
            origin: section.origin,
            page_number: section.page_number,
            section_type: section.section_type,
            heading: section.heading.clone(),
            preview: section.preview(preview_chars),
            confidence: section.confidence,
            suggested_standard: section.suggested_standard.clone(),
            mapping: mapping.map(MappingState::from),
            unmapped: unmapped.map(UnmappedState::from),
        }
    }
}

/// Response for listing an import's sections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionListResponse {
    pub import_id: Uuid,
    pub sections: Vec<SectionView>,
    pub total_count: usize,
}

/// Review queue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedView {
    #[serde(flatten)]
    pub item: UnmappedItem,
    pub heading: Option<String>,
    pub preview: String,
}

/// Response for the review queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedListResponse {
    pub import_id: Uuid,
    pub items: Vec<UnmappedView>,
    pub total_count: usize,
}

/// Response for applying mappings to a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub import_id: Uuid,
    pub submission_id: String,
    #[serde(flatten)]
    pub summary: ApplySummary,
}

/// Acknowledgement returned to the external classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    /// "accepted" or "ignored"
    pub status: String,
    pub import_id: Uuid,
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub import_status: ImportStatus,
}

impl CallbackAck {
    pub fn accepted(job: &ImportJob) -> Self {
        Self::with_status("accepted", job)
    }

    pub fn ignored(job: &ImportJob) -> Self {
        Self::with_status("ignored", job)
    }

    fn with_status(status: &str, job: &ImportJob) -> Self {
        Self {
            status: status.to_string(),
            import_id: job.id,
            received_chunks: job.received_chunks,
            total_chunks: job.total_chunks,
            import_status: job.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unmapped_with_runner_ups(section: &ExtractedSection) -> UnmappedItem {
        UnmappedItem {
            extracted_section_id: section.id,
            import_id: section.import_id,
            reason: "low confidence (0.40) for standard 6".to_string(),
            review_action: ReviewAction::Pending,
            reviewer: None,
            reviewed_at: None,
            created_at: Utc::now(),
            alternatives: vec![
                AlternativeMatch {
                    standard_code: "5".to_string(),
                    spec_code: None,
                    confidence: 0.5,
                },
                AlternativeMatch {
                    standard_code: "7".to_string(),
                    spec_code: None,
                    confidence: 0.5,
                },
            ],
        }
    }

    #[test]
    fn test_review_views_expose_alternatives() {
        let section = ExtractedSection::new(
            Uuid::new_v4(),
            SectionOrigin::Parser,
            SectionType::Narrative,
            "Standard 6 covers assessment.".to_string(),
        );
        let item = unmapped_with_runner_ups(&section);

        let view = serde_json::to_value(SectionView::build(&section, 80, None, Some(&item))).unwrap();
        assert_eq!(view["unmapped"]["alternatives"][0]["standardCode"], "5");
        assert_eq!(view["unmapped"]["alternatives"][1]["standardCode"], "7");

        let queued = serde_json::to_value(UnmappedView {
            item,
            heading: None,
            preview: section.preview(80),
        })
        .unwrap();
        assert_eq!(queued["alternatives"].as_array().unwrap().len(), 2);
        assert_eq!(queued["reviewAction"], "pending");
    }
}
