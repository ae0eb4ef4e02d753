//! Manual mapping, review decisions and submission narratives

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{
    ImportLink, ManualMappingRequest, NarrativeSlot, ReviewRequest, SectionMapping, UnmappedItem,
};

/// Narrative slots of a submission and the imports applied to it
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativesResponse {
    pub submission_id: String,
    pub slots: Vec<NarrativeSlot>,
    pub imports: Vec<ImportLink>,
}

/// POST /api/mappings - Map a section by hand
pub async fn create_mapping(
    State(state): State<AppState>,
    Json(request): Json<ManualMappingRequest>,
) -> Result<Json<SectionMapping>> {
    let reconciler = state.orchestrator().reconciler().clone();
    let mapping = state
        .store()
        .transaction(|tx| reconciler.map_manually(tx, &request))?;

    tracing::info!(
        "[{}] section {} mapped to {}{} by {}",
        mapping.import_id,
        mapping.extracted_section_id,
        mapping.standard_code,
        mapping
            .spec_code
            .as_deref()
            .map(|s| format!(".{}", s))
            .unwrap_or_default(),
        mapping.mapped_by
    );
    Ok(Json(mapping))
}

/// POST /api/unmapped/:sectionId/review - Assign or discard an unmapped item
pub async fn review_unmapped(
    State(state): State<AppState>,
    Path(section_id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<UnmappedItem>> {
    let reconciler = state.orchestrator().reconciler().clone();
    let item = state
        .store()
        .transaction(|tx| reconciler.review(tx, section_id, &request))?;

    tracing::info!(
        "[{}] section {} {}",
        item.import_id,
        section_id,
        item.review_action.as_str()
    );
    Ok(Json(item))
}

/// GET /api/submissions/:id/narratives - Narrative content built by apply
pub async fn get_narratives(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Result<Json<NarrativesResponse>> {
    if submission_id.trim().is_empty() {
        return Err(Error::validation("submission id is required"));
    }
    let (slots, imports) = state.store().read(|c| {
        Ok((
            c.list_narratives(&submission_id)?,
            c.list_import_links(&submission_id)?,
        ))
    })?;

    Ok(Json(NarrativesResponse {
        submission_id,
        slots,
        imports,
    }))
}
