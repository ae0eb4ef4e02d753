//! Import upload, status, review listings, apply and cancel

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{
    ApplyResponse, ImportStatus, ImportStatusResponse, SectionListResponse, SectionView,
    SubmitImportResponse, UnmappedListResponse, UnmappedView,
};

/// POST /api/imports - Upload one document for a submission
pub async fn submit_import(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitImportResponse>)> {
    let mut submission_id: Option<String> = None;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "submissionId" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| Error::validation(format!("Failed to read submissionId: {}", e)))?;
                submission_id = Some(value);
            }
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::validation("file field has no file name"))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::validation(format!("Failed to read {}: {}", filename, e)))?;
                upload = Some((filename, data.to_vec()));
            }
            other => {
                tracing::debug!("Ignoring multipart field '{}'", other);
            }
        }
    }

    let submission_id = submission_id.ok_or_else(|| Error::validation("submissionId is required"))?;
    let (filename, data) = upload.ok_or_else(|| Error::validation("No file provided"))?;

    let job = state
        .orchestrator()
        .submit(&submission_id, &filename, data)?;

    Ok((StatusCode::ACCEPTED, Json(SubmitImportResponse::accepted(job.id))))
}

/// GET /api/imports/:id - Progress, counts and recent activity
pub async fn get_import_status(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
) -> Result<Json<ImportStatusResponse>> {
    Ok(Json(state.orchestrator().status(import_id)?))
}

/// GET /api/imports/:id/sections - Extracted sections with their mapping state
pub async fn list_sections(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
) -> Result<Json<SectionListResponse>> {
    let preview_chars = state.config().mapping.preview_chars;

    let sections = state.store().read(|c| {
        if c.get_job(import_id)?.is_none() {
            return Err(Error::not_found(format!("Import {} not found", import_id)));
        }
        c.list_sections(import_id)?
            .iter()
            .map(|section| {
                let mapping = c.get_mapping(section.id)?;
                let unmapped = c.get_unmapped(section.id)?;
                Ok(SectionView::build(
                    section,
                    preview_chars,
                    mapping.as_ref(),
                    unmapped.as_ref(),
                ))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(Json(SectionListResponse {
        import_id,
        total_count: sections.len(),
        sections,
    }))
}

/// GET /api/imports/:id/unmapped - Review queue, including decided items
pub async fn list_unmapped(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
) -> Result<Json<UnmappedListResponse>> {
    let preview_chars = state.config().mapping.preview_chars;

    let items = state.store().read(|c| {
        if c.get_job(import_id)?.is_none() {
            return Err(Error::not_found(format!("Import {} not found", import_id)));
        }
        c.list_unmapped(import_id)?
            .into_iter()
            .map(|item| {
                let section = c.get_section(item.extracted_section_id)?;
                Ok(UnmappedView {
                    heading: section.as_ref().and_then(|s| s.heading.clone()),
                    preview: section
                        .as_ref()
                        .map(|s| s.preview(preview_chars))
                        .unwrap_or_default(),
                    item,
                })
            })
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(Json(UnmappedListResponse {
        import_id,
        total_count: items.len(),
        items,
    }))
}

/// POST /api/imports/:id/apply - Copy mapped content into the submission narratives
pub async fn apply_import(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
) -> Result<Json<ApplyResponse>> {
    let reconciler = state.orchestrator().reconciler().clone();

    let (job, summary) = state.store().transaction(|tx| {
        let job = tx
            .get_job(import_id)?
            .ok_or_else(|| Error::not_found(format!("Import {} not found", import_id)))?;
        if job.status != ImportStatus::Completed {
            return Err(Error::Conflict(format!(
                "Import {} is {}; only completed imports can be applied",
                import_id,
                job.status.as_str()
            )));
        }
        let summary = reconciler.apply_to_submission(tx, &job)?;
        Ok((job, summary))
    })?;

    tracing::info!(
        "[{}] applied {} sections to submission {} ({} skipped)",
        import_id,
        summary.sections_applied,
        job.submission_id,
        summary.sections_skipped
    );

    Ok(Json(ApplyResponse {
        import_id,
        submission_id: job.submission_id,
        summary,
    }))
}

/// DELETE /api/imports/:id - Cancel a pending or processing import
pub async fn cancel_import(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.orchestrator().cancel(import_id)?;
    Ok(StatusCode::NO_CONTENT)
}
