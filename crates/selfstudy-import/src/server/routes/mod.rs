//! API routes for the import server

pub mod callbacks;
pub mod imports;
pub mod mappings;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Imports - with larger body limit for file uploads
        .route(
            "/imports",
            post(imports::submit_import).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route(
            "/imports/:id",
            get(imports::get_import_status).delete(imports::cancel_import),
        )
        .route("/imports/:id/sections", get(imports::list_sections))
        .route("/imports/:id/unmapped", get(imports::list_unmapped))
        .route("/imports/:id/apply", post(imports::apply_import))
        // Mapping and review
        .route("/mappings", post(mappings::create_mapping))
        .route("/unmapped/:section_id/review", post(mappings::review_unmapped))
        .route("/submissions/:id/narratives", get(mappings::get_narratives))
        // External classifier results
        .route(
            "/callbacks/classification",
            post(callbacks::receive_classification),
        )
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.config();
    let mapper = if state.orchestrator().uses_external_classifier() {
        "external-classifier"
    } else {
        "local-patterns"
    };

    Json(serde_json::json!({
        "name": "selfstudy-import",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Self-study document ingestion and standards mapping",
        "uptimeSeconds": state.uptime_secs(),
        "mapper": mapper,
        "taxonomy": {
            "name": state.taxonomy().name,
            "standards": state.taxonomy().standards.len(),
        },
        "thresholds": {
            "local": config.mapping.local_threshold,
            "external": config.mapping.external_threshold,
        },
        "queue": state.orchestrator().queue().stats(),
        "endpoints": {
            "POST /api/imports": "Upload a document (multipart: file, submissionId)",
            "GET /api/imports/:id": "Import status, progress and counts",
            "DELETE /api/imports/:id": "Cancel a pending or processing import",
            "GET /api/imports/:id/sections": "Extracted sections with mapping state",
            "GET /api/imports/:id/unmapped": "Review queue",
            "POST /api/imports/:id/apply": "Apply mappings to the submission narratives",
            "POST /api/mappings": "Map a section manually",
            "POST /api/unmapped/:sectionId/review": "Assign or discard an unmapped section",
            "GET /api/submissions/:id/narratives": "Narrative slots of a submission",
            "POST /api/callbacks/classification": "External classifier results"
        }
    }))
}
