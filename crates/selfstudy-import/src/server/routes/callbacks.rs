//! Inbound results from the external classifier

use axum::{extract::State, http::HeaderMap, Json};

use crate::error::Result;
use crate::gateway::{CallbackPayload, CALLBACK_SECRET_HEADER};
use crate::server::state::AppState;
use crate::types::CallbackAck;

/// POST /api/callbacks/classification - One classification result
pub async fn receive_classification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CallbackPayload>,
) -> Result<Json<CallbackAck>> {
    let secret = headers
        .get(CALLBACK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    state.callbacks().verify(secret)?;

    tracing::debug!(
        "callback {:?} for job {} (index {}, more data: {})",
        payload.kind,
        payload.job_id,
        payload.section_index,
        payload.more_data
    );

    let ack = state.callbacks().handle(&payload)?;
    Ok(Json(ack))
}
