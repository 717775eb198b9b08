//! `POST /v1/lifelog/ingest` (spec §6) — a synchronous wrapper over the
//! ingest pipeline's worker queue, for callers that push images over the
//! Control HTTP API rather than the southbound adapter (e.g. a bridge
//! process for a camera that has no MQTT/WebSocket uplink).

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use base64::Engine;
use serde::Deserialize;

use ocn_domain::error::Error;

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct IngestRequest {
    pub session_id: String,
    /// Base64-encoded image bytes (standard alphabet, padded).
    pub image_base64: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default = "default_mime")]
    pub mime: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_mime() -> String {
    "image/jpeg".to_string()
}

pub async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<impl IntoResponse> {
    let image_bytes = base64::engine::general_purpose::STANDARD
        .decode(&req.image_base64)
        .map_err(|e| Error::BadRequest(format!("invalid base64 image: {e}")))?;

    let outcome = state
        .lifelog
        .ingest(
            req.session_id,
            image_bytes,
            req.question,
            req.mime,
            req.metadata,
            AppState::now_ms(),
        )
        .await?;

    Ok(Json(serde_json::json!({
        "image_id": outcome.image_id,
        "image_uri": outcome.image_uri,
        "dedup": outcome.dedup,
        "context": outcome.context,
    })))
}
