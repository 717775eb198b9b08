//! `POST /v1/policy/preview` (spec §6) — dry-run the safety and
//! interaction gates against sample text without a live session, for
//! operator tooling that needs to inspect the active policy
//! configuration's behavior.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use ocn_policy::InteractionContext;

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PreviewRequest {
    pub text: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_confidence() -> f32 {
    0.9
}

fn default_source() -> String {
    "voice_reply".into()
}

#[derive(Serialize)]
pub struct PreviewResponse {
    safety_text: String,
    safety_downgraded: bool,
    safety_risk_level: String,
    should_speak: bool,
    interaction_text: String,
    interaction_reason: String,
}

pub async fn preview(
    State(state): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let safety = state.safety.evaluate(&req.text, req.confidence, req.risk_level.as_deref());
    let decision = state.interaction.evaluate(
        &safety.text,
        &req.source,
        req.confidence,
        &safety.risk_level,
        &InteractionContext::default(),
        true,
        crate::orchestrator::current_hour(),
    );
    Ok(Json(PreviewResponse {
        safety_text: safety.text,
        safety_downgraded: safety.downgraded,
        safety_risk_level: safety.risk_level,
        should_speak: decision.should_speak,
        interaction_text: decision.text,
        interaction_reason: decision.reason,
    }))
}
