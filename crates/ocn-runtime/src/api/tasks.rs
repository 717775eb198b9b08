//! Digital task endpoints (spec §4.7, §6): execute a goal, cancel a
//! running task, and fetch a task's current state.
//!
//! `DigitalTaskService` has no list/stats surface, so those spec-named
//! operations are not exposed here — see DESIGN.md.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use ocn_tasks::service::ExecuteTaskRequest;

use crate::api::error::ApiResult;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub session_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub goal: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub speak: bool,
    #[serde(default)]
    pub interrupt_previous: bool,
}

pub async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<impl IntoResponse> {
    let row = state
        .tasks
        .execute(
            ExecuteTaskRequest {
                session_id: req.session_id,
                device_id: req.device_id,
                goal: req.goal,
                timeout_seconds: req.timeout_seconds,
                notify: req.notify,
                speak: req.speak,
                interrupt_previous: req.interrupt_previous,
            },
            AppState::now_ms(),
        )
        .await?;
    Ok(Json(row))
}

pub async fn get(State(state): State<AppState>, Path(task_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let row = state.tasks.get_task(&task_id).await?;
    Ok(Json(row))
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "canceled_by_api".to_string()
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<impl IntoResponse> {
    let row = state.tasks.cancel(&task_id, &req.reason).await?;
    Ok(Json(row))
}
