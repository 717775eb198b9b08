//! Device binding and operation endpoints (spec §4.6, §6): register a
//! device, bind it to a user, activate it with a minted token, revoke
//! it, and record/query southbound operations.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use ocn_domain::error::Error;
use ocn_domain::model::{BindingStatus, DeviceBindingRow, DeviceOperationRow, OperationStatus};
use ocn_protocol::{CommandType, EventType};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub device_id: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Some(existing) = state.store.get_binding(&req.device_id).await? {
        return Ok(Json(existing));
    }
    let row = DeviceBindingRow {
        device_id: req.device_id,
        device_token: String::new(),
        status: BindingStatus::Registered,
        user_id: None,
        activated_at: None,
        revoked_at: None,
        revoke_reason: None,
        metadata: HashMap::new(),
    };
    state.store.upsert_binding(&row).await?;
    Ok(Json(row))
}

#[derive(Deserialize)]
pub struct BindRequest {
    pub user_id: String,
}

pub async fn bind(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<BindRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut row = state
        .store
        .get_binding(&device_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("device '{device_id}' is not registered")))?;
    if row.status == BindingStatus::Revoked {
        return Err(Error::PolicyDenied(format!("device '{device_id}' is revoked")).into());
    }
    row.user_id = Some(req.user_id);
    row.status = BindingStatus::Bound;
    state.store.upsert_binding(&row).await?;
    Ok(Json(row))
}

pub async fn activate(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let mut row = state
        .store
        .get_binding(&device_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("device '{device_id}' is not registered")))?;
    if row.status != BindingStatus::Bound {
        return Err(Error::BadRequest(format!(
            "device '{device_id}' must be bound before activation, is {:?}",
            row.status
        ))
        .into());
    }
    row.device_token = Uuid::new_v4().to_string();
    row.status = BindingStatus::Activated;
    row.activated_at = Some(AppState::now_ms());
    state.store.upsert_binding(&row).await?;
    Ok(Json(row))
}

#[derive(Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn revoke(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<RevokeRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut row = state
        .store
        .get_binding(&device_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("device '{device_id}' is not registered")))?;
    row.status = BindingStatus::Revoked;
    row.revoked_at = Some(AppState::now_ms());
    row.revoke_reason = req.reason;
    state.store.upsert_binding(&row).await?;
    Ok(Json(row))
}

#[derive(Deserialize)]
pub struct RecordOperationRequest {
    pub device_id: String,
    pub session_id: String,
    pub op_type: String,
    pub command_type: String,
    pub payload: serde_json::Value,
}

pub async fn record_operation(
    State(state): State<AppState>,
    Json(req): Json<RecordOperationRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = AppState::now_ms();
    let row = DeviceOperationRow {
        operation_id: Uuid::new_v4().to_string(),
        device_id: req.device_id,
        session_id: req.session_id,
        op_type: req.op_type,
        command_type: req.command_type,
        status: OperationStatus::Queued,
        payload: req.payload,
        result: None,
        error: None,
        created_at: now,
        updated_at: now,
        acked_at: None,
    };
    state.store.record_operation(&row).await?;
    Ok(Json(row))
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let row = state
        .store
        .get_operation(&operation_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("operation '{operation_id}' not found")))?;
    Ok(Json(row))
}

#[derive(Deserialize)]
pub struct DeviceEventRequest {
    pub device_id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// `POST /v1/device/event` — inject a canonical event as if it had
/// arrived over the southbound adapter, for backend integrations that
/// can't hold a live device connection (e.g. a companion mobile app
/// relaying a push notification tap).
pub async fn post_event(
    State(state): State<AppState>,
    Json(req): Json<DeviceEventRequest>,
) -> ApiResult<impl IntoResponse> {
    let envelope = ocn_protocol::Envelope::new_event(
        EventType::from(req.event_type.as_str()),
        req.device_id,
        req.session_id,
        req.seq,
        AppState::now_ms(),
        req.payload,
    );
    state.adapter.inject(envelope).await?;
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Deserialize)]
pub struct DeviceCommandRequest {
    pub device_id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// `POST /v1/device/command` — send a canonical command straight to a
/// device, bypassing the orchestrator's turn loop. Used for operator
/// tooling (force a close, push a config update) rather than the normal
/// voice/vision reply path.
pub async fn post_command(
    State(state): State<AppState>,
    Json(req): Json<DeviceCommandRequest>,
) -> ApiResult<impl IntoResponse> {
    let envelope = ocn_protocol::Envelope::new_command(
        CommandType::from(req.command_type.as_str()),
        req.device_id,
        req.session_id,
        req.seq,
        AppState::now_ms(),
        req.payload,
    );
    state.adapter.send(envelope).await?;
    Ok(Json(serde_json::json!({"success": true})))
}

#[derive(Deserialize)]
pub struct TraceQuery {
    #[serde(default = "default_trace_limit")]
    pub limit: usize,
}

fn default_trace_limit() -> usize {
    50
}

/// `GET /v1/sessions/:session_id/traces` — the thought-trace audit trail
/// for one session, newest first.
pub async fn list_traces(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<TraceQuery>,
) -> ApiResult<impl IntoResponse> {
    let traces = state.store.list_thought_traces(&session_id, query.limit).await?;
    Ok(Json(traces))
}
