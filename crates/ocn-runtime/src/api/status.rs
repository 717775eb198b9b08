//! `GET /v1/runtime/status` (spec §6) — a snapshot of runtime liveness,
//! per-device session state, ingest queue depth, and the active policy
//! gate configuration, used by health probes and the seed suite.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct StatusResponse {
    running: bool,
    adapter_kind: String,
    active_sessions: usize,
    devices: Vec<DeviceStatus>,
    lifelog: LifelogStatus,
    metrics: MetricsStatus,
    safety: SafetyStatus,
    interaction: InteractionStatus,
}

#[derive(Serialize)]
struct DeviceStatus {
    device_id: String,
    session_id: String,
    state: String,
    last_seen: i64,
    last_inbound_seq: u64,
    last_outbound_seq: u64,
}

#[derive(Serialize)]
struct LifelogStatus {
    queue_depth: usize,
    in_flight: usize,
    processed: u64,
    failed: u64,
    rejected: u64,
}

#[derive(Serialize)]
struct MetricsStatus {
    tool_domains_registered: usize,
}

#[derive(Serialize)]
struct SafetyStatus {
    enabled: bool,
    low_confidence_threshold: f32,
    max_output_chars: usize,
}

#[derive(Serialize)]
struct InteractionStatus {
    enabled: bool,
    emotion_enabled: bool,
    proactive_enabled: bool,
    silent_enabled: bool,
    quiet_hours_enabled: bool,
}

pub async fn runtime_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.lifelog.metrics();
    let devices = state
        .sessions
        .list_active()
        .into_iter()
        .map(|row| DeviceStatus {
            device_id: row.device_id,
            session_id: row.session_id,
            state: format!("{:?}", row.state),
            last_seen: row.last_seen,
            last_inbound_seq: row.last_inbound_seq,
            last_outbound_seq: row.last_outbound_seq,
        })
        .collect();

    Json(StatusResponse {
        running: true,
        adapter_kind: format!("{:?}", state.config.hardware.adapter),
        active_sessions: state.sessions.active_count(),
        devices,
        lifelog: LifelogStatus {
            queue_depth: snapshot.depth,
            in_flight: snapshot.in_flight,
            processed: snapshot.processed_total,
            failed: snapshot.failed_total,
            rejected: snapshot.rejected_total,
        },
        metrics: MetricsStatus {
            tool_domains_registered: state.tool_domains.registered_count(),
        },
        safety: SafetyStatus {
            enabled: state.safety.enabled,
            low_confidence_threshold: state.safety.low_confidence_threshold,
            max_output_chars: state.safety.max_output_chars,
        },
        interaction: InteractionStatus {
            enabled: state.interaction.enabled,
            emotion_enabled: state.interaction.emotion_enabled,
            proactive_enabled: state.interaction.proactive_enabled,
            silent_enabled: state.interaction.silent_enabled,
            quiet_hours_enabled: state.interaction.quiet_hours_enabled,
        },
    })
}
