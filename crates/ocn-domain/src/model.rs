//! Durable-store row shapes (spec §3). These are plain data; the durable
//! store (`ocn-store`) owns persistence, the session manager/lifelog
//! pipeline/task service own the business rules that produce them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Device Session ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    Listening,
    Thinking,
    Speaking,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Listening => "listening",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
            SessionState::Closed => "closed",
        }
    }
}

/// A single fragment of inbound audio, ordered by `chunk_index`
/// independent of envelope `seq` (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunk {
    pub chunk_index: u64,
    pub text: Option<String>,
    pub audio_b64: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetrySnapshot {
    pub battery: Option<serde_json::Value>,
    pub network: Option<serde_json::Value>,
    pub location: Option<serde_json::Value>,
    pub imu: Option<serde_json::Value>,
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSessionRow {
    pub device_id: String,
    pub session_id: String,
    pub state: SessionState,
    pub created_at: i64,
    pub last_seen: i64,
    pub closed_at: Option<i64>,
    pub close_reason: Option<String>,
    pub last_inbound_seq: u64,
    pub last_outbound_seq: u64,
    pub metadata: HashMap<String, serde_json::Value>,
    pub telemetry_snapshot: TelemetrySnapshot,
    pub pending_audio_chunks: Vec<AudioChunk>,
}

impl DeviceSessionRow {
    pub fn new(device_id: impl Into<String>, session_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            device_id: device_id.into(),
            session_id: session_id.into(),
            state: SessionState::Connecting,
            created_at: now_ms,
            last_seen: now_ms,
            closed_at: None,
            close_reason: None,
            last_inbound_seq: 0,
            last_outbound_seq: 0,
            metadata: HashMap::new(),
            telemetry_snapshot: TelemetrySnapshot::default(),
            pending_audio_chunks: Vec::new(),
        }
    }
}

// ── Device Binding ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    Registered,
    Bound,
    Activated,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBindingRow {
    pub device_id: String,
    pub device_token: String,
    pub status: BindingStatus,
    pub user_id: Option<String>,
    pub activated_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub revoke_reason: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

// ── Device Operation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Sent,
    Acked,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOperationRow {
    pub operation_id: String,
    pub device_id: String,
    pub session_id: String,
    pub op_type: String,
    pub command_type: String,
    pub status: OperationStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub acked_at: Option<i64>,
}

// ── Digital Task ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub stage: String,
    pub ts_ms: i64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushContext {
    pub device_id: Option<String>,
    pub notify: bool,
    pub speak: bool,
    pub interrupt_previous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalTaskRow {
    pub task_id: String,
    pub session_id: String,
    pub device_id: Option<String>,
    pub goal: String,
    pub status: TaskStatus,
    pub steps: Vec<TaskStep>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timeout_seconds: u64,
    pub push_context: PushContext,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DigitalTaskRow {
    /// Append a step and move to a new status, honoring the "canceled
    /// wins" invariant (spec §3): once `canceled`, no later transition is
    /// accepted.
    pub fn transition(&mut self, status: TaskStatus, now_ms: i64, detail: Option<String>) -> bool {
        if self.status == TaskStatus::Canceled {
            return false;
        }
        self.status = status;
        self.updated_at = now_ms;
        self.steps.push(TaskStep {
            stage: format!("{:?}", status).to_lowercase(),
            ts_ms: now_ms,
            detail,
        });
        true
    }
}

// ── Lifelog ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    P0,
    P1,
    P2,
    P3,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::P0 => "P0",
            RiskLevel::P1 => "P1",
            RiskLevel::P2 => "P2",
            RiskLevel::P3 => "P3",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifelogImageRow {
    pub image_id: String,
    pub session_id: String,
    pub image_uri: String,
    pub dhash: u64,
    pub is_dedup: bool,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifelogContextRow {
    pub image_id: String,
    pub semantic_title: String,
    pub semantic_summary: String,
    pub objects: Vec<String>,
    pub ocr: Vec<String>,
    pub risk_hints: Vec<String>,
    pub actionable_summary: String,
    pub risk_level: RiskLevel,
    pub risk_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifelogEventRow {
    pub session_id: String,
    pub event_type: String,
    pub ts_ms: i64,
    pub payload: serde_json::Value,
    pub risk_level: Option<RiskLevel>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySampleRow {
    pub session_id: String,
    pub schema_version: String,
    pub ts_ms: i64,
    pub normalized: TelemetrySnapshot,
    pub raw: serde_json::Value,
}

impl TelemetrySampleRow {
    pub const SCHEMA_VERSION: &'static str = "opencane.telemetry.v1";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushQueueStatus {
    Pending,
    Delivered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushQueueRow {
    pub id: String,
    pub device_id: String,
    pub session_id: String,
    pub payload: serde_json::Value,
    pub status: PushQueueStatus,
    pub idempotent_key: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySampleRow {
    pub name: String,
    pub value: f64,
    pub ts_ms: i64,
    pub tags: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_wins_over_later_success() {
        let mut task = DigitalTaskRow {
            task_id: "t1".into(),
            session_id: "s1".into(),
            device_id: None,
            goal: "book a table".into(),
            status: TaskStatus::Running,
            steps: vec![],
            result: None,
            error: None,
            timeout_seconds: 120,
            push_context: PushContext::default(),
            created_at: 0,
            updated_at: 0,
        };
        assert!(task.transition(TaskStatus::Canceled, 10, Some("interrupted".into())));
        assert!(!task.transition(TaskStatus::Success, 20, None));
        assert_eq!(task.status, TaskStatus::Canceled);
        assert_eq!(task.steps.len(), 1);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn risk_level_ordering_p0_is_highest_severity_first() {
        assert!(RiskLevel::P0 < RiskLevel::P1);
    }
}
