//! Thought-trace events (spec §3, §9). Any runtime event carrying a
//! `trace_id` both logs a structured `tracing` line and, via
//! [`TraceEvent::to_row`], produces a row shape the durable store's
//! `thought_traces` table can persist for replay.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        device_id: String,
        session_id: String,
    },
    SessionClosed {
        device_id: String,
        session_id: String,
        reason: String,
    },
    HeartbeatAck {
        session_id: String,
        ack_seq: u64,
        duplicate: bool,
    },
    VoiceTurnStarted {
        session_id: String,
        transcript_chars: usize,
    },
    VoiceTurnCompleted {
        session_id: String,
        stt_ms: u64,
        agent_ms: u64,
        total_ms: u64,
    },
    VoiceTurnFailed {
        session_id: String,
        reason: String,
    },
    VisionTurnCompleted {
        session_id: String,
        risk_level: String,
    },
    BargeIn {
        session_id: String,
    },
    SafetyPolicyApplied {
        session_id: String,
        risk_level: String,
        downgraded: bool,
        rule_ids: Vec<String>,
    },
    InteractionPolicyApplied {
        session_id: String,
        should_speak: bool,
        reason: String,
    },
    ToolCallDenied {
        session_id: String,
        tool_name: String,
        domain: String,
    },
    IngestJobEnqueued {
        session_id: String,
        queue_depth: usize,
    },
    IngestJobProcessed {
        session_id: String,
        image_id: String,
        is_dedup: bool,
    },
    DigitalTaskTransition {
        task_id: String,
        from_status: String,
        to_status: String,
    },
    AuthDenied {
        device_id: String,
        reason: String,
    },
}

impl TraceEvent {
    /// The stage name used both in the `tracing` span and in the
    /// persisted `thought_traces.stage` column.
    pub fn stage(&self) -> &'static str {
        match self {
            TraceEvent::SessionCreated { .. } => "session_created",
            TraceEvent::SessionClosed { .. } => "session_closed",
            TraceEvent::HeartbeatAck { .. } => "heartbeat_ack",
            TraceEvent::VoiceTurnStarted { .. } => "voice_turn_started",
            TraceEvent::VoiceTurnCompleted { .. } => "voice_turn_completed",
            TraceEvent::VoiceTurnFailed { .. } => "voice_turn_failed",
            TraceEvent::VisionTurnCompleted { .. } => "vision_turn_completed",
            TraceEvent::BargeIn { .. } => "barge_in",
            TraceEvent::SafetyPolicyApplied { .. } => "safety_policy",
            TraceEvent::InteractionPolicyApplied { .. } => "interaction_policy",
            TraceEvent::ToolCallDenied { .. } => "tool_call_denied",
            TraceEvent::IngestJobEnqueued { .. } => "ingest_job_enqueued",
            TraceEvent::IngestJobProcessed { .. } => "ingest_job_processed",
            TraceEvent::DigitalTaskTransition { .. } => "digital_task_transition",
            TraceEvent::AuthDenied { .. } => "auth_denied",
        }
    }

    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ocn_event");
    }

    /// Build a persistable row for `thought_traces`, stamping the event
    /// also into `tracing` as a side effect.
    pub fn to_row(&self, trace_id: &str, session_id: &str, source: &str, ts_ms: i64) -> ThoughtTraceRow {
        self.emit();
        ThoughtTraceRow {
            trace_id: trace_id.to_owned(),
            session_id: session_id.to_owned(),
            source: source.to_owned(),
            stage: self.stage().to_owned(),
            payload: serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
            ts_ms,
        }
    }
}

/// A single `thought_traces` row (spec §3), addressable by `trace_id` for
/// replay/auditing. Append-only.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ThoughtTraceRow {
    pub trace_id: String,
    pub session_id: String,
    pub source: String,
    pub stage: String,
    pub payload: serde_json::Value,
    pub ts_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_snake_case() {
        let ev = TraceEvent::BargeIn {
            session_id: "s1".into(),
        };
        assert_eq!(ev.stage(), "barge_in");
    }

    #[test]
    fn to_row_carries_trace_id_and_stage() {
        let ev = TraceEvent::AuthDenied {
            device_id: "d1".into(),
            reason: "bad token".into(),
        };
        let row = ev.to_row("trace-1", "sess-1", "policy", 42);
        assert_eq!(row.trace_id, "trace-1");
        assert_eq!(row.stage, "auth_denied");
        assert_eq!(row.ts_ms, 42);
    }
}
