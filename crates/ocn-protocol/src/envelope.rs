use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::CommandType;
use crate::event::EventType;

/// Direction a canonical envelope travels (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Event,
    Command,
}

/// The tagged `type` payload of an envelope, scoped by direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeKind {
    Event(EventType),
    Command(CommandType),
}

impl EnvelopeKind {
    pub fn direction(&self) -> Direction {
        match self {
            EnvelopeKind::Event(_) => Direction::Event,
            EnvelopeKind::Command(_) => Direction::Command,
        }
    }

    pub fn type_str(&self) -> &str {
        match self {
            EnvelopeKind::Event(e) => e.as_str(),
            EnvelopeKind::Command(c) => c.as_str(),
        }
    }

    pub fn as_event(&self) -> Option<&EventType> {
        match self {
            EnvelopeKind::Event(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_command(&self) -> Option<&CommandType> {
        match self {
            EnvelopeKind::Command(c) => Some(c),
            _ => None,
        }
    }
}

/// `device_operation.op_type` (spec §3). `command_type` is derived 1:1 from
/// this via `CommandType::from`/`OpType::from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpType {
    SetConfig,
    ToolCall,
    OtaPlan,
    Unknown(String),
}

impl OpType {
    pub fn as_str(&self) -> &str {
        match self {
            OpType::SetConfig => "set_config",
            OpType::ToolCall => "tool_call",
            OpType::OtaPlan => "ota_plan",
            OpType::Unknown(s) => s,
        }
    }
}

impl Serialize for OpType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(OpType::from(s.as_str()))
    }
}

/// Wire-shape used only for serde plumbing; never constructed directly
/// outside this module.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEnvelope {
    direction: Direction,
    #[serde(rename = "type")]
    msg_type: String,
    device_id: String,
    session_id: String,
    seq: u64,
    ts_ms: i64,
    #[serde(default)]
    payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
}

/// The canonical envelope (spec §3). A value type: once built it is never
/// mutated in place, only cloned or replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub device_id: String,
    pub session_id: String,
    pub seq: u64,
    pub ts_ms: i64,
    pub payload: Map<String, Value>,
    pub trace_id: Option<String>,
}

impl Envelope {
    pub fn new_event(
        event: EventType,
        device_id: impl Into<String>,
        session_id: impl Into<String>,
        seq: u64,
        ts_ms: i64,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Event(event),
            device_id: device_id.into(),
            session_id: session_id.into(),
            seq,
            ts_ms,
            payload,
            trace_id: None,
        }
    }

    pub fn new_command(
        command: CommandType,
        device_id: impl Into<String>,
        session_id: impl Into<String>,
        seq: u64,
        ts_ms: i64,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Command(command),
            device_id: device_id.into(),
            session_id: session_id.into(),
            seq,
            ts_ms,
            payload,
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }

    pub fn type_str(&self) -> &str {
        self.kind.type_str()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }
}

impl Serialize for Envelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let raw = RawEnvelope {
            direction: self.kind.direction(),
            msg_type: self.kind.type_str().to_owned(),
            device_id: self.device_id.clone(),
            session_id: self.session_id.clone(),
            seq: self.seq,
            ts_ms: self.ts_ms,
            payload: self.payload.clone(),
            trace_id: self.trace_id.clone(),
        };
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawEnvelope::deserialize(deserializer)?;
        let kind = match raw.direction {
            Direction::Event => EnvelopeKind::Event(EventType::from(raw.msg_type)),
            Direction::Command => EnvelopeKind::Command(CommandType::from(raw.msg_type)),
        };
        Ok(Envelope {
            kind,
            device_id: raw.device_id,
            session_id: raw.session_id,
            seq: raw.seq,
            ts_ms: raw.ts_ms,
            payload: raw.payload,
            trace_id: raw.trace_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn round_trips_through_json() {
        let env = Envelope::new_event(
            EventType::AudioChunk,
            "dev-1",
            "sess-1",
            3,
            1_700_000_000_000,
            payload(&[("chunk_index", Value::from(1)), ("text", Value::from("hi"))]),
        )
        .with_trace_id("trace-abc");

        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"audio_chunk\""));
        assert!(json.contains("\"direction\":\"event\""));

        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn unknown_type_round_trips() {
        let json = r#"{"direction":"event","type":"vendor_blip","device_id":"d","session_id":"s","seq":1,"ts_ms":0,"payload":{}}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.type_str(), "vendor_blip");
        let back = serde_json::to_string(&env).unwrap();
        assert!(back.contains("vendor_blip"));
    }

    #[test]
    fn missing_payload_defaults_empty() {
        let json = r#"{"direction":"command","type":"ack","device_id":"d","session_id":"s","seq":1,"ts_ms":0}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert!(env.payload.is_empty());
    }

    #[test]
    fn command_envelope_has_command_direction() {
        let env = Envelope::new_command(
            CommandType::TtsStop,
            "d",
            "s",
            9,
            0,
            payload(&[("aborted", Value::from(true))]),
        );
        assert_eq!(env.direction(), Direction::Command);
        assert_eq!(env.get("aborted").and_then(Value::as_bool), Some(true));
    }
}
