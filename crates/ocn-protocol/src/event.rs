use serde::{Deserialize, Serialize};
use std::fmt;

/// Device → runtime event types (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    Hello,
    Heartbeat,
    ListenStart,
    AudioChunk,
    ListenStop,
    ImageReady,
    Telemetry,
    ToolResult,
    Close,
    /// A `type` string the runtime does not recognize. Preserved verbatim
    /// so the envelope still round-trips; the adapter's alias table is the
    /// only place expected to rewrite these before dispatch.
    Unknown(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Hello => "hello",
            EventType::Heartbeat => "heartbeat",
            EventType::ListenStart => "listen_start",
            EventType::AudioChunk => "audio_chunk",
            EventType::ListenStop => "listen_stop",
            EventType::ImageReady => "image_ready",
            EventType::Telemetry => "telemetry",
            EventType::ToolResult => "tool_result",
            EventType::Close => "close",
            EventType::Unknown(s) => s,
        }
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(self, EventType::Heartbeat | EventType::Hello)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "hello" => EventType::Hello,
            "heartbeat" => EventType::Heartbeat,
            "listen_start" => EventType::ListenStart,
            "audio_chunk" => EventType::AudioChunk,
            "listen_stop" => EventType::ListenStop,
            "image_ready" => EventType::ImageReady,
            "telemetry" => EventType::Telemetry,
            "tool_result" => EventType::ToolResult,
            "close" => EventType::Close,
            other => EventType::Unknown(other.to_owned()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::from(s.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(EventType::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_variant() {
        let t = EventType::from("listen_stop");
        assert_eq!(t, EventType::ListenStop);
        assert_eq!(t.as_str(), "listen_stop");
    }

    #[test]
    fn preserves_unknown_string() {
        let t = EventType::from("vendor_specific_event");
        assert_eq!(t.as_str(), "vendor_specific_event");
        assert!(matches!(t, EventType::Unknown(_)));
    }

    #[test]
    fn hello_and_heartbeat_are_idempotent() {
        assert!(EventType::Hello.is_idempotent());
        assert!(EventType::Heartbeat.is_idempotent());
        assert!(!EventType::AudioChunk.is_idempotent());
    }
}
