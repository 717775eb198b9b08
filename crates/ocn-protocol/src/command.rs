use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime → device command types (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandType {
    HelloAck,
    Ack,
    SttPartial,
    SttFinal,
    TtsStart,
    TtsChunk,
    TtsStop,
    TaskUpdate,
    SetConfig,
    ToolCall,
    OtaPlan,
    Close,
    Unknown(String),
}

impl CommandType {
    pub fn as_str(&self) -> &str {
        match self {
            CommandType::HelloAck => "hello_ack",
            CommandType::Ack => "ack",
            CommandType::SttPartial => "stt_partial",
            CommandType::SttFinal => "stt_final",
            CommandType::TtsStart => "tts_start",
            CommandType::TtsChunk => "tts_chunk",
            CommandType::TtsStop => "tts_stop",
            CommandType::TaskUpdate => "task_update",
            CommandType::SetConfig => "set_config",
            CommandType::ToolCall => "tool_call",
            CommandType::OtaPlan => "ota_plan",
            CommandType::Close => "close",
            CommandType::Unknown(s) => s,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for CommandType {
    fn from(s: &str) -> Self {
        match s {
            "hello_ack" => CommandType::HelloAck,
            "ack" => CommandType::Ack,
            "stt_partial" => CommandType::SttPartial,
            "stt_final" => CommandType::SttFinal,
            "tts_start" => CommandType::TtsStart,
            "tts_chunk" => CommandType::TtsChunk,
            "tts_stop" => CommandType::TtsStop,
            "task_update" => CommandType::TaskUpdate,
            "set_config" => CommandType::SetConfig,
            "tool_call" => CommandType::ToolCall,
            "ota_plan" => CommandType::OtaPlan,
            "close" => CommandType::Close,
            other => CommandType::Unknown(other.to_owned()),
        }
    }
}

impl From<String> for CommandType {
    fn from(s: String) -> Self {
        CommandType::from(s.as_str())
    }
}

/// 1:1 derivation for `device_operation.command_type` from `op_type` (§3).
impl From<&str> for crate::envelope::OpType {
    fn from(s: &str) -> Self {
        match s {
            "set_config" => crate::envelope::OpType::SetConfig,
            "tool_call" => crate::envelope::OpType::ToolCall,
            "ota_plan" => crate::envelope::OpType::OtaPlan,
            other => crate::envelope::OpType::Unknown(other.to_owned()),
        }
    }
}

impl Serialize for CommandType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommandType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(CommandType::from(s))
    }
}
