use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Mock,
    Websocket,
    Mqtt,
    Ec600,
    GenericMqtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsMode {
    DeviceText,
    ServerAudio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_adapter")]
    pub adapter: AdapterKind,
    #[serde(default = "d_profile")]
    pub device_profile: String,
    #[serde(default)]
    pub profile_overrides: HashMap<String, String>,
    #[serde(default = "d_tts_mode")]
    pub tts_mode: TtsMode,
    #[serde(default = "d_tts_chunk_bytes")]
    pub tts_audio_chunk_bytes: usize,
    #[serde(default)]
    pub network_profile: Option<String>,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub control_host: String,
    #[serde(default = "d_control_port")]
    pub control_port: u16,
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_seconds: u64,
    #[serde(default)]
    pub packet_magic: Option<u8>,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            adapter: d_adapter(),
            device_profile: d_profile(),
            profile_overrides: HashMap::new(),
            tts_mode: d_tts_mode(),
            tts_audio_chunk_bytes: d_tts_chunk_bytes(),
            network_profile: None,
            host: d_host(),
            port: d_port(),
            control_host: d_host(),
            control_port: d_control_port(),
            heartbeat_seconds: d_heartbeat_secs(),
            packet_magic: None,
            audio: AudioConfig::default(),
            auth: AuthConfig::default(),
            mqtt: MqttConfig::default(),
            control_plane: ControlPlaneConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub enable_vad: bool,
    #[serde(default = "d_prebuffer_chunks")]
    pub prebuffer_chunks: usize,
    #[serde(default = "d_jitter_window")]
    pub jitter_window: usize,
    #[serde(default = "d_vad_silence_chunks")]
    pub vad_silence_chunks: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enable_vad: false,
            prebuffer_chunks: d_prebuffer_chunks(),
            jitter_window: d_jitter_window(),
            vad_silence_chunks: d_vad_silence_chunks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_rpm")]
    pub rpm: u32,
    #[serde(default = "d_burst")]
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplayProtectionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_replay_window_secs")]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub device_auth_enabled: bool,
    #[serde(default)]
    pub allow_unbound_devices: bool,
    #[serde(default = "d_true")]
    pub require_activated_devices: bool,
    #[serde(default)]
    pub control_api_rate_limit: RateLimitConfig,
    #[serde(default)]
    pub control_api_replay_protection: ReplayProtectionConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            device_auth_enabled: false,
            allow_unbound_devices: false,
            require_activated_devices: d_true(),
            control_api_rate_limit: RateLimitConfig::default(),
            control_api_replay_protection: ReplayProtectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "d_client_id")]
    pub client_id: String,
    #[serde(default = "d_keepalive_secs")]
    pub keepalive_seconds: u64,
    #[serde(default = "d_reconnect_min")]
    pub reconnect_min_seconds: u64,
    #[serde(default = "d_reconnect_max")]
    pub reconnect_max_seconds: u64,
    #[serde(default = "d_qos")]
    pub qos_control: u8,
    #[serde(default = "d_qos")]
    pub qos_audio: u8,
    #[serde(default = "d_up_control_topic")]
    pub up_control_topic: String,
    #[serde(default = "d_up_audio_topic")]
    pub up_audio_topic: String,
    #[serde(default = "d_down_control_topic_template")]
    pub down_control_topic_template: String,
    #[serde(default = "d_down_audio_topic_template")]
    pub down_audio_topic_template: String,
    #[serde(default = "d_true")]
    pub replay_enabled: bool,
    #[serde(default = "d_replay_window")]
    pub control_replay_window: usize,
    #[serde(default = "d_offline_buffer")]
    pub offline_control_buffer: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_mqtt_port(),
            username: None,
            password: None,
            client_id: d_client_id(),
            keepalive_seconds: d_keepalive_secs(),
            reconnect_min_seconds: d_reconnect_min(),
            reconnect_max_seconds: d_reconnect_max(),
            qos_control: d_qos(),
            qos_audio: d_qos(),
            up_control_topic: d_up_control_topic(),
            up_audio_topic: d_up_audio_topic(),
            down_control_topic_template: d_down_control_topic_template(),
            down_audio_topic_template: d_down_audio_topic_template(),
            replay_enabled: d_true(),
            control_replay_window: d_replay_window(),
            offline_control_buffer: d_offline_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "d_control_plane_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "d_control_plane_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_token: None,
            timeout_seconds: d_control_plane_timeout(),
            cache_ttl_seconds: d_control_plane_cache_ttl(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_adapter() -> AdapterKind {
    AdapterKind::Mock
}
fn d_profile() -> String {
    "mock".to_string()
}
fn d_tts_mode() -> TtsMode {
    TtsMode::DeviceText
}
fn d_tts_chunk_bytes() -> usize {
    4096
}
fn d_host() -> String {
    "0.0.0.0".to_string()
}
fn d_port() -> u16 {
    7700
}
fn d_control_port() -> u16 {
    7701
}
fn d_heartbeat_secs() -> u64 {
    30
}
fn d_prebuffer_chunks() -> usize {
    2
}
fn d_jitter_window() -> usize {
    8
}
fn d_vad_silence_chunks() -> usize {
    6
}
fn d_rpm() -> u32 {
    120
}
fn d_burst() -> u32 {
    30
}
fn d_replay_window_secs() -> u64 {
    30
}
fn d_mqtt_port() -> u16 {
    1883
}
fn d_client_id() -> String {
    "opencane-runtime".to_string()
}
fn d_keepalive_secs() -> u64 {
    60
}
fn d_reconnect_min() -> u64 {
    1
}
fn d_reconnect_max() -> u64 {
    60
}
fn d_qos() -> u8 {
    1
}
fn d_up_control_topic() -> String {
    "device/+/up/control".to_string()
}
fn d_up_audio_topic() -> String {
    "device/+/up/audio".to_string()
}
fn d_down_control_topic_template() -> String {
    "device/{id}/down/control".to_string()
}
fn d_down_audio_topic_template() -> String {
    "device/{id}/down/audio".to_string()
}
fn d_replay_window() -> usize {
    64
}
fn d_offline_buffer() -> usize {
    100
}
fn d_control_plane_timeout() -> u64 {
    5
}
fn d_control_plane_cache_ttl() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_adapter_is_mock() {
        assert_eq!(HardwareConfig::default().adapter, AdapterKind::Mock);
    }

    #[test]
    fn default_heartbeat_is_nonzero() {
        assert!(HardwareConfig::default().heartbeat_seconds > 0);
    }
}
