use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_quiet_start")]
    pub start_hour: u8,
    #[serde(default = "d_quiet_end")]
    pub end_hour: u8,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: d_quiet_start(),
            end_hour: d_quiet_end(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_true")]
    pub emotion_enabled: bool,
    #[serde(default = "d_true")]
    pub proactive_enabled: bool,
    #[serde(default = "d_true")]
    pub silent_enabled: bool,
    #[serde(default = "d_low_confidence_threshold")]
    pub low_confidence_threshold: f32,
    #[serde(default = "d_high_risk_levels")]
    pub high_risk_levels: Vec<String>,
    #[serde(default)]
    pub proactive_sources: Vec<String>,
    #[serde(default = "d_silent_sources")]
    pub silent_sources: Vec<String>,
    #[serde(default, rename = "quiet_hours")]
    pub quiet_hours: QuietHoursConfig,
    #[serde(default = "d_true")]
    pub suppress_low_priority_in_quiet_hours: bool,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            emotion_enabled: d_true(),
            proactive_enabled: d_true(),
            silent_enabled: d_true(),
            low_confidence_threshold: d_low_confidence_threshold(),
            high_risk_levels: d_high_risk_levels(),
            proactive_sources: Vec::new(),
            silent_sources: d_silent_sources(),
            quiet_hours: QuietHoursConfig::default(),
            suppress_low_priority_in_quiet_hours: d_true(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_low_confidence_threshold() -> f32 {
    0.5
}
fn d_high_risk_levels() -> Vec<String> {
    vec!["P0".to_string(), "P1".to_string()]
}
fn d_silent_sources() -> Vec<String> {
    vec!["telemetry".to_string()]
}
fn d_quiet_start() -> u8 {
    22
}
fn d_quiet_end() -> u8 {
    7
}
