use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_low_confidence_threshold")]
    pub low_confidence_threshold: f32,
    #[serde(default = "d_max_output_chars")]
    pub max_output_chars: usize,
    #[serde(default = "d_true")]
    pub prepend_caution_for_risk: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            low_confidence_threshold: d_low_confidence_threshold(),
            max_output_chars: d_max_output_chars(),
            prepend_caution_for_risk: d_true(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_low_confidence_threshold() -> f32 {
    0.55
}
fn d_max_output_chars() -> usize {
    1200
}
