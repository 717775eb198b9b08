use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalTaskConfig {
    #[serde(default = "d_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "d_default_timeout")]
    pub default_timeout_seconds: u64,
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "d_retry_count")]
    pub status_retry_count: u32,
    #[serde(default = "d_retry_backoff_ms")]
    pub status_retry_backoff_ms: u64,
}

impl Default for DigitalTaskConfig {
    fn default() -> Self {
        Self {
            sqlite_path: d_sqlite_path(),
            default_timeout_seconds: d_default_timeout(),
            max_concurrent_tasks: d_max_concurrent(),
            status_retry_count: d_retry_count(),
            status_retry_backoff_ms: d_retry_backoff_ms(),
        }
    }
}

fn d_sqlite_path() -> String {
    "./data/opencane.db".to_string()
}
fn d_default_timeout() -> u64 {
    120
}
fn d_max_concurrent() -> usize {
    8
}
fn d_retry_count() -> u32 {
    3
}
fn d_retry_backoff_ms() -> u64 {
    500
}
