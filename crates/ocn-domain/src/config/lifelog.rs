use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    Chroma,
    Qdrant,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Reject,
    Wait,
    DropOldest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifelogConfig {
    #[serde(default = "d_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "d_vector_backend")]
    pub vector_backend: VectorBackend,
    #[serde(default = "d_queue_max_size")]
    pub ingest_queue_max_size: usize,
    #[serde(default = "d_ingest_workers")]
    pub ingest_workers: usize,
    #[serde(default = "d_overflow_policy")]
    pub ingest_overflow_policy: OverflowPolicy,
    #[serde(default = "d_enqueue_timeout_ms")]
    pub ingest_enqueue_timeout_ms: u64,
    #[serde(default = "d_top_k")]
    pub default_top_k: usize,
    #[serde(default = "d_max_timeline_items")]
    pub max_timeline_items: usize,
    #[serde(default = "d_dedup_max_distance")]
    pub dedup_max_distance: u32,
    #[serde(default = "d_retention_days")]
    pub retention_images_days: u32,
    #[serde(default = "d_retention_days")]
    pub retention_events_days: u32,
    #[serde(default = "d_retention_telemetry_days")]
    pub retention_telemetry_days: u32,
}

impl Default for LifelogConfig {
    fn default() -> Self {
        Self {
            sqlite_path: d_sqlite_path(),
            vector_backend: d_vector_backend(),
            ingest_queue_max_size: d_queue_max_size(),
            ingest_workers: d_ingest_workers(),
            ingest_overflow_policy: d_overflow_policy(),
            ingest_enqueue_timeout_ms: d_enqueue_timeout_ms(),
            default_top_k: d_top_k(),
            max_timeline_items: d_max_timeline_items(),
            dedup_max_distance: d_dedup_max_distance(),
            retention_images_days: d_retention_days(),
            retention_events_days: d_retention_days(),
            retention_telemetry_days: d_retention_telemetry_days(),
        }
    }
}

fn d_sqlite_path() -> String {
    "./data/opencane.db".to_string()
}
fn d_vector_backend() -> VectorBackend {
    VectorBackend::Memory
}
fn d_queue_max_size() -> usize {
    256
}
fn d_ingest_workers() -> usize {
    4
}
fn d_overflow_policy() -> OverflowPolicy {
    OverflowPolicy::Reject
}
fn d_enqueue_timeout_ms() -> u64 {
    2000
}
fn d_top_k() -> usize {
    5
}
fn d_max_timeline_items() -> usize {
    200
}
fn d_dedup_max_distance() -> u32 {
    6
}
fn d_retention_days() -> u32 {
    30
}
fn d_retention_telemetry_days() -> u32 {
    14
}
