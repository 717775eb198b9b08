//! Narrow capability traits (spec §9). Each is a data-only seam: the
//! orchestrator, session manager, lifelog pipeline, and task service
//! depend on these trait objects rather than on each other's concrete
//! storage/transport crates, which is what keeps `ocn-runtime`,
//! `ocn-sessions`, `ocn-lifelog`, and `ocn-tasks` from importing one
//! another.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{
    DeviceBindingRow, DeviceOperationRow, DeviceSessionRow, DigitalTaskRow, LifelogContextRow,
    LifelogEventRow, LifelogImageRow, ObservabilitySampleRow, PushQueueRow, TelemetrySampleRow,
};
use crate::stream::BoxStream;
use crate::tool::{Message, ToolDefinition};
use crate::trace::ThoughtTraceRow;

/// The durable store (spec §3/§6): implemented by `ocn-store` over
/// rusqlite. All methods are idempotent on primary key where the row
/// shape has one, so retried writes after a crash are safe.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn upsert_session(&self, row: &DeviceSessionRow) -> Result<()>;
    async fn get_session(&self, device_id: &str, session_id: &str) -> Result<Option<DeviceSessionRow>>;
    async fn close_session(&self, device_id: &str, session_id: &str, reason: &str, now_ms: i64) -> Result<()>;

    async fn upsert_binding(&self, row: &DeviceBindingRow) -> Result<()>;
    async fn get_binding(&self, device_id: &str) -> Result<Option<DeviceBindingRow>>;

    async fn record_operation(&self, row: &DeviceOperationRow) -> Result<()>;
    async fn update_operation(&self, row: &DeviceOperationRow) -> Result<()>;
    async fn get_operation(&self, operation_id: &str) -> Result<Option<DeviceOperationRow>>;

    async fn upsert_task(&self, row: &DigitalTaskRow) -> Result<()>;
    async fn get_task(&self, task_id: &str) -> Result<Option<DigitalTaskRow>>;
    /// Tasks still `pending`/`running` at process start, used for crash
    /// recovery (spec §4.7).
    async fn list_incomplete_tasks(&self) -> Result<Vec<DigitalTaskRow>>;

    async fn record_lifelog_image(&self, row: &LifelogImageRow) -> Result<()>;
    async fn record_lifelog_context(&self, row: &LifelogContextRow) -> Result<()>;
    async fn record_lifelog_event(&self, row: &LifelogEventRow) -> Result<()>;
    async fn record_telemetry(&self, row: &TelemetrySampleRow) -> Result<()>;
    async fn record_observability_sample(&self, row: &ObservabilitySampleRow) -> Result<()>;

    async fn enqueue_push(&self, row: &PushQueueRow) -> Result<()>;
    async fn mark_push_delivered(&self, id: &str) -> Result<()>;
    async fn list_pending_pushes(&self, device_id: &str) -> Result<Vec<PushQueueRow>>;

    /// Append one thought-trace row (spec §3/§9) for later replay/audit.
    async fn insert_thought_trace(&self, row: &ThoughtTraceRow) -> Result<()>;

    /// Most recent thought-trace rows for a session, newest first, for
    /// the Control API's trace-inspection route.
    async fn list_thought_traces(&self, session_id: &str, limit: usize) -> Result<Vec<ThoughtTraceRow>>;

    /// Copy the live database to `dest_path` using an online backup API
    /// (spec §6 backup/restore).
    async fn backup_to(&self, dest_path: &str) -> Result<()>;
}

/// The out-of-scope LLM collaborator (spec §1), trimmed to what the
/// orchestrator's turn loop actually calls.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Result<BoxStream<'static, crate::stream::StreamEvent>>;
}

/// Frame-level vision analysis (spec §4.5): produces the semantic
/// context attached to a lifelog image.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, image_bytes: &[u8], hint: Option<&str>) -> Result<LifelogContextRow>;
}

/// Text-to-speech synthesis used by the orchestrator's speaking phase.
#[async_trait]
pub trait TTSEngine: Send + Sync {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>>;
}

/// A single nearest-neighbor hit from a vector index query.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

/// The lifelog semantic index (spec §4.5): implemented in-memory,
/// against qdrant, or against chroma depending on
/// `LifelogConfig::vector_backend`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: &str, embedding: Vec<f32>, metadata: Value) -> Result<()>;
    async fn query(&self, embedding: Vec<f32>, top_k: usize) -> Result<Vec<VectorHit>>;
    async fn delete(&self, id: &str) -> Result<()>;
}
