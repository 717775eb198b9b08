use std::sync::Arc;

use ocn_adapter::Adapter;
use ocn_domain::config::Config;
use ocn_domain::interfaces::{DurableStore, LLMClient, TTSEngine, VisionAnalyzer};
use ocn_lifelog::LifelogPipeline;
use ocn_policy::{InteractionPolicy, SafetyPolicy, ToolDomainManager};
use ocn_sessions::SessionManager;
use ocn_tasks::DigitalTaskService;

/// Shared application state passed to the orchestrator dispatch loop and
/// every Control HTTP API handler.
///
/// Fields are grouped by concern:
/// - **Core** — config, durable store, southbound adapter
/// - **Turn handling** — sessions, the LLM/vision/TTS collaborators
/// - **Policy gates** — tool domains, safety, interaction
/// - **Lifelog & tasks** — ingest pipeline, digital task service
/// - **Security** — the startup-computed API token hash
#[derive(Clone)]
pub struct AppState {
    // ── Core ────────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<dyn DurableStore>,
    pub adapter: Arc<dyn Adapter>,

    // ── Turn handling ───────────────────────────────────────────────────
    pub sessions: Arc<SessionManager>,
    pub llm: Arc<dyn LLMClient>,
    pub vision: Option<Arc<dyn VisionAnalyzer>>,
    pub tts: Option<Arc<dyn TTSEngine>>,

    // ── Policy gates ────────────────────────────────────────────────────
    pub tool_domains: Arc<ToolDomainManager>,
    pub safety: Arc<SafetyPolicy>,
    pub interaction: Arc<InteractionPolicy>,

    // ── Lifelog & digital tasks ─────────────────────────────────────────
    pub lifelog: Arc<LifelogPipeline>,
    pub tasks: Arc<DigitalTaskService>,

    // ── Security (startup-computed) ────────────────────────────────────
    /// SHA-256 hash of the control-API bearer token. `None` = dev mode
    /// (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}

impl AppState {
    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
