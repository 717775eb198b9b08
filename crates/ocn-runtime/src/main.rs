mod api;
mod cli;
mod orchestrator;
mod state;
mod task_executor;
mod vision_stub;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use ocn_adapter::{
    device_ws, InMemoryMqttTransport, MemoryAdapter, MqttAdapter, MqttTopics, WebSocketAdapter,
};
use ocn_domain::config::{AdapterKind, Config, ConfigSeverity, OverflowPolicy as ConfigOverflowPolicy};
use ocn_domain::interfaces::{DurableStore, VectorIndex, VisionAnalyzer};
use ocn_lifelog::{ImageAssetStore, InMemoryVectorIndex, LifelogPipeline, LifelogPipelineConfig};
use ocn_llm::AnthropicClient;
use ocn_policy::{InteractionPolicy, SafetyPolicy, ToolDomainManager};
use ocn_protocol::{CommandType, Envelope};
use ocn_sessions::SessionManager;
use ocn_store::SqliteStore;
use ocn_tasks::DigitalTaskService;

use cli::{Cli, Command, ConfigCommand};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_tracing();
            let (config, _path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Command::Doctor => {
            let (config, path) = cli::load_config()?;
            let ok = cli::doctor::run(&config, &path).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, path) = cli::load_config()?;
            if !cli::config::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ocn_runtime=debug")),
        )
        .json()
        .init();
}

/// Start the device runtime's edge broker with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("opencane-runtime starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    let mut has_errors = false;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => {
                has_errors = true;
                tracing::error!("{}", issue.message);
            }
            ConfigSeverity::Warning => tracing::warn!("{}", issue.message),
        }
    }
    if has_errors {
        anyhow::bail!("configuration has blocking errors, refusing to start");
    }

    // ── Durable store ────────────────────────────────────────────────
    let store: Arc<dyn DurableStore> =
        Arc::new(SqliteStore::open(&config.lifelog.sqlite_path).context("opening durable store")?);

    // ── Southbound adapter ───────────────────────────────────────────
    let device_profile_registry = ocn_protocol::profile::DeviceProfileRegistry::builtin();
    let device_profile = device_profile_registry
        .get(&config.hardware.device_profile)
        .cloned()
        .unwrap_or_else(|| device_profile_registry.get("mock").unwrap().clone());
    let replay_policy = ocn_adapter::replay::ReplayPolicy {
        window_size: config.hardware.mqtt.control_replay_window,
        max_skew_ms: (config.hardware.auth.control_api_replay_protection.window_seconds as i64) * 1000,
    };

    let (adapter, ws_router): (Arc<dyn ocn_adapter::Adapter>, Option<axum::Router<AppState>>) =
        match config.hardware.adapter {
            AdapterKind::Mock => (Arc::new(MemoryAdapter::new()), None),
            AdapterKind::Websocket => {
                let (adapter, handle) = WebSocketAdapter::new(
                    config.hardware.auth.token.clone(),
                    config.hardware.mqtt.offline_control_buffer,
                    replay_policy,
                    device_profile.clone(),
                    store.clone(),
                    config.hardware.auth.device_auth_enabled,
                );
                let router = axum::Router::new()
                    .route("/v1/device/ws", axum::routing::get(device_ws))
                    .with_state(handle);
                (adapter, Some(router))
            }
            AdapterKind::Mqtt | AdapterKind::GenericMqtt | AdapterKind::Ec600 => {
                tracing::warn!(
                    "no MQTT client crate is wired into this workspace; using an in-memory \
                     transport stand-in. Plug a real client (e.g. rumqttc) behind MqttTransport \
                     for production use."
                );
                let topics = MqttTopics {
                    up_control: config.hardware.mqtt.up_control_topic.clone(),
                    up_audio: config.hardware.mqtt.up_audio_topic.clone(),
                    down_control_template: config.hardware.mqtt.down_control_topic_template.clone(),
                    down_audio_template: config.hardware.mqtt.down_audio_topic_template.clone(),
                    qos_control: config.hardware.mqtt.qos_control,
                    qos_audio: config.hardware.mqtt.qos_audio,
                };
                let transport = Arc::new(InMemoryMqttTransport::default());
                (
                    Arc::new(MqttAdapter::new(
                        topics,
                        transport,
                        replay_policy,
                        device_profile.clone(),
                        store.clone(),
                        config.hardware.auth.device_auth_enabled,
                    )),
                    None,
                )
            }
        };

    // ── LLM collaborator ─────────────────────────────────────────────
    let llm = Arc::new(AnthropicClient::from_env().context("constructing Anthropic client")?);

    // ── Lifelog ingest pipeline ──────────────────────────────────────
    let vision_analyzer: Arc<dyn VisionAnalyzer> = Arc::new(vision_stub::NullVisionAnalyzer);

    let vector_index: Arc<dyn VectorIndex> = match config.lifelog.vector_backend {
        ocn_domain::config::VectorBackend::Memory => Arc::new(InMemoryVectorIndex::new()),
        ocn_domain::config::VectorBackend::Chroma => {
            tracing::warn!("lifelog.vector_backend = chroma has no backend in this workspace, falling back to in-memory");
            Arc::new(InMemoryVectorIndex::new())
        }
        ocn_domain::config::VectorBackend::Qdrant => {
            tracing::warn!("lifelog.vector_backend = qdrant requires the `qdrant` feature, falling back to in-memory");
            Arc::new(InMemoryVectorIndex::new())
        }
    };

    let assets = Arc::new(
        ImageAssetStore::new("./data/lifelog-assets", 2000).context("opening image asset store")?,
    );

    let overflow_policy = match config.lifelog.ingest_overflow_policy {
        ConfigOverflowPolicy::Reject => ocn_lifelog::OverflowPolicy::Reject,
        ConfigOverflowPolicy::DropOldest => ocn_lifelog::OverflowPolicy::DropOldest,
        ConfigOverflowPolicy::Wait => ocn_lifelog::OverflowPolicy::Wait {
            timeout: std::time::Duration::from_millis(config.lifelog.ingest_enqueue_timeout_ms),
        },
    };

    let lifelog = LifelogPipeline::spawn(
        LifelogPipelineConfig {
            worker_count: config.lifelog.ingest_workers,
            queue_max_size: config.lifelog.ingest_queue_max_size,
            overflow_policy,
            dedup_max_distance: config.lifelog.dedup_max_distance,
            ..LifelogPipelineConfig::default()
        },
        store.clone(),
        vision_analyzer.clone(),
        vector_index,
        assets,
    );

    // ── Policy gates ─────────────────────────────────────────────────
    let safety = Arc::new(SafetyPolicy {
        enabled: config.safety.enabled,
        low_confidence_threshold: config.safety.low_confidence_threshold,
        max_output_chars: config.safety.max_output_chars,
        prepend_caution_for_risk: config.safety.prepend_caution_for_risk,
    });

    let interaction = Arc::new(InteractionPolicy {
        enabled: config.interaction.enabled,
        emotion_enabled: config.interaction.emotion_enabled,
        proactive_enabled: config.interaction.proactive_enabled,
        silent_enabled: config.interaction.silent_enabled,
        low_confidence_threshold: config.interaction.low_confidence_threshold,
        high_risk_levels: config.interaction.high_risk_levels.iter().cloned().collect(),
        proactive_sources: config.interaction.proactive_sources.iter().cloned().collect(),
        silent_sources: config.interaction.silent_sources.iter().cloned().collect(),
        quiet_hours_enabled: config.interaction.quiet_hours.enabled,
        quiet_hours_start_hour: config.interaction.quiet_hours.start_hour as u32,
        quiet_hours_end_hour: config.interaction.quiet_hours.end_hour as u32,
        suppress_low_priority_in_quiet_hours: config.interaction.suppress_low_priority_in_quiet_hours,
    });

    let tool_domains = Arc::new(ToolDomainManager::new());

    // ── Digital tasks ────────────────────────────────────────────────
    let executor = Arc::new(task_executor::LlmGoalExecutor::new(llm.clone()));
    let tasks = Arc::new(
        DigitalTaskService::new(store.clone(), executor, config.digital_task.default_timeout_seconds)
            .with_status_sink(
                Arc::new(AdapterStatusSink { adapter: adapter.clone() }),
                config.digital_task.status_retry_count,
                config.digital_task.status_retry_backoff_ms,
            ),
    );
    let recovered = tasks.recover_incomplete(AppState::now_ms()).await?;
    if recovered > 0 {
        tracing::warn!(recovered, "resuming incomplete digital tasks left over from a previous run");
    }

    // ── API auth token ───────────────────────────────────────────────
    let api_token_hash = if config.hardware.auth.enabled {
        config
            .hardware
            .auth
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| Sha256::digest(t.as_bytes()).to_vec())
    } else {
        None
    };
    if config.hardware.auth.enabled && api_token_hash.is_none() {
        tracing::warn!("hardware.auth.enabled is set but no control-api token is configured; the API runs unauthenticated");
    }

    let sessions = Arc::new(SessionManager::new(store.clone()));

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        adapter: adapter.clone(),
        sessions,
        llm,
        vision: Some(vision_analyzer),
        tts: None,
        tool_domains,
        safety,
        interaction,
        lifelog,
        tasks,
        api_token_hash,
    };

    tokio::spawn(orchestrator::run(state.clone()));

    // ── HTTP surface ─────────────────────────────────────────────────
    let cors_layer = build_cors_layer();

    let mut app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(256));

    if let Some(ws_router) = ws_router {
        app = app.merge(ws_router);
    }

    let governor_layer = if config.hardware.auth.control_api_rate_limit.enabled {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let rl = &config.hardware.auth.control_api_rate_limit;
        let per_second = (60 / rl.rpm.max(1)).max(1) as u64;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(per_second)
            .burst_size(rl.burst)
            .finish()
            .expect("control_api_rate_limit: rpm and burst must be > 0");

        Some(GovernorLayer { config: Arc::new(gov_config) })
    } else {
        tracing::info!("Control API per-IP rate limiting disabled (hardware.auth.control_api_rate_limit.enabled = false)");
        None
    };

    let app = if let Some(gov) = governor_layer {
        app.layer(gov).with_state(state)
    } else {
        app.with_state(state)
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.hardware.control_host, config.hardware.control_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "opencane-runtime listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Build the Control HTTP API's CORS policy.
///
/// There is no browser-facing dashboard in this domain (callers are
/// device bridges and backend integrations), so this is a single
/// permissive policy rather than a configurable allow-list.
fn build_cors_layer() -> CorsLayer {
    use axum::http::header;

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(Vec::<HeaderValue>::new()))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Delivers digital-task status pushes to the device through the
/// southbound adapter's outbound command path.
struct AdapterStatusSink {
    adapter: Arc<dyn ocn_adapter::Adapter>,
}

#[async_trait::async_trait]
impl ocn_tasks::StatusSink for AdapterStatusSink {
    async fn deliver(&self, update: &ocn_tasks::TaskStatusUpdate) -> anyhow::Result<()> {
        let Some(device_id) = &update.device_id else {
            return Ok(());
        };

        let mut payload = serde_json::Map::new();
        payload.insert("task_id".into(), serde_json::Value::from(update.task_id.clone()));
        payload.insert("event".into(), serde_json::Value::from(update.event.clone()));
        payload.insert("status".into(), serde_json::to_value(update.status).unwrap_or_default());
        payload.insert(
            "error".into(),
            update.error.clone().map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
        );

        let envelope = Envelope::new_command(
            CommandType::TaskUpdate,
            device_id.clone(),
            update.session_id.clone(),
            0,
            AppState::now_ms(),
            payload,
        );

        self.adapter.send(envelope).await.map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}
