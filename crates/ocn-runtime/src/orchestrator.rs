//! The Device Runtime Orchestrator (spec §4.4): the supervisor that
//! consumes the southbound adapter's event stream, fans inbound envelopes
//! out into one ordered queue per `(device_id, session_id)`, and drives
//! the voice turn, vision turn, barge-in, and heartbeat-timeout sweep.
//!
//! Sessions run concurrently with each other; within one session,
//! envelopes are handled strictly in arrival order by a dedicated lane
//! task fed through an unbounded channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use ocn_domain::config::TtsMode;
use ocn_domain::model::TelemetrySampleRow;
use ocn_domain::tool::Message;
use ocn_domain::trace::TraceEvent;
use ocn_domain::Result;
use ocn_policy::InteractionContext;
use ocn_protocol::{CommandType, Envelope, EventType};
use ocn_sessions::{SequenceVerdict, SideEffect, Trigger};
use ocn_tasks::ExecuteTaskRequest;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

type SessionKey = (String, String);

const HEARTBEAT_TIMEOUT_MULTIPLIER: i64 = 3;

/// Transcript verbs that route a voice turn to `DigitalTaskService`
/// instead of the agent loop (spec §4.4). Kept as a flat keyword list
/// rather than a language model classifier; swap this for a real intent
/// classifier without touching the dispatch logic around it.
const DIGITAL_TASK_VERBS: &[&str] = &["reserve", "book", "navigate", "search and", "find and", "order"];

fn is_digital_task_intent(transcript: &str) -> bool {
    let lower = transcript.to_lowercase();
    DIGITAL_TASK_VERBS.iter().any(|verb| lower.contains(verb))
}

/// Emit a `TraceEvent` into `tracing` and persist it to `thought_traces`
/// for replay/audit (spec §3, §9).
async fn record_trace(state: &AppState, session_id: &str, source: &str, event: TraceEvent) {
    let trace_id = uuid::Uuid::new_v4().to_string();
    let row = event.to_row(&trace_id, session_id, source, AppState::now_ms());
    if let Err(e) = state.store.insert_thought_trace(&row).await {
        tracing::warn!(error = %e, "failed to persist thought trace");
    }
}

/// Tracks the cancellation token for an in-flight voice turn per session,
/// so a barge-in (`listen_start` while SPEAKING) can cut off the turn
/// still waiting on the LLM or mid-TTS.
#[derive(Default)]
struct TurnTokens {
    by_session: Mutex<HashMap<SessionKey, CancellationToken>>,
}

impl TurnTokens {
    fn start(&self, key: SessionKey) -> CancellationToken {
        let token = CancellationToken::new();
        self.by_session.lock().insert(key, token.clone());
        token
    }

    fn cancel(&self, key: &SessionKey) {
        if let Some(token) = self.by_session.lock().get(key) {
            token.cancel();
        }
    }

    fn clear(&self, key: &SessionKey) {
        self.by_session.lock().remove(key);
    }
}

/// Runs the orchestrator until the adapter's event stream ends (the
/// adapter was stopped). Also spawns the heartbeat-timeout sweeper.
pub async fn run(state: AppState) {
    let Some(mut events) = state.adapter.events() else {
        tracing::error!("adapter events() already taken; orchestrator cannot start");
        return;
    };

    let tokens = Arc::new(TurnTokens::default());
    let mut lanes: HashMap<SessionKey, mpsc::UnboundedSender<Envelope>> = HashMap::new();

    tokio::spawn(heartbeat_sweep(state.clone()));

    while let Some(envelope) = events.next().await {
        let key = (envelope.device_id.clone(), envelope.session_id.clone());
        let closed = matches!(envelope.kind.as_event(), Some(EventType::Close));
        let lane = lanes.entry(key.clone()).or_insert_with(|| spawn_lane(state.clone(), tokens.clone()));
        if lane.send(envelope).is_err() {
            lanes.remove(&key);
        } else if closed {
            lanes.remove(&key);
        }
    }
}

fn spawn_lane(state: AppState, tokens: Arc<TurnTokens>) -> mpsc::UnboundedSender<Envelope> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = handle_envelope(&state, &tokens, envelope).await {
                tracing::warn!(error = %e, "envelope handling failed");
            }
        }
    });
    tx
}

async fn handle_envelope(state: &AppState, tokens: &Arc<TurnTokens>, envelope: Envelope) -> Result<()> {
    let now_ms = AppState::now_ms();
    let key = (envelope.device_id.clone(), envelope.session_id.clone());
    state.sessions.get_or_create(&envelope.device_id, &envelope.session_id, now_ms).await?;

    let Some(event) = envelope.kind.as_event().cloned() else {
        return Ok(());
    };

    // Telemetry, vision frames, and device-originated tool results don't
    // drive the voice state machine (the session manager maps them to a
    // heartbeat trigger for seq bookkeeping only); handle their actual
    // effect here before falling through to that bookkeeping.
    match event {
        EventType::Telemetry => return handle_telemetry(state, &envelope, now_ms).await,
        EventType::ImageReady => return handle_image_ready(state, &envelope, now_ms).await,
        EventType::ToolResult => {
            tracing::debug!(device_id = %envelope.device_id, "tool_result received, no dispatcher wired yet");
        }
        _ => {}
    }

    let Some(outcome) = state.sessions.handle_inbound(&envelope, now_ms) else {
        return Ok(());
    };

    if outcome.verdict == SequenceVerdict::Duplicate && outcome.side_effect == SideEffect::NoOp {
        return Ok(());
    }

    match outcome.side_effect {
        SideEffect::EmitHelloAck => {
            send_seq_command(state, &envelope.device_id, &envelope.session_id, CommandType::HelloAck, Map::new()).await;
            record_trace(
                state,
                &envelope.session_id,
                "orchestrator",
                TraceEvent::SessionCreated { device_id: envelope.device_id.clone(), session_id: envelope.session_id.clone() },
            )
            .await;
            match state.tasks.flush_pending_updates(&envelope.device_id, 50).await {
                Ok(flushed) if flushed > 0 => {
                    tracing::debug!(device_id = %envelope.device_id, flushed, "flushed queued digital task push updates on hello");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(device_id = %envelope.device_id, error = %e, "failed to flush pending digital task updates"),
            }
        }
        SideEffect::EmitHeartbeatAck => {
            let _ = state.adapter.ack(&envelope.device_id, &envelope.session_id, envelope.seq).await;
        }
        SideEffect::OpenAudioBuffer => {}
        SideEffect::EmitSttPartialIfGrown => {
            if let Some(text) = outcome.stt_partial_text {
                let mut payload = Map::new();
                payload.insert("text".into(), Value::from(text));
                send_seq_command(state, &envelope.device_id, &envelope.session_id, CommandType::SttPartial, payload).await;
            }
        }
        SideEffect::BargeIn => {
            tokens.cancel(&key);
            let mut payload = Map::new();
            payload.insert("aborted".into(), Value::from(true));
            payload.insert("reason".into(), Value::from("barge_in"));
            send_seq_command(state, &envelope.device_id, &envelope.session_id, CommandType::TtsStop, payload).await;
            record_trace(state, &envelope.session_id, "orchestrator", TraceEvent::BargeIn { session_id: envelope.session_id.clone() }).await;
        }
        SideEffect::FinalizeTranscriptAndDispatch => {
            let chunks = state.sessions.drain_audio(&envelope.device_id, &envelope.session_id);
            let transcript: String = chunks.iter().filter_map(|c| c.text.as_deref()).collect::<Vec<_>>().join("");
            run_voice_turn(state, tokens, &envelope.device_id, &envelope.session_id, transcript).await;
        }
        SideEffect::PersistCloseReason => {
            let reason = envelope.get_str("reason").unwrap_or("device_requested").to_string();
            state.store.close_session(&envelope.device_id, &envelope.session_id, &reason, now_ms).await?;
            state.sessions.close_and_evict(&envelope.device_id, &envelope.session_id);
            tokens.clear(&key);
            record_trace(
                state,
                &envelope.session_id,
                "orchestrator",
                TraceEvent::SessionClosed { device_id: envelope.device_id.clone(), session_id: envelope.session_id.clone(), reason },
            )
            .await;
            return Ok(());
        }
        SideEffect::EmitTtsStartThenChunksThenStop | SideEffect::NoOp => {}
    }

    state.sessions.persist(&envelope.device_id, &envelope.session_id).await?;
    Ok(())
}

async fn handle_telemetry(state: &AppState, envelope: &Envelope, now_ms: i64) -> Result<()> {
    let raw = Value::Object(envelope.payload.clone());
    let normalized = serde_json::from_value(raw.clone()).unwrap_or_default();
    state
        .store
        .record_telemetry(&TelemetrySampleRow {
            session_id: envelope.session_id.clone(),
            schema_version: TelemetrySampleRow::SCHEMA_VERSION.to_string(),
            ts_ms: now_ms,
            normalized,
            raw,
        })
        .await?;
    let _ = state.adapter.ack(&envelope.device_id, &envelope.session_id, envelope.seq).await;
    Ok(())
}

async fn handle_image_ready(state: &AppState, envelope: &Envelope, now_ms: i64) -> Result<()> {
    let Some(b64) = envelope.get_str("image_b64") else {
        let _ = state.adapter.ack(&envelope.device_id, &envelope.session_id, envelope.seq).await;
        return Ok(());
    };
    let image_bytes = match base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(device_id = %envelope.device_id, error = %e, "image_ready payload was not valid base64");
            let _ = state.adapter.ack(&envelope.device_id, &envelope.session_id, envelope.seq).await;
            return Ok(());
        }
    };
    let mime = envelope.get_str("mime").unwrap_or("image/jpeg").to_string();
    let question = envelope.get_str("question").map(str::to_owned);
    let metadata = Value::Object(envelope.payload.clone());

    // Speak from an immediate analysis so TTS never waits on the full
    // ingest pipeline's dedup/persistence/vector-indexing work.
    if let Some(vision) = &state.vision {
        match vision.analyze(&image_bytes, question.as_deref()).await {
            Ok(context) => {
                record_trace(
                    state,
                    &envelope.session_id,
                    "orchestrator",
                    TraceEvent::VisionTurnCompleted { session_id: envelope.session_id.clone(), risk_level: context.risk_level.as_str().to_string() },
                )
                .await;
                let safety = state.safety.evaluate(&context.actionable_summary, 1.0 - context.risk_score, Some(context.risk_level.as_str()));
                let ctx = InteractionContext { priority: None, proactive_hint: context.risk_hints.first().cloned() };
                let decision = state.interaction.evaluate(&safety.text, "vision_reply", 1.0 - context.risk_score, &safety.risk_level, &ctx, true, current_hour());
                if decision.should_speak {
                    speak(state, &envelope.device_id, &envelope.session_id, &decision.text).await;
                }
            }
            Err(e) => tracing::warn!(device_id = %envelope.device_id, error = %e, "immediate vision analysis failed"),
        }
    }

    let lifelog = state.lifelog.clone();
    let session_id = envelope.session_id.clone();
    let device_id = envelope.device_id.clone();
    tokio::spawn(async move {
        if let Err(e) = lifelog.ingest(session_id, image_bytes, question, mime, metadata, now_ms).await {
            tracing::warn!(device_id = %device_id, error = %e, "background lifelog ingest failed");
        }
    });

    let _ = state.adapter.ack(&envelope.device_id, &envelope.session_id, envelope.seq).await;
    Ok(())
}

async fn run_voice_turn(state: &AppState, tokens: &Arc<TurnTokens>, device_id: &str, session_id: &str, transcript: String) {
    let key = (device_id.to_string(), session_id.to_string());
    let started_at = AppState::now_ms();
    record_trace(
        state,
        session_id,
        "orchestrator",
        TraceEvent::VoiceTurnStarted { session_id: session_id.to_string(), transcript_chars: transcript.chars().count() },
    )
    .await;

    if transcript.trim().is_empty() {
        state.sessions.apply_trigger(device_id, session_id, Trigger::ResponseReady, AppState::now_ms());
        let _ = state.sessions.persist(device_id, session_id).await;
        return;
    }

    if is_digital_task_intent(&transcript) {
        dispatch_digital_task(state, device_id, session_id, transcript).await;
        return;
    }

    let token = tokens.start(key.clone());
    let reply = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = collect_reply(state, vec![Message::user(transcript)]) => Some(result),
    };
    tokens.clear(&key);

    let Some(reply) = reply else {
        // Canceled by a barge-in before the LLM returned; the barge-in
        // path already emitted tts_stop and reopened the audio buffer.
        return;
    };

    let text = match reply {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "voice turn llm call failed");
            record_trace(state, session_id, "orchestrator", TraceEvent::VoiceTurnFailed { session_id: session_id.to_string(), reason: e.to_string() }).await;
            "I've completed processing but have no response to give.".to_string()
        }
    };

    let safety = state.safety.evaluate(&text, 0.9, None);
    record_trace(
        state,
        session_id,
        "orchestrator",
        TraceEvent::SafetyPolicyApplied {
            session_id: session_id.to_string(),
            risk_level: safety.risk_level.clone(),
            downgraded: safety.downgraded,
            rule_ids: safety.flags.clone(),
        },
    )
    .await;
    let decision = state.interaction.evaluate(&safety.text, "voice_reply", 0.9, &safety.risk_level, &InteractionContext::default(), true, current_hour());
    record_trace(
        state,
        session_id,
        "orchestrator",
        TraceEvent::InteractionPolicyApplied { session_id: session_id.to_string(), should_speak: decision.should_speak, reason: decision.reason.clone() },
    )
    .await;

    state.sessions.apply_trigger(device_id, session_id, Trigger::ResponseReady, AppState::now_ms());
    if decision.should_speak {
        speak(state, device_id, session_id, &decision.text).await;
    }
    let _ = state.sessions.persist(device_id, session_id).await;

    let total_ms = (AppState::now_ms() - started_at).max(0) as u64;
    record_trace(
        state,
        session_id,
        "orchestrator",
        TraceEvent::VoiceTurnCompleted { session_id: session_id.to_string(), stt_ms: 0, agent_ms: total_ms, total_ms },
    )
    .await;
}

/// Run a digital-task-intent transcript through `DigitalTaskService`
/// instead of the agent loop (spec §4.4); the task service pushes its own
/// status/speech updates back to the device as it progresses.
async fn dispatch_digital_task(state: &AppState, device_id: &str, session_id: &str, goal: String) {
    let req = ExecuteTaskRequest {
        session_id: session_id.to_string(),
        device_id: Some(device_id.to_string()),
        goal,
        timeout_seconds: None,
        notify: true,
        speak: true,
        interrupt_previous: true,
    };
    match state.tasks.execute(req, AppState::now_ms()).await {
        Ok(row) => {
            record_trace(
                state,
                session_id,
                "orchestrator",
                TraceEvent::DigitalTaskTransition { task_id: row.task_id, from_status: "none".into(), to_status: format!("{:?}", row.status).to_lowercase() },
            )
            .await;
        }
        Err(e) => tracing::warn!(device_id, session_id, error = %e, "failed to dispatch digital task"),
    }

    state.sessions.apply_trigger(device_id, session_id, Trigger::ResponseReady, AppState::now_ms());
    let _ = state.sessions.persist(device_id, session_id).await;
}

async fn collect_reply(state: &AppState, messages: Vec<Message>) -> Result<String> {
    // No MCP/tool catalog is wired into this runtime, so there is
    // nothing to offer the agent beyond an empty, policy-filtered list;
    // the filter still runs so a future tool catalog is scoped by
    // `tool_domains` from day one rather than bolted on later.
    let available_tools: Vec<String> = Vec::new();
    let allowed = state.tool_domains.allowed_tool_names(&available_tools, "device", false);
    let tools = allowed
        .into_iter()
        .map(|name| ocn_domain::tool::ToolDefinition { name, description: String::new(), parameters: serde_json::json!({"type": "object", "properties": {}}) })
        .collect();

    let mut stream = state.llm.chat_stream(messages, tools).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event {
            ocn_domain::stream::StreamEvent::Token { text: chunk } => text.push_str(&chunk),
            ocn_domain::stream::StreamEvent::Error { message } => return Err(ocn_domain::Error::UpstreamUnavailable(message)),
            ocn_domain::stream::StreamEvent::Done { .. } => break,
            // Tool-call events belong to a richer agentic loop than this
            // runtime drives today; digital-task goals are dispatched
            // separately through `DigitalTaskService`.
            _ => {}
        }
    }
    Ok(text)
}

/// Emit `tts_start`, the reply itself (audio chunks when a TTS engine is
/// configured and `tts_mode` is `server_audio`, otherwise a single text
/// chunk for the device to render), then `tts_stop`.
async fn speak(state: &AppState, device_id: &str, session_id: &str, text: &str) {
    send_seq_command(state, device_id, session_id, CommandType::TtsStart, Map::new()).await;

    match (&state.tts, state.config.hardware.tts_mode) {
        (Some(tts), TtsMode::ServerAudio) => match tts.synthesize(text, None).await {
            Ok(audio) => {
                let chunk_size = state.config.hardware.tts_audio_chunk_bytes.max(1);
                for chunk in audio.chunks(chunk_size) {
                    let mut payload = Map::new();
                    payload.insert("audio_b64".into(), Value::from(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, chunk)));
                    send_seq_command(state, device_id, session_id, CommandType::TtsChunk, payload).await;
                }
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "tts synthesis failed, falling back to device text rendering");
                send_text_chunk(state, device_id, session_id, text).await;
            }
        },
        _ => send_text_chunk(state, device_id, session_id, text).await,
    }

    let mut stop_payload = Map::new();
    stop_payload.insert("aborted".into(), Value::from(false));
    send_seq_command(state, device_id, session_id, CommandType::TtsStop, stop_payload).await;
}

async fn send_text_chunk(state: &AppState, device_id: &str, session_id: &str, text: &str) {
    let mut payload = Map::new();
    payload.insert("text".into(), Value::from(text));
    send_seq_command(state, device_id, session_id, CommandType::TtsChunk, payload).await;
}

async fn send_seq_command(state: &AppState, device_id: &str, session_id: &str, command: CommandType, payload: Map<String, Value>) {
    let Some(seq) = state.sessions.next_outbound_seq(device_id, session_id) else {
        tracing::warn!(device_id, session_id, "no cached session for outbound command, dropping");
        return;
    };
    let now_ms = AppState::now_ms();
    let envelope = Envelope::new_command(command, device_id, session_id, seq, now_ms, payload);
    if let Err(e) = state.adapter.send(envelope).await {
        tracing::warn!(device_id, error = %e, "adapter send failed");
    }
}

pub(crate) fn current_hour() -> u32 {
    use chrono::Timelike;
    chrono::Utc::now().hour()
}

/// Periodically closes sessions whose `last_seen` is older than
/// `heartbeat_seconds * HEARTBEAT_TIMEOUT_MULTIPLIER`.
async fn heartbeat_sweep(state: AppState) {
    let period = Duration::from_secs(state.config.hardware.heartbeat_seconds.max(1));
    let timeout_ms = state.config.hardware.heartbeat_seconds as i64 * 1000 * HEARTBEAT_TIMEOUT_MULTIPLIER;
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        let now_ms = AppState::now_ms();
        for (device_id, session_id) in state.sessions.stale_sessions(now_ms, timeout_ms) {
            state.sessions.apply_trigger(&device_id, &session_id, Trigger::CloseOrTimeout, now_ms);
            if let Err(e) = state.store.close_session(&device_id, &session_id, "heartbeat_timeout", now_ms).await {
                tracing::warn!(device_id, session_id, error = %e, "failed to persist heartbeat-timeout close");
            }
            state.sessions.close_and_evict(&device_id, &session_id);
            let _ = state.adapter.close_session(&device_id, &session_id, "heartbeat_timeout").await;
            record_trace(
                &state,
                &session_id,
                "orchestrator",
                TraceEvent::SessionClosed { device_id, session_id: session_id.clone(), reason: "heartbeat_timeout".to_string() },
            )
            .await;
        }
    }
}
