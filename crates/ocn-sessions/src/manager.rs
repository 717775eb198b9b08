//! `SessionManager` (spec §4.3): owns the in-memory session cache, the
//! sequence discipline for inbound events and outbound commands, and the
//! bridge into the durable store for crash recovery.

use std::collections::HashMap;
use std::sync::Arc;

use ocn_domain::interfaces::DurableStore;
use ocn_domain::model::{AudioChunk, DeviceSessionRow, SessionState};
use ocn_domain::Result;
use ocn_protocol::{EventType, Envelope};
use parking_lot::Mutex;

use crate::audio_buffer::AudioBuffer;
use crate::state_machine::{self, SideEffect, Trigger};

/// How an inbound envelope was classified before any state-machine work
/// happened. The orchestrator uses this to decide whether to bother
/// dispatching the event at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceVerdict {
    /// `seq == last_inbound_seq + 1` (or the session was brand new).
    InOrder,
    /// `seq <= last_inbound_seq`: already processed. Idempotent event
    /// types (hello, heartbeat) still get their ack reissued; anything
    /// else is dropped.
    Duplicate,
    /// `seq > last_inbound_seq + 1`: a gap. Accepted anyway (spec §4.3
    /// does not require blocking on gaps) but counted for metrics.
    OutOfOrder { gap: u64 },
}

#[derive(Debug)]
pub struct InboundOutcome {
    pub verdict: SequenceVerdict,
    pub state: SessionState,
    pub side_effect: SideEffect,
    pub stt_partial_text: Option<String>,
}

fn trigger_for(event: &EventType) -> Trigger {
    match event {
        EventType::Hello => Trigger::Hello,
        EventType::ListenStart => Trigger::ListenStart,
        EventType::AudioChunk => Trigger::AudioChunk,
        EventType::ListenStop => Trigger::ListenStop,
        EventType::Close => Trigger::CloseOrTimeout,
        EventType::Heartbeat => Trigger::Heartbeat,
        // Telemetry, image_ready, tool_result, and unknown types don't
        // drive the voice state machine; treat them as a no-op heartbeat
        // so sequence bookkeeping still advances without rejecting them.
        _ => Trigger::Heartbeat,
    }
}

struct CachedSession {
    row: DeviceSessionRow,
    audio: AudioBuffer,
}

pub struct SessionManager {
    store: Arc<dyn DurableStore>,
    sessions: Mutex<HashMap<(String, String), CachedSession>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store, sessions: Mutex::new(HashMap::new()) }
    }

    /// Load a session from the durable store into the in-memory cache if
    /// it isn't already cached, creating a fresh `CONNECTING` row if none
    /// exists anywhere.
    pub async fn get_or_create(&self, device_id: &str, session_id: &str, now_ms: i64) -> Result<DeviceSessionRow> {
        let key = (device_id.to_string(), session_id.to_string());
        if let Some(cached) = self.sessions.lock().get(&key) {
            return Ok(cached.row.clone());
        }
        let row = match self.store.get_session(device_id, session_id).await? {
            Some(row) => row,
            None => DeviceSessionRow::new(device_id, session_id, now_ms),
        };
        let audio = AudioBuffer::from_pending(row.pending_audio_chunks.clone());
        let result = row.clone();
        self.sessions.lock().insert(key, CachedSession { row, audio });
        Ok(result)
    }

    /// Apply the sequence discipline and state transition for one inbound
    /// envelope, mutating the cached row in place. Returns the classifier
    /// verdict plus the side effect the orchestrator must act on.
    pub fn handle_inbound(&self, envelope: &Envelope, now_ms: i64) -> Option<InboundOutcome> {
        let event = envelope.kind.as_event()?.clone();
        let key = (envelope.device_id.clone(), envelope.session_id.clone());
        let mut guard = self.sessions.lock();
        let cached = guard.get_mut(&key)?;

        let verdict = if envelope.seq == 0 && cached.row.last_inbound_seq == 0 {
            SequenceVerdict::InOrder
        } else if envelope.seq <= cached.row.last_inbound_seq {
            SequenceVerdict::Duplicate
        } else if envelope.seq > cached.row.last_inbound_seq + 1 {
            SequenceVerdict::OutOfOrder { gap: envelope.seq - cached.row.last_inbound_seq - 1 }
        } else {
            SequenceVerdict::InOrder
        };

        if verdict == SequenceVerdict::Duplicate && !event.is_idempotent() {
            return Some(InboundOutcome {
                verdict,
                state: cached.row.state,
                side_effect: SideEffect::NoOp,
                stt_partial_text: None,
            });
        }

        if verdict != SequenceVerdict::Duplicate {
            cached.row.last_inbound_seq = envelope.seq;
        }
        cached.row.last_seen = now_ms;

        let mut stt_partial_text = None;
        if matches!(event, EventType::AudioChunk) {
            if let (Some(idx), text) = (envelope.get_u64("chunk_index"), envelope.get_str("text").map(str::to_owned)) {
                let grew = cached.audio.insert(AudioChunk { chunk_index: idx, text, audio_b64: None });
                if grew {
                    stt_partial_text = Some(cached.audio.transcript_so_far());
                }
                cached.row.pending_audio_chunks = cached.audio.pending().to_vec();
            }
        }

        let trigger = trigger_for(&event);
        let (next_state, side_effect) = match state_machine::transition(cached.row.state, trigger) {
            Ok(t) => t,
            Err(_) => (cached.row.state, SideEffect::NoOp),
        };
        cached.row.state = next_state;

        Some(InboundOutcome { verdict, state: next_state, side_effect, stt_partial_text })
    }

    /// Drive a state transition not caused by an inbound device event
    /// (e.g. `response_ready` once the LLM turn completes, or a heartbeat
    /// timeout sweep).
    pub fn apply_trigger(&self, device_id: &str, session_id: &str, trigger: Trigger, now_ms: i64) -> Option<(SessionState, SideEffect)> {
        let key = (device_id.to_string(), session_id.to_string());
        let mut guard = self.sessions.lock();
        let cached = guard.get_mut(&key)?;
        let (next_state, side_effect) = state_machine::transition(cached.row.state, trigger).ok()?;
        cached.row.state = next_state;
        cached.row.last_seen = now_ms;
        if next_state == SessionState::Closed {
            cached.row.closed_at = Some(now_ms);
        }
        Some((next_state, side_effect))
    }

    /// Allocate the next strictly-increasing outbound sequence number for
    /// a session.
    pub fn next_outbound_seq(&self, device_id: &str, session_id: &str) -> Option<u64> {
        let key = (device_id.to_string(), session_id.to_string());
        let mut guard = self.sessions.lock();
        let cached = guard.get_mut(&key)?;
        cached.row.last_outbound_seq += 1;
        Some(cached.row.last_outbound_seq)
    }

    /// Finalize the audio buffer at `listen_stop`, draining it so the
    /// next listening turn starts clean.
    pub fn drain_audio(&self, device_id: &str, session_id: &str) -> Vec<AudioChunk> {
        let key = (device_id.to_string(), session_id.to_string());
        let mut guard = self.sessions.lock();
        match guard.get_mut(&key) {
            Some(cached) => {
                let drained = std::mem::replace(&mut cached.audio, AudioBuffer::new());
                cached.row.pending_audio_chunks.clear();
                drained.finalize()
            }
            None => Vec::new(),
        }
    }

    /// Persist the cached row for `(device_id, session_id)` to the
    /// durable store.
    pub async fn persist(&self, device_id: &str, session_id: &str) -> Result<()> {
        let key = (device_id.to_string(), session_id.to_string());
        let row = {
            let guard = self.sessions.lock();
            guard.get(&key).map(|c| c.row.clone())
        };
        if let Some(row) = row {
            self.store.upsert_session(&row).await?;
        }
        Ok(())
    }

    pub fn close_and_evict(&self, device_id: &str, session_id: &str) {
        let key = (device_id.to_string(), session_id.to_string());
        self.sessions.lock().remove(&key);
    }

    /// Cached, non-closed sessions whose `last_seen` is older than
    /// `now_ms - timeout_ms`, for the orchestrator's heartbeat-timeout
    /// sweep (spec §4.4).
    pub fn stale_sessions(&self, now_ms: i64, timeout_ms: i64) -> Vec<(String, String)> {
        self.sessions
            .lock()
            .iter()
            .filter(|(_, cached)| cached.row.state != SessionState::Closed && now_ms - cached.row.last_seen > timeout_ms)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of sessions currently cached in memory, open or not.
    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Snapshot of every cached session's identity/state, for status and
    /// inspection endpoints.
    pub fn list_active(&self) -> Vec<DeviceSessionRow> {
        self.sessions.lock().values().map(|cached| cached.row.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ocn_domain::interfaces::DurableStore;
    use ocn_domain::model::*;
    use serde_json::{Map, Value};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        sessions: StdMutex<HashMap<(String, String), DeviceSessionRow>>,
    }

    #[async_trait]
    impl DurableStore for FakeStore {
        async fn upsert_session(&self, row: &DeviceSessionRow) -> Result<()> {
            self.sessions.lock().unwrap().insert((row.device_id.clone(), row.session_id.clone()), row.clone());
            Ok(())
        }
        async fn get_session(&self, device_id: &str, session_id: &str) -> Result<Option<DeviceSessionRow>> {
            Ok(self.sessions.lock().unwrap().get(&(device_id.to_string(), session_id.to_string())).cloned())
        }
        async fn close_session(&self, _d: &str, _s: &str, _r: &str, _n: i64) -> Result<()> {
            Ok(())
        }
        async fn upsert_binding(&self, _row: &DeviceBindingRow) -> Result<()> {
            Ok(())
        }
        async fn get_binding(&self, _device_id: &str) -> Result<Option<DeviceBindingRow>> {
            Ok(None)
        }
        async fn record_operation(&self, _row: &DeviceOperationRow) -> Result<()> {
            Ok(())
        }
        async fn update_operation(&self, _row: &DeviceOperationRow) -> Result<()> {
            Ok(())
        }
        async fn get_operation(&self, _operation_id: &str) -> Result<Option<DeviceOperationRow>> {
            Ok(None)
        }
        async fn upsert_task(&self, _row: &DigitalTaskRow) -> Result<()> {
            Ok(())
        }
        async fn get_task(&self, _task_id: &str) -> Result<Option<DigitalTaskRow>> {
            Ok(None)
        }
        async fn list_incomplete_tasks(&self) -> Result<Vec<DigitalTaskRow>> {
            Ok(vec![])
        }
        async fn record_lifelog_image(&self, _row: &LifelogImageRow) -> Result<()> {
            Ok(())
        }
        async fn record_lifelog_context(&self, _row: &LifelogContextRow) -> Result<()> {
            Ok(())
        }
        async fn record_lifelog_event(&self, _row: &LifelogEventRow) -> Result<()> {
            Ok(())
        }
        async fn record_telemetry(&self, _row: &TelemetrySampleRow) -> Result<()> {
            Ok(())
        }
        async fn record_observability_sample(&self, _row: &ObservabilitySampleRow) -> Result<()> {
            Ok(())
        }
        async fn enqueue_push(&self, _row: &PushQueueRow) -> Result<()> {
            Ok(())
        }
        async fn mark_push_delivered(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn list_pending_pushes(&self, _device_id: &str) -> Result<Vec<PushQueueRow>> {
            Ok(vec![])
        }
        async fn insert_thought_trace(&self, _row: &ocn_domain::trace::ThoughtTraceRow) -> Result<()> {
            Ok(())
        }
        async fn list_thought_traces(&self, _session_id: &str, _limit: usize) -> Result<Vec<ocn_domain::trace::ThoughtTraceRow>> {
            Ok(vec![])
        }
        async fn backup_to(&self, _dest_path: &str) -> Result<()> {
            Ok(())
        }
    }

    fn payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    async fn manager() -> SessionManager {
        SessionManager::new(Arc::new(FakeStore::default()))
    }

    #[tokio::test]
    async fn hello_moves_a_new_session_to_ready() {
        let mgr = manager().await;
        mgr.get_or_create("d1", "s1", 0).await.unwrap();
        let env = Envelope::new_event(EventType::Hello, "d1", "s1", 1, 0, Map::new());
        let outcome = mgr.handle_inbound(&env, 0).unwrap();
        assert_eq!(outcome.verdict, SequenceVerdict::InOrder);
        assert_eq!(outcome.state, SessionState::Ready);
    }

    #[tokio::test]
    async fn duplicate_heartbeat_is_flagged_but_acked() {
        let mgr = manager().await;
        mgr.get_or_create("d1", "s1", 0).await.unwrap();
        let hb1 = Envelope::new_event(EventType::Heartbeat, "d1", "s1", 1, 0, Map::new());
        mgr.handle_inbound(&hb1, 0).unwrap();
        let replay = Envelope::new_event(EventType::Heartbeat, "d1", "s1", 1, 0, Map::new());
        let outcome = mgr.handle_inbound(&replay, 0).unwrap();
        assert_eq!(outcome.verdict, SequenceVerdict::Duplicate);
        assert_eq!(outcome.side_effect, state_machine::SideEffect::EmitHeartbeatAck);
    }

    #[tokio::test]
    async fn out_of_order_seq_is_accepted_and_counted() {
        let mgr = manager().await;
        mgr.get_or_create("d1", "s1", 0).await.unwrap();
        let env = Envelope::new_event(EventType::Heartbeat, "d1", "s1", 5, 0, Map::new());
        let outcome = mgr.handle_inbound(&env, 0).unwrap();
        assert_eq!(outcome.verdict, SequenceVerdict::OutOfOrder { gap: 4 });
    }

    #[tokio::test]
    async fn audio_chunks_out_of_envelope_seq_order_still_reassemble() {
        let mgr = manager().await;
        mgr.get_or_create("d1", "s1", 0).await.unwrap();
        mgr.handle_inbound(&Envelope::new_event(EventType::Hello, "d1", "s1", 1, 0, Map::new()), 0);
        mgr.handle_inbound(&Envelope::new_event(EventType::ListenStart, "d1", "s1", 2, 0, Map::new()), 0);

        let c0 = Envelope::new_event(
            EventType::AudioChunk,
            "d1",
            "s1",
            3,
            0,
            payload(&[("chunk_index", Value::from(0)), ("text", Value::from("he"))]),
        );
        let c1 = Envelope::new_event(
            EventType::AudioChunk,
            "d1",
            "s1",
            4,
            0,
            payload(&[("chunk_index", Value::from(1)), ("text", Value::from("llo"))]),
        );
        let o0 = mgr.handle_inbound(&c0, 0).unwrap();
        assert_eq!(o0.stt_partial_text.as_deref(), Some("he"));
        let o1 = mgr.handle_inbound(&c1, 0).unwrap();
        assert_eq!(o1.stt_partial_text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn outbound_seq_strictly_increases() {
        let mgr = manager().await;
        mgr.get_or_create("d1", "s1", 0).await.unwrap();
        assert_eq!(mgr.next_outbound_seq("d1", "s1"), Some(1));
        assert_eq!(mgr.next_outbound_seq("d1", "s1"), Some(2));
    }

    #[tokio::test]
    async fn barge_in_transitions_speaking_back_to_listening() {
        let mgr = manager().await;
        mgr.get_or_create("d1", "s1", 0).await.unwrap();
        mgr.apply_trigger("d1", "s1", Trigger::Hello, 0);
        mgr.apply_trigger("d1", "s1", Trigger::ListenStart, 0);
        mgr.apply_trigger("d1", "s1", Trigger::ListenStop, 0);
        mgr.apply_trigger("d1", "s1", Trigger::ResponseReady, 0);
        let (state, effect) = mgr.apply_trigger("d1", "s1", Trigger::ListenStart, 0).unwrap();
        assert_eq!(state, SessionState::Listening);
        assert_eq!(effect, SideEffect::BargeIn);
    }
}
