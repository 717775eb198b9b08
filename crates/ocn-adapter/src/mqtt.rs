//! MQTT southbound adapter (spec §6): topic scheme `device/+/up/{control,audio}`
//! down to `device/{id}/down/{control,audio}`.
//!
//! The actual broker connection is delegated to an injectable
//! [`MqttTransport`] rather than a concrete client crate: no MQTT client
//! is grounded anywhere in this workspace's dependency corpus, so wiring
//! one in here would be a fabricated dependency. A production deployment
//! plugs a real client (e.g. `rumqttc`) in behind this trait; tests use
//! [`InMemoryMqttTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use ocn_domain::interfaces::DurableStore;
use ocn_domain::{Error, Result};
use ocn_policy::{validate_device_token, AuthVerdict};
use ocn_protocol::profile::DeviceProfile;
use ocn_protocol::Envelope;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::contract::{Adapter, EventStream};
use crate::replay::{ReplayGuard, ReplayPolicy, ReplayVerdict};

/// What the MQTT adapter needs from a broker connection: publish a raw
/// payload to a topic, and a receive-side channel of `(topic, payload)`
/// handed to it at construction time.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MqttTopics {
    pub up_control: String,
    pub up_audio: String,
    pub down_control_template: String,
    pub down_audio_template: String,
    pub qos_control: u8,
    pub qos_audio: u8,
}

impl Default for MqttTopics {
    fn default() -> Self {
        Self {
            up_control: "device/+/up/control".into(),
            up_audio: "device/+/up/audio".into(),
            down_control_template: "device/{id}/down/control".into(),
            down_audio_template: "device/{id}/down/audio".into(),
            qos_control: 1,
            qos_audio: 0,
        }
    }
}

impl MqttTopics {
    pub fn down_control_topic(&self, device_id: &str) -> String {
        self.down_control_template.replace("{id}", device_id)
    }

    pub fn down_audio_topic(&self, device_id: &str) -> String {
        self.down_audio_template.replace("{id}", device_id)
    }

    /// `device/{id}/up/control` -> `Some(id)` when `topic` matches the
    /// up-control wildcard pattern.
    pub fn extract_device_id(&self, topic: &str) -> Option<String> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() == 4 && parts[0] == "device" && parts[2] == "up" {
            Some(parts[1].to_string())
        } else {
            None
        }
    }
}

pub struct MqttAdapter {
    topics: MqttTopics,
    transport: Arc<dyn MqttTransport>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    replay: ReplayGuard,
    profile: DeviceProfile,
    store: Arc<dyn DurableStore>,
    device_auth_enabled: bool,
}

impl MqttAdapter {
    pub fn new(
        topics: MqttTopics,
        transport: Arc<dyn MqttTransport>,
        replay_policy: ReplayPolicy,
        profile: DeviceProfile,
        store: Arc<dyn DurableStore>,
        device_auth_enabled: bool,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            topics,
            transport,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            replay: ReplayGuard::new(replay_policy),
            profile,
            store,
            device_auth_enabled,
        }
    }

    /// Called by the broker client's receive loop for every inbound
    /// message. Decodes JSON-framed envelopes regardless of whether they
    /// arrived on the control or audio topic, after running the frame
    /// through the device profile's field/type normalizer, a replay
    /// check, and (when enabled) per-device token validation. MQTT has
    /// no connection-level handshake, so the presented token travels in
    /// the envelope payload's `token` field instead of a query string.
    pub async fn on_broker_message(&self, topic: &str, payload: &[u8]) {
        if self.topics.extract_device_id(topic).is_none() {
            tracing::debug!(topic, "mqtt message on unrecognized topic");
            return;
        }
        let raw_json: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "mqtt payload was not valid json");
                return;
            }
        };
        let normalized = normalize_envelope_json(&self.profile, raw_json);
        let env = match serde_json::from_value::<Envelope>(normalized) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(error = %e, "failed to decode mqtt envelope");
                return;
            }
        };

        if self.device_auth_enabled {
            let presented = env.get_str("token").unwrap_or("").to_string();
            let binding = self.store.get_binding(&env.device_id).await.ok().flatten();
            match validate_device_token(binding.as_ref(), &presented) {
                AuthVerdict::Allowed => {}
                verdict => {
                    tracing::warn!(device_id = %env.device_id, ?verdict, "rejected mqtt envelope");
                    return;
                }
            }
        }

        let verdict = self.replay.check(&env.device_id, &env.session_id, env.seq, env.ts_ms, now_ms());
        match verdict {
            ReplayVerdict::Accept => {
                let _ = self.inbound_tx.send(env);
            }
            ReplayVerdict::Duplicate | ReplayVerdict::ReplayRejected => {
                tracing::debug!(device_id = %env.device_id, seq = env.seq, ?verdict, "dropped replayed mqtt envelope");
            }
        }
    }
}

/// Rewrite a raw inbound JSON frame's `type` and payload field names
/// through the adapter's configured device profile before it is parsed
/// into a canonical envelope.
fn normalize_envelope_json(profile: &DeviceProfile, mut raw: Value) -> Value {
    let Some(obj) = raw.as_object_mut() else { return raw };
    if let Some(Value::String(msg_type)) = obj.get("type") {
        let normalized = profile.normalize_type(msg_type).to_string();
        obj.insert("type".to_string(), Value::String(normalized));
    }
    if let Some(Value::Object(payload)) = obj.remove("payload") {
        obj.insert("payload".to_string(), Value::Object(profile.normalize_payload(payload)));
    }
    raw
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl Adapter for MqttAdapter {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn events(&self) -> Option<EventStream> {
        let mut guard = self.inbound_rx.lock();
        let rx = guard.take()?;
        Some(Box::pin(async_stream::stream! {
            let mut rx = rx;
            while let Some(env) = rx.recv().await {
                yield env;
            }
        }))
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let is_audio = matches!(
            envelope.kind.as_command(),
            Some(c) if matches!(c, ocn_protocol::CommandType::TtsChunk)
        );
        let (topic, qos) = if is_audio {
            (self.topics.down_audio_topic(&envelope.device_id), self.topics.qos_audio)
        } else {
            (self.topics.down_control_topic(&envelope.device_id), self.topics.qos_control)
        };
        let payload = serde_json::to_vec(&envelope).map_err(Error::from)?;
        self.transport.publish(&topic, payload, qos).await
    }

    async fn inject(&self, envelope: Envelope) -> Result<()> {
        let verdict = self.replay.check(&envelope.device_id, &envelope.session_id, envelope.seq, envelope.ts_ms, now_ms());
        match verdict {
            ReplayVerdict::Accept => self
                .inbound_tx
                .send(envelope)
                .map_err(|e| Error::Internal(format!("mqtt inbound channel closed: {e}"))),
            ReplayVerdict::Duplicate => Err(Error::Duplicate("envelope seq already seen for this device".into())),
            ReplayVerdict::ReplayRejected => Err(Error::Replay("envelope timestamp outside the allowed clock skew".into())),
        }
    }
}

/// In-memory `MqttTransport` used by tests: records every publish so a
/// test can assert on the topic/QoS the adapter chose.
#[derive(Default)]
pub struct InMemoryMqttTransport {
    published: Mutex<Vec<(String, Vec<u8>, u8)>>,
}

#[async_trait]
impl MqttTransport for InMemoryMqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: u8) -> Result<()> {
        self.published.lock().push((topic.to_string(), payload, qos));
        Ok(())
    }
}

impl InMemoryMqttTransport {
    pub fn published(&self) -> Vec<(String, Vec<u8>, u8)> {
        self.published.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocn_domain::model::{
        DeviceBindingRow, DeviceOperationRow, DeviceSessionRow, DigitalTaskRow, LifelogContextRow,
        LifelogEventRow, LifelogImageRow, ObservabilitySampleRow, PushQueueRow, TelemetrySampleRow,
    };
    use serde_json::Map;

    #[derive(Default)]
    struct FakeStore {
        binding: Mutex<Option<DeviceBindingRow>>,
    }

    #[async_trait]
    impl DurableStore for FakeStore {
        async fn upsert_session(&self, _row: &DeviceSessionRow) -> Result<()> { Ok(()) }
        async fn get_session(&self, _device_id: &str, _session_id: &str) -> Result<Option<DeviceSessionRow>> { Ok(None) }
        async fn close_session(&self, _device_id: &str, _session_id: &str, _reason: &str, _now_ms: i64) -> Result<()> { Ok(()) }
        async fn upsert_binding(&self, row: &DeviceBindingRow) -> Result<()> {
            *self.binding.lock() = Some(row.clone());
            Ok(())
        }
        async fn get_binding(&self, _device_id: &str) -> Result<Option<DeviceBindingRow>> { Ok(self.binding.lock().clone()) }
        async fn record_operation(&self, _row: &DeviceOperationRow) -> Result<()> { Ok(()) }
        async fn update_operation(&self, _row: &DeviceOperationRow) -> Result<()> { Ok(()) }
        async fn get_operation(&self, _operation_id: &str) -> Result<Option<DeviceOperationRow>> { Ok(None) }
        async fn upsert_task(&self, _row: &DigitalTaskRow) -> Result<()> { Ok(()) }
        async fn get_task(&self, _task_id: &str) -> Result<Option<DigitalTaskRow>> { Ok(None) }
        async fn list_incomplete_tasks(&self) -> Result<Vec<DigitalTaskRow>> { Ok(vec![]) }
        async fn record_lifelog_image(&self, _row: &LifelogImageRow) -> Result<()> { Ok(()) }
        async fn record_lifelog_context(&self, _row: &LifelogContextRow) -> Result<()> { Ok(()) }
        async fn record_lifelog_event(&self, _row: &LifelogEventRow) -> Result<()> { Ok(()) }
        async fn record_telemetry(&self, _row: &TelemetrySampleRow) -> Result<()> { Ok(()) }
        async fn record_observability_sample(&self, _row: &ObservabilitySampleRow) -> Result<()> { Ok(()) }
        async fn enqueue_push(&self, _row: &PushQueueRow) -> Result<()> { Ok(()) }
        async fn mark_push_delivered(&self, _id: &str) -> Result<()> { Ok(()) }
        async fn list_pending_pushes(&self, _device_id: &str) -> Result<Vec<PushQueueRow>> { Ok(vec![]) }
        async fn insert_thought_trace(&self, _row: &ocn_domain::trace::ThoughtTraceRow) -> Result<()> { Ok(()) }
        async fn list_thought_traces(&self, _session_id: &str, _limit: usize) -> Result<Vec<ocn_domain::trace::ThoughtTraceRow>> { Ok(vec![]) }
        async fn backup_to(&self, _dest_path: &str) -> Result<()> { Ok(()) }
    }

    fn adapter(transport: Arc<dyn MqttTransport>, device_auth_enabled: bool) -> MqttAdapter {
        MqttAdapter::new(
            MqttTopics::default(),
            transport,
            ReplayPolicy::default(),
            ocn_protocol::profile::DeviceProfileRegistry::builtin().get("mock").unwrap().clone(),
            Arc::new(FakeStore::default()),
            device_auth_enabled,
        )
    }

    #[test]
    fn topic_templates_substitute_device_id() {
        let topics = MqttTopics::default();
        assert_eq!(topics.down_control_topic("abc"), "device/abc/down/control");
    }

    #[test]
    fn extracts_device_id_from_up_topic() {
        let topics = MqttTopics::default();
        assert_eq!(topics.extract_device_id("device/abc/up/control"), Some("abc".into()));
        assert_eq!(topics.extract_device_id("other/topic"), None);
    }

    #[tokio::test]
    async fn send_routes_control_commands_to_control_topic() {
        let transport = Arc::new(InMemoryMqttTransport::default());
        let adapter = adapter(transport.clone(), false);
        let env = Envelope::new_command(ocn_protocol::CommandType::Ack, "d1", "s1", 1, 0, Map::new());
        adapter.send(env).await.unwrap();
        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "device/d1/down/control");
    }

    #[tokio::test]
    async fn broker_message_on_recognized_topic_reaches_the_event_stream() {
        use futures_util::StreamExt;

        let transport = Arc::new(InMemoryMqttTransport::default());
        let adapter = adapter(transport, false);
        let mut stream = adapter.events().expect("events available once");

        let env = Envelope::new_event(ocn_protocol::EventType::Heartbeat, "d1", "s1", 1, 0, Map::new());
        let payload = serde_json::to_vec(&env).unwrap();
        adapter.on_broker_message("device/d1/up/control", &payload).await;

        let received = stream.next().await.expect("one event");
        assert_eq!(received.device_id, "d1");
    }

    #[tokio::test]
    async fn broker_message_on_unknown_topic_is_ignored() {
        let transport = Arc::new(InMemoryMqttTransport::default());
        let adapter = adapter(transport, false);
        adapter.on_broker_message("garbage", b"{}").await;
    }

    #[tokio::test]
    async fn broker_message_is_dropped_when_device_auth_rejects_it() {
        use futures_util::StreamExt;

        let transport = Arc::new(InMemoryMqttTransport::default());
        let adapter = adapter(transport, true);
        let mut stream = adapter.events().expect("events available once");

        let env = Envelope::new_event(ocn_protocol::EventType::Heartbeat, "d1", "s1", 1, 0, Map::new());
        let payload = serde_json::to_vec(&env).unwrap();
        adapter.on_broker_message("device/d1/up/control", &payload).await;

        tokio::time::timeout(std::time::Duration::from_millis(50), stream.next())
            .await
            .expect_err("no event should have been forwarded for an unbound device");
    }
}
