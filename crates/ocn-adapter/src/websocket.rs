//! WebSocket southbound adapter: the runtime is the server, devices
//! dial in. Grounded on the gateway's node WebSocket endpoint (constant-
//! time token comparison, per-connection outbound channel, reader/writer
//! split) generalized from node-to-gateway to device-to-runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use ocn_domain::interfaces::DurableStore;
use ocn_domain::{Error, Result};
use ocn_policy::{validate_device_token, AuthVerdict};
use ocn_protocol::profile::DeviceProfile;
use ocn_protocol::Envelope;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use crate::contract::{Adapter, EventStream};
use crate::replay::{ReplayGuard, ReplayPolicy, ReplayVerdict};

fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

struct DeviceConnection {
    sink: mpsc::UnboundedSender<Envelope>,
}

/// Bound per-device buffer of control frames queued while a device is
/// offline (spec §4.1: `offline_control_buffer`, drop-oldest on overflow).
struct OfflineBuffer {
    max_len: usize,
    queue: VecDeque<Envelope>,
}

impl OfflineBuffer {
    fn new(max_len: usize) -> Self {
        Self {
            max_len,
            queue: VecDeque::new(),
        }
    }

    fn push(&mut self, envelope: Envelope) -> bool {
        let dropped = self.queue.len() >= self.max_len;
        if dropped {
            self.queue.pop_front();
        }
        self.queue.push_back(envelope);
        dropped
    }

    fn drain(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }
}

pub struct WebSocketAdapter {
    expected_token: Option<String>,
    offline_buffer_size: usize,
    connections: Arc<Mutex<HashMap<String, DeviceConnection>>>,
    offline: Arc<Mutex<HashMap<String, OfflineBuffer>>>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    replay: ReplayGuard,
    profile: DeviceProfile,
    store: Arc<dyn DurableStore>,
    device_auth_enabled: bool,
}

#[derive(Clone)]
pub struct WebSocketAdapterHandle(Arc<WebSocketAdapter>);

impl WebSocketAdapter {
    pub fn new(
        expected_token: Option<String>,
        offline_buffer_size: usize,
        replay_policy: ReplayPolicy,
        profile: DeviceProfile,
        store: Arc<dyn DurableStore>,
        device_auth_enabled: bool,
    ) -> (Arc<Self>, WebSocketAdapterHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let adapter = Arc::new(Self {
            expected_token,
            offline_buffer_size,
            connections: Arc::new(Mutex::new(HashMap::new())),
            offline: Arc::new(Mutex::new(HashMap::new())),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            replay: ReplayGuard::new(replay_policy),
            profile,
            store,
            device_auth_enabled,
        });
        let handle = WebSocketAdapterHandle(adapter.clone());
        (adapter, handle)
    }

    fn device_connected(&self, device_id: &str, sink: mpsc::UnboundedSender<Envelope>) {
        let backlog = {
            let mut offline = self.offline.lock();
            offline
                .get_mut(device_id)
                .map(|b| b.drain())
                .unwrap_or_default()
        };
        for envelope in backlog {
            let _ = sink.send(envelope);
        }
        self.connections
            .lock()
            .insert(device_id.to_string(), DeviceConnection { sink });
    }

    fn device_disconnected(&self, device_id: &str) {
        self.connections.lock().remove(device_id);
    }
}

#[async_trait]
impl Adapter for WebSocketAdapter {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.connections.lock().clear();
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
        let sink = self.connections.lock().get(&envelope.device_id).map(|c| c.sink.clone());
        match sink {
            Some(sink) => sink
                .send(envelope)
                .map_err(|e| Error::Internal(format!("device socket closed: {e}"))),
            None => {
                let mut offline = self.offline.lock();
                let buf = offline
                    .entry(envelope.device_id.clone())
                    .or_insert_with(|| OfflineBuffer::new(self.offline_buffer_size));
                let device_id = envelope.device_id.clone();
                if buf.push(envelope) {
                    tracing::warn!(device_id = %device_id, "offline control buffer overflow, dropped oldest");
                }
                Ok(())
            }
        }
    }

    async fn inject(&self, envelope: Envelope) -> Result<()> {
        let verdict = self.replay.check(&envelope.device_id, &envelope.session_id, envelope.seq, envelope.ts_ms, now_ms());
        match verdict {
            ReplayVerdict::Accept => self
                .inbound_tx
                .send(envelope)
                .map_err(|e| Error::Internal(format!("websocket inbound channel closed: {e}"))),
            ReplayVerdict::Duplicate => Err(Error::Duplicate("envelope seq already seen for this device".into())),
            ReplayVerdict::ReplayRejected => Err(Error::Replay("envelope timestamp outside the allowed clock skew".into())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /v1/device/ws?token=...` — upgrade to a device WebSocket session.
pub async fn device_ws(
    ws: WebSocketUpgrade,
    State(handle): State<WebSocketAdapterHandle>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Some(expected) = &handle.0.expected_token {
        let provided = query.token.as_deref().unwrap_or("");
        if !token_eq(provided, expected) {
            return (axum::http::StatusCode::UNAUTHORIZED, "invalid device token").into_response();
        }
    }
    let presented_token = query.token.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, handle, presented_token)).into_response()
}

/// Rewrite a raw inbound JSON frame's `type` and payload field names
/// through the adapter's configured device profile before it is parsed
/// into a canonical envelope. Leaves everything else untouched.
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

async fn handle_socket(socket: WebSocket, handle: WebSocketAdapterHandle, presented_token: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();

    let mut device_id: Option<String> = None;
    let mut authenticated = false;

    let writer = tokio::spawn(async move {
        while let Some(env) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&env) else { continue };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                let raw_json: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(error = %e, "inbound frame was not valid json");
                        continue;
                    }
                };
                let normalized = normalize_envelope_json(&handle.0.profile, raw_json);
                match serde_json::from_value::<Envelope>(normalized) {
                    Ok(env) => {
                        if device_id.is_none() {
                            if handle.0.device_auth_enabled {
                                let binding = handle.0.store.get_binding(&env.device_id).await.ok().flatten();
                                match validate_device_token(binding.as_ref(), &presented_token) {
                                    AuthVerdict::Allowed => authenticated = true,
                                    verdict => {
                                        tracing::warn!(device_id = %env.device_id, ?verdict, "rejected device websocket handshake");
                                        break;
                                    }
                                }
                            } else {
                                authenticated = true;
                            }
                            device_id = Some(env.device_id.clone());
                            handle.0.device_connected(&env.device_id, outbound_tx.clone());
                        }
                        if !authenticated {
                            continue;
                        }
                        let verdict = handle.0.replay.check(&env.device_id, &env.session_id, env.seq, env.ts_ms, now_ms());
                        match verdict {
                            ReplayVerdict::Accept => {
                                let _ = handle.0.inbound_tx.send(env);
                            }
                            ReplayVerdict::Duplicate | ReplayVerdict::ReplayRejected => {
                                tracing::debug!(device_id = %env.device_id, seq = env.seq, ?verdict, "dropped replayed inbound envelope");
                            }
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "failed to parse inbound envelope"),
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    if let Some(id) = device_id {
        handle.0.device_disconnected(&id);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_buffer_drops_oldest_on_overflow() {
        let mut buf = OfflineBuffer::new(2);
        assert!(!buf.push(env("d", "s", 1)));
        assert!(!buf.push(env("d", "s", 2)));
        assert!(buf.push(env("d", "s", 3)));
        let drained = buf.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].seq, 2);
        assert_eq!(drained[1].seq, 3);
    }

    fn env(device: &str, session: &str, seq: u64) -> Envelope {
        Envelope::new_command(
            ocn_protocol::CommandType::Ack,
            device,
            session,
            seq,
            0,
            serde_json::Map::new(),
        )
    }
}
