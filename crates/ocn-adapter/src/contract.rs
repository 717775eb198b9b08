//! The southbound adapter contract (spec §4.1): whatever terminates the
//! device transport must present this shape to the orchestrator.

use async_trait::async_trait;
use ocn_domain::stream::BoxStream;
use ocn_domain::Result;
use ocn_protocol::Envelope;

/// A lazy, finite stream of inbound canonical events. Terminates when the
/// adapter's `stop()` is called; not restartable afterward.
pub type EventStream = BoxStream<'static, Envelope>;

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Bring the transport up. Fails if the underlying link cannot be
    /// established.
    async fn start(&self) -> Result<()>;

    /// Drain and close cleanly. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Take ownership of the inbound event stream. Callable once; a
    /// second call returns `None`.
    fn events(&self) -> Option<EventStream>;

    /// Fire-and-forget submit of an outbound canonical envelope. Must
    /// preserve per-device submission order.
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Feed a canonical envelope into the inbound event stream as if the
    /// transport itself had received it. Used by the Control HTTP API's
    /// device-event/command ingestion routes for callers that can't hold
    /// a live device connection. Adapters that have no notion of an
    /// out-of-band inbound frame (none currently) may leave the default,
    /// which rejects the call.
    async fn inject(&self, _envelope: Envelope) -> Result<()> {
        Err(ocn_domain::Error::BadRequest(
            "this adapter does not accept out-of-band inbound envelopes".into(),
        ))
    }

    /// Sugar over `send`: acknowledge a received sequence number. Callers
    /// that already hold a session-allocated outbound `seq` (the normal
    /// orchestrator path) should build the envelope themselves and call
    /// `send` directly instead; this helper is for auth-denial and other
    /// paths that act before a session exists.
    async fn ack(&self, device_id: &str, session_id: &str, seq: u64) -> Result<()> {
        use ocn_protocol::CommandType;
        let mut payload = serde_json::Map::new();
        payload.insert("ack_seq".into(), serde_json::Value::from(seq));
        let now_ms = chrono::Utc::now().timestamp_millis();
        let env = Envelope::new_command(CommandType::Ack, device_id, session_id, seq, now_ms, payload);
        self.send(env).await
    }

    /// Sugar over `send`: close a session with a reason.
    async fn close_session(&self, device_id: &str, session_id: &str, reason: &str) -> Result<()> {
        use ocn_protocol::CommandType;
        let mut payload = serde_json::Map::new();
        payload.insert("reason".into(), serde_json::Value::from(reason));
        let now_ms = chrono::Utc::now().timestamp_millis();
        let env = Envelope::new_command(CommandType::Close, device_id, session_id, 0, now_ms, payload);
        self.send(env).await
    }
}
