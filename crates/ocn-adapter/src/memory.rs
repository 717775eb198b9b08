//! Queue-backed in-memory adapter for tests and the `mock` device
//! profile. Grounded on the Python `MockAdapter` reference: an inbound
//! queue fed by `inject_event`, an outbound queue drained by
//! `next_command`/`pending_commands`.

use async_trait::async_trait;
use ocn_domain::{Error, Result};
use ocn_protocol::Envelope;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::contract::{Adapter, EventStream};

pub struct MemoryAdapter {
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    outbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound_tx,
            outbound_rx: AsyncMutex::new(outbound_rx),
        }
    }

    /// Feed a canonical event into the adapter as if a device sent it.
    pub fn inject_event(&self, envelope: Envelope) {
        let _ = self.inbound_tx.send(envelope);
    }

    /// Await the next outbound command sent by the runtime.
    pub async fn next_command(&self) -> Option<Envelope> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Drain all currently queued outbound commands without waiting.
    pub fn pending_commands(&self) -> Vec<Envelope> {
        let mut rx = self.outbound_rx.blocking_lock();
        let mut items = Vec::new();
        while let Ok(env) = rx.try_recv() {
            items.push(env);
        }
        items
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
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
        self.outbound_tx
            .send(envelope)
            .map_err(|e| Error::Internal(format!("memory adapter outbound closed: {e}")))
    }

    async fn inject(&self, envelope: Envelope) -> Result<()> {
        self.inject_event(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use ocn_protocol::EventType;
    use serde_json::Map;

    fn hello(device: &str, session: &str, seq: u64) -> Envelope {
        Envelope::new_event(EventType::Hello, device, session, seq, 0, Map::new())
    }

    #[tokio::test]
    async fn injected_events_flow_through_events_stream() {
        let adapter = MemoryAdapter::new();
        let mut stream = adapter.events().expect("events available once");
        adapter.inject_event(hello("d1", "s1", 1));

        let received = stream.next().await.expect("one event");
        assert_eq!(received.device_id, "d1");
    }

    #[tokio::test]
    async fn events_can_only_be_taken_once() {
        let adapter = MemoryAdapter::new();
        assert!(adapter.events().is_some());
        assert!(adapter.events().is_none());
    }

    #[tokio::test]
    async fn sent_commands_are_queued_for_pickup() {
        let adapter = MemoryAdapter::new();
        adapter.ack("d1", "s1", 5).await.unwrap();
        let pending = adapter.pending_commands();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].get_u64("ack_seq"), Some(5));
    }
}
