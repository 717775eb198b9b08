//! Southbound adapters (spec §4.1): terminate a device transport and
//! present the runtime with a canonical event stream plus an outbound
//! submit operation. Built-in transports: in-memory (tests, `mock`
//! profile), WebSocket (runtime as server), and MQTT (runtime as a
//! broker client).

pub mod contract;
pub mod memory;
pub mod mqtt;
pub mod reconnect;
pub mod replay;
pub mod websocket;

pub use contract::{Adapter, EventStream};
pub use memory::MemoryAdapter;
pub use mqtt::{InMemoryMqttTransport, MqttAdapter, MqttTopics, MqttTransport};
pub use reconnect::ReconnectBackoff;
pub use replay::{ReplayGuard, ReplayPolicy, ReplayVerdict};
pub use websocket::{device_ws, WebSocketAdapter, WebSocketAdapterHandle};
