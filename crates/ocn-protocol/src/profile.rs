//! Device profiles: per-vendor packet framing and field-alias tables
//! (spec §4.1). Grounded on `original_source/nanobot/hardware/adapter/
//! device_profiles.py` — the only place in the runtime allowed to touch
//! raw string keys before an envelope is built.

use std::collections::HashMap;
use serde_json::{Map, Value};

/// How the device uploads audio frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioUploadMode {
    /// Raw framed binary packets (e.g. serial/MQTT byte streams).
    FramedPacket,
    /// Base64-encoded audio inside a JSON payload.
    JsonB64,
}

/// A named device profile: packet framing plus the alias table that
/// normalizes vendor field/type names into the canonical protocol.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: String,
    /// First byte of a framed packet, when the transport is packet-framed.
    pub packet_magic: Option<u8>,
    pub audio_upload_mode: AudioUploadMode,
    /// vendor event/command type string -> canonical type string.
    pub type_aliases: HashMap<String, String>,
    /// vendor payload field name -> canonical field name.
    pub field_aliases: HashMap<String, String>,
}

impl DeviceProfile {
    /// Rewrite a raw type string through this profile's alias table.
    /// Unknown strings pass through unchanged (still handled by the
    /// protocol's `Unknown` escape hatch downstream).
    pub fn normalize_type<'a>(&'a self, raw: &'a str) -> &'a str {
        self.type_aliases.get(raw).map(String::as_str).unwrap_or(raw)
    }

    /// Rewrite top-level payload keys in place through the field-alias
    /// table. Leaves unrecognized keys untouched.
    pub fn normalize_payload(&self, payload: Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::with_capacity(payload.len());
        for (k, v) in payload {
            let canonical = self.field_aliases.get(&k).cloned().unwrap_or(k);
            out.insert(canonical, v);
        }
        out
    }
}

/// Lookup table of built-in profiles, keyed by the `hardware.adapter`
/// config value.
pub struct DeviceProfileRegistry {
    profiles: HashMap<String, DeviceProfile>,
}

impl Default for DeviceProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DeviceProfileRegistry {
    /// The built-in profiles: `mock` (no translation, used by the
    /// in-memory adapter and tests), `ec600` (a packet-framed modem with
    /// camelCase control fields), and `generic_mqtt` (JSON-over-MQTT with
    /// a `boot` alias for `hello`).
    pub fn builtin() -> Self {
        let mut profiles = HashMap::new();

        profiles.insert(
            "mock".to_string(),
            DeviceProfile {
                name: "mock".to_string(),
                packet_magic: None,
                audio_upload_mode: AudioUploadMode::JsonB64,
                type_aliases: HashMap::new(),
                field_aliases: HashMap::new(),
            },
        );

        let mut ec600_fields = HashMap::new();
        ec600_fields.insert("deviceId".to_string(), "device_id".to_string());
        ec600_fields.insert("sessionId".to_string(), "session_id".to_string());
        ec600_fields.insert("chunkIndex".to_string(), "chunk_index".to_string());
        ec600_fields.insert("audioB64".to_string(), "audio_b64".to_string());
        let mut ec600_types = HashMap::new();
        ec600_types.insert("boot".to_string(), "hello".to_string());
        profiles.insert(
            "ec600".to_string(),
            DeviceProfile {
                name: "ec600".to_string(),
                packet_magic: Some(0x7E),
                audio_upload_mode: AudioUploadMode::FramedPacket,
                type_aliases: ec600_types,
                field_aliases: ec600_fields,
            },
        );

        let mut generic_types = HashMap::new();
        generic_types.insert("boot".to_string(), "hello".to_string());
        profiles.insert(
            "generic_mqtt".to_string(),
            DeviceProfile {
                name: "generic_mqtt".to_string(),
                packet_magic: None,
                audio_upload_mode: AudioUploadMode::JsonB64,
                type_aliases: generic_types,
                field_aliases: HashMap::new(),
            },
        );

        Self { profiles }
    }

    pub fn get(&self, name: &str) -> Option<&DeviceProfile> {
        self.profiles.get(name)
    }

    pub fn insert(&mut self, profile: DeviceProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec600_normalizes_camel_case_fields() {
        let registry = DeviceProfileRegistry::builtin();
        let profile = registry.get("ec600").unwrap();
        let mut payload = Map::new();
        payload.insert("chunkIndex".to_string(), Value::from(3));
        payload.insert("text".to_string(), Value::from("hi"));
        let normalized = profile.normalize_payload(payload);
        assert!(normalized.contains_key("chunk_index"));
        assert!(normalized.contains_key("text"));
        assert!(!normalized.contains_key("chunkIndex"));
    }

    #[test]
    fn generic_mqtt_aliases_boot_to_hello() {
        let registry = DeviceProfileRegistry::builtin();
        let profile = registry.get("generic_mqtt").unwrap();
        assert_eq!(profile.normalize_type("boot"), "hello");
        assert_eq!(profile.normalize_type("heartbeat"), "heartbeat");
    }

    #[test]
    fn mock_profile_is_passthrough() {
        let registry = DeviceProfileRegistry::builtin();
        let profile = registry.get("mock").unwrap();
        assert_eq!(profile.normalize_type("hello"), "hello");
    }

    #[test]
    fn unknown_profile_name_returns_none() {
        let registry = DeviceProfileRegistry::builtin();
        assert!(registry.get("nonexistent").is_none());
    }
}
