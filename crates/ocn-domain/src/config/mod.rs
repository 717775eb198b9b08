//! Layered runtime configuration (spec §6). Loading from TOML/env is a
//! caller concern (out of scope, per spec §1); this module only defines
//! the recognized shape, its defaults, and validation.

mod hardware;
mod interaction;
mod lifelog;
mod safety;
mod tasks;

pub use hardware::*;
pub use interaction::*;
pub use lifelog::*;
pub use safety::*;
pub use tasks::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub lifelog: LifelogConfig,
    #[serde(default)]
    pub digital_task: DigitalTaskConfig,
}

/// A config problem found during validation. `Error` kinds block startup;
/// `Warning` kinds are logged but non-fatal, mirroring the teacher's
/// config-severity convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl Config {
    /// Validate cross-field invariants that serde's per-field defaults
    /// can't express. Returns all issues found; callers should bail on
    /// any `Error`-severity issue before serving traffic.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.hardware.enabled && self.hardware.heartbeat_seconds == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "hardware.heartbeat_seconds must be > 0 when hardware is enabled".into(),
            });
        }

        if self.hardware.auth.device_auth_enabled && self.hardware.auth.token.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "hardware.auth.device_auth_enabled is set but no control-api token is configured".into(),
            });
        }

        if self.lifelog.dedup_max_distance > 64 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "lifelog.dedup_max_distance must be <= 64 (dhash is a 64-bit hash)".into(),
            });
        }

        if self.digital_task.max_concurrent_tasks == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "digital_task.max_concurrent_tasks must be > 0".into(),
            });
        }

        if self.interaction.quiet_hours.enabled
            && (self.interaction.quiet_hours.start_hour > 23
                || self.interaction.quiet_hours.end_hour > 23)
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "interaction.quiet_hours start_hour/end_hour must be 0-23".into(),
            });
        }

        issues
    }

    pub fn has_blocking_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_blocking_errors() {
        let cfg = Config::default();
        assert!(!cfg.has_blocking_errors());
    }

    #[test]
    fn zero_heartbeat_with_hardware_enabled_is_an_error() {
        let mut cfg = Config::default();
        cfg.hardware.enabled = true;
        cfg.hardware.heartbeat_seconds = 0;
        assert!(cfg.has_blocking_errors());
    }

    #[test]
    fn toml_round_trip() {
        let cfg = Config::default();
        let s = toml::to_string(&cfg).expect("serialize");
        let back: Config = toml::from_str(&s).expect("deserialize");
        assert_eq!(back.hardware.port, cfg.hardware.port);
    }
}
