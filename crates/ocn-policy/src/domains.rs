//! Tool domain policy (spec §4.6): which tools a turn may call, scoped by
//! transport channel and per-turn call limits. Ported from the original
//! `ToolDomainManager`'s channel/system/recursion guard.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone)]
pub struct ToolPolicy {
    pub domain: String,
    pub allowed_channels: Vec<String>,
    pub allow_system: bool,
    pub max_calls_per_turn: u32,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self { domain: "server_tools".into(), allowed_channels: vec!["device".into()], allow_system: false, max_calls_per_turn: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    SystemNotAllowed,
    ChannelNotAllowed,
    CallLimitExceeded,
}

pub struct ToolDomainManager {
    policies: RwLock<HashMap<String, ToolPolicy>>,
}

impl Default for ToolDomainManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolDomainManager {
    pub fn new() -> Self {
        Self { policies: RwLock::new(HashMap::new()) }
    }

    pub fn register_tool(&self, name: &str, policy: ToolPolicy) {
        if name.trim().is_empty() {
            return;
        }
        self.policies.write().insert(name.to_string(), policy);
    }

    /// Register names from an MCP server's tool list that aren't already
    /// known, defaulting them into the `mcp_tools` domain.
    pub fn register_mcp_tools(&self, tool_names: &[String]) {
        for name in tool_names {
            if !name.starts_with("mcp_") {
                continue;
            }
            let mut policies = self.policies.write();
            policies.entry(name.clone()).or_insert(ToolPolicy {
                domain: "mcp_tools".into(),
                allowed_channels: vec!["device".into(), "control_api".into()],
                allow_system: false,
                max_calls_per_turn: 0,
            });
        }
    }

    fn policy_for(&self, name: &str) -> ToolPolicy {
        if let Some(p) = self.policies.read().get(name) {
            return p.clone();
        }
        if name.starts_with("mcp_") {
            return ToolPolicy {
                domain: "mcp_tools".into(),
                allowed_channels: vec!["device".into(), "control_api".into()],
                allow_system: false,
                max_calls_per_turn: 0,
            };
        }
        ToolPolicy::default()
    }

    /// Whether `name` may run in `channel`, given the calls already made
    /// this turn (`call_counts`).
    pub fn can_execute(&self, name: &str, channel: &str, is_system: bool, call_counts: &HashMap<String, u32>) -> Result<(), Denial> {
        let policy = self.policy_for(name);
        if is_system && !policy.allow_system {
            return Err(Denial::SystemNotAllowed);
        }
        if !policy.allowed_channels.is_empty() && !policy.allowed_channels.iter().any(|c| c == channel) {
            return Err(Denial::ChannelNotAllowed);
        }
        if policy.max_calls_per_turn > 0 && *call_counts.get(name).unwrap_or(&0) >= policy.max_calls_per_turn {
            return Err(Denial::CallLimitExceeded);
        }
        Ok(())
    }

    /// Filter `available` down to the names allowed for `channel`.
    pub fn allowed_tool_names(&self, available: &[String], channel: &str, is_system: bool) -> Vec<String> {
        let call_counts = HashMap::new();
        available.iter().filter(|name| self.can_execute(name, channel, is_system, &call_counts).is_ok()).cloned().collect()
    }

    /// Number of explicitly-registered tool policies (excludes the
    /// default policy unregistered names fall back to), for status
    /// reporting.
    pub fn registered_count(&self) -> usize {
        self.policies.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_tool_defaults_to_server_tools_device_only() {
        let mgr = ToolDomainManager::new();
        assert!(mgr.can_execute("custom_tool", "device", false, &HashMap::new()).is_ok());
        assert_eq!(mgr.can_execute("custom_tool", "control_api", false, &HashMap::new()), Err(Denial::ChannelNotAllowed));
    }

    #[test]
    fn system_calls_need_allow_system() {
        let mgr = ToolDomainManager::new();
        mgr.register_tool("shutdown", ToolPolicy { domain: "server_tools".into(), allowed_channels: vec!["device".into()], allow_system: false, max_calls_per_turn: 0 });
        assert_eq!(mgr.can_execute("shutdown", "device", true, &HashMap::new()), Err(Denial::SystemNotAllowed));
    }

    #[test]
    fn call_limit_enforced_per_turn() {
        let mgr = ToolDomainManager::new();
        mgr.register_tool("limited", ToolPolicy { domain: "server_tools".into(), allowed_channels: vec!["device".into()], allow_system: false, max_calls_per_turn: 1 });
        let mut counts = HashMap::new();
        assert!(mgr.can_execute("limited", "device", false, &counts).is_ok());
        counts.insert("limited".into(), 1);
        assert_eq!(mgr.can_execute("limited", "device", false, &counts), Err(Denial::CallLimitExceeded));
    }

    #[test]
    fn mcp_tools_are_auto_scoped_to_device_and_control_api() {
        let mgr = ToolDomainManager::new();
        mgr.register_mcp_tools(&["mcp_search".into()]);
        assert!(mgr.can_execute("mcp_search", "control_api", false, &HashMap::new()).is_ok());
    }
}
