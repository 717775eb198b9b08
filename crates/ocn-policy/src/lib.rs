//! Policy Gates (spec §4.6): device auth validation, tool domain
//! routing, and the two pure decision functions that shape every
//! outbound device message — safety (risk/confidence) and interaction
//! (tone/proactivity/silence).

pub mod auth;
pub mod domains;
pub mod interaction;
pub mod safety;

pub use auth::{validate_device_token, AuthVerdict};
pub use domains::{Denial, ToolDomainManager, ToolPolicy};
pub use interaction::{InteractionContext, InteractionDecision, InteractionPolicy};
pub use safety::{SafetyDecision, SafetyPolicy};
