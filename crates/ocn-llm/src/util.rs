//! Shared utility functions for the Anthropic client.

use ocn_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::UpstreamUnavailable`] so the orchestrator's realtime-path
/// degrade logic picks it up (spec §7).
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::UpstreamUnavailable(e.to_string())
    }
}

/// Resolve the Anthropic API key from the environment.
///
/// The LLM provider's credentials sit outside the device runtime's own
/// config model (spec §1 Non-goals), so this is a single env var lookup
/// rather than the multi-source precedence a provider-config section
/// would otherwise need.
pub(crate) fn resolve_api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var).map_err(|_| {
        Error::Internal(format!(
            "environment variable '{}' not set or not valid UTF-8",
            env_var
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "OCN_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let result = resolve_api_key(var_name).unwrap();
        assert_eq!(result, "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let err = resolve_api_key("OCN_TEST_NONEXISTENT_VAR_8888").unwrap_err();
        assert!(err.to_string().contains("internal error"));
    }
}
