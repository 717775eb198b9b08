//! Device authentication (spec §4.6): a presented token is valid only
//! against an `activated` binding, compared in constant time. Grounded
//! on the gateway's bearer-token middleware, generalized from a single
//! shared secret to one token per bound device.

use ocn_domain::model::{BindingStatus, DeviceBindingRow};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVerdict {
    Allowed,
    Unbound,
    Revoked,
    TokenMismatch,
}

impl AuthVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthVerdict::Allowed)
    }
}

/// Compare two tokens by their SHA-256 digest in constant time, avoiding
/// both a timing side channel and any length-dependent early return.
pub fn token_eq(presented: &str, expected: &str) -> bool {
    let a = Sha256::digest(presented.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    bool::from(a.ct_eq(&b))
}

/// Validate a device's presented token against its current binding row.
pub fn validate_device_token(binding: Option<&DeviceBindingRow>, presented_token: &str) -> AuthVerdict {
    let Some(binding) = binding else {
        return AuthVerdict::Unbound;
    };
    match binding.status {
        BindingStatus::Revoked => AuthVerdict::Revoked,
        BindingStatus::Registered | BindingStatus::Bound => AuthVerdict::Unbound,
        BindingStatus::Activated => {
            if token_eq(presented_token, &binding.device_token) {
                AuthVerdict::Allowed
            } else {
                AuthVerdict::TokenMismatch
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn binding(status: BindingStatus, token: &str) -> DeviceBindingRow {
        DeviceBindingRow {
            device_id: "d1".into(),
            device_token: token.into(),
            status,
            user_id: Some("u1".into()),
            activated_at: Some(0),
            revoked_at: None,
            revoke_reason: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn activated_binding_with_matching_token_is_allowed() {
        let b = binding(BindingStatus::Activated, "secret");
        assert_eq!(validate_device_token(Some(&b), "secret"), AuthVerdict::Allowed);
    }

    #[test]
    fn mismatched_token_is_rejected() {
        let b = binding(BindingStatus::Activated, "secret");
        assert_eq!(validate_device_token(Some(&b), "wrong"), AuthVerdict::TokenMismatch);
    }

    #[test]
    fn revoked_binding_is_rejected_even_with_correct_token() {
        let b = binding(BindingStatus::Revoked, "secret");
        assert_eq!(validate_device_token(Some(&b), "secret"), AuthVerdict::Revoked);
    }

    #[test]
    fn unbound_device_has_no_binding_row() {
        assert_eq!(validate_device_token(None, "anything"), AuthVerdict::Unbound);
    }

    #[test]
    fn not_yet_activated_binding_is_treated_as_unbound() {
        let b = binding(BindingStatus::Bound, "secret");
        assert_eq!(validate_device_token(Some(&b), "secret"), AuthVerdict::Unbound);
    }
}
