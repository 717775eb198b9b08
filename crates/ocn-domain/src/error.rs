//! Error taxonomy (spec §7). Realtime-path errors degrade to fallback
//! behavior and are recorded as metrics/thought-traces rather than
//! propagated; API-path errors surface as `{success:false, error,
//! error_code}`. `error_code()` gives the stable string used in that body.

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("auth denied: {0}")]
    AuthDenied(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("queue dropped: {0}")]
    QueueDropped(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("replay rejected: {0}")]
    Replay(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("canceled: {0}")]
    Canceled(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The stable `error_code` string returned in API-path error bodies
    /// (spec §7).
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::AuthDenied(_) => "auth_denied",
            Error::QueueFull(_) => "queue_full",
            Error::QueueDropped(_) => "queue_dropped",
            Error::Duplicate(_) => "duplicate",
            Error::Replay(_) => "replay_rejected",
            Error::Timeout(_) => "timeout",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::PolicyDenied(_) => "policy_denied",
            Error::Canceled(_) => "canceled",
            Error::Internal(_) => "internal",
            Error::Io(_) => "internal",
            Error::Json(_) => "bad_request",
        }
    }

    /// Whether this error kind belongs to the realtime path and should
    /// degrade to fallback behavior rather than propagate (spec §7).
    pub fn is_realtime_degradable(&self) -> bool {
        matches!(self, Error::UpstreamUnavailable(_) | Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(Error::QueueFull("x".into()).error_code(), "queue_full");
        assert_eq!(Error::Replay("x".into()).error_code(), "replay_rejected");
        assert_eq!(Error::PolicyDenied("x".into()).error_code(), "policy_denied");
    }

    #[test]
    fn upstream_and_timeout_are_realtime_degradable() {
        assert!(Error::UpstreamUnavailable("llm down".into()).is_realtime_degradable());
        assert!(Error::Timeout("llm".into()).is_realtime_degradable());
        assert!(!Error::BadRequest("x".into()).is_realtime_degradable());
    }
}
