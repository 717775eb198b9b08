//! API-path error response shape (spec §7): `{success:false, error,
//! error_code}`. Realtime-path errors never flow through here — they
//! degrade inside the orchestrator instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use ocn_domain::error::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::BadRequest(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AuthDenied(_) => StatusCode::UNAUTHORIZED,
            Error::PolicyDenied(_) => StatusCode::FORBIDDEN,
            Error::Duplicate(_) | Error::Replay(_) => StatusCode::CONFLICT,
            Error::QueueFull(_) | Error::QueueDropped(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::Canceled(_) => StatusCode::CONFLICT,
            Error::Internal(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": self.0.to_string(),
            "error_code": self.0.error_code(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_found_maps_to_404_with_stable_error_code() {
        let resp = ApiError(Error::NotFound("device 'd1'".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "not_found");
    }

    #[tokio::test]
    async fn policy_denied_maps_to_403() {
        let resp = ApiError(Error::PolicyDenied("device revoked".into())).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn queue_full_maps_to_429() {
        let resp = ApiError(Error::QueueFull("lifelog ingest queue".into())).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn internal_error_maps_to_500_and_is_not_leaked_as_success() {
        let resp = ApiError(Error::Internal("boom".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "internal");
    }
}
