pub mod auth;
pub mod device;
pub mod error;
pub mod lifelog;
pub mod policy;
pub mod status;
pub mod tasks;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the Control HTTP API router (spec §6).
///
/// Device binding/operation writes and digital-task control are gated
/// behind the bearer-token middleware; runtime status is public so health
/// probes don't need a token. The device WebSocket route, when the
/// adapter is `Websocket`, is mounted separately by `main.rs` against its
/// own `WebSocketAdapterHandle`-scoped state.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/runtime/status", get(status::runtime_status));

    let protected = Router::new()
        .route("/v1/devices/register", post(device::register))
        .route("/v1/devices/:device_id/bind", post(device::bind))
        .route("/v1/devices/:device_id/activate", post(device::activate))
        .route("/v1/devices/:device_id/revoke", post(device::revoke))
        .route("/v1/operations", post(device::record_operation))
        .route("/v1/operations/:operation_id", get(device::get_operation))
        .route("/v1/device/event", post(device::post_event))
        .route("/v1/device/command", post(device::post_command))
        .route("/v1/sessions/:session_id/traces", get(device::list_traces))
        .route("/v1/policy/preview", post(policy::preview))
        .route("/v1/lifelog/ingest", post(lifelog::ingest))
        .route("/v1/tasks/execute", post(tasks::execute))
        .route("/v1/tasks/:task_id", get(tasks::get))
        .route("/v1/tasks/:task_id/cancel", post(tasks::cancel))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
