use axum::{Json, Router, extract::State, http::StatusCode, routing::get};

use crate::{
    dto::health::{HealthResponse, HealthState},
    services::health_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "health",
    responses(
        (status = 200, description = "Store reachable and board subscription alive", body = HealthResponse),
        (status = 503, description = "Store unreachable or board subscription failed", body = HealthResponse)
    )
)]
/// Report store reachability and the board replica phase.
pub async fn healthcheck(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let health = health_service::health_status(&state).await;
    let code = match health.status {
        HealthState::Ok => StatusCode::OK,
        HealthState::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(health))
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/healthcheck", get(healthcheck))
}
