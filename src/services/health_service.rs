use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the store and report whether the canvas is fully operational.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store_reachable = match state.store().health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };
    let phase = state.session().replica().borrow().phase();
    HealthResponse::evaluate(store_reachable, phase, state.public_sse().subscriber_count())
}
