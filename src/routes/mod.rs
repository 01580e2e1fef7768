use axum::Router;

use crate::state::SharedState;

pub mod board;
pub mod docs;
pub mod health;
pub mod placement;
pub mod sse;

/// Compose the canvas routes and the Swagger UI over the shared state.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(board::router())
        .merge(placement::router())
        .merge(docs::router());

    api_router.with_state(state)
}
