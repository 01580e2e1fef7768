use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse",
    tag = "sse",
    responses((status = 200, description = "Status, cell and shake events", content_type = "text/event-stream", body = String))
)]
/// Stream `status.changed`, `cells.changed` and `shake` events to a renderer.
///
/// `board.loaded` and `board.resync` carry only a version and ask the renderer to
/// (re)fetch `/board`.
pub async fn stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe_public(&state);
    info!("New SSE connection");
    sse_service::to_sse_stream(receiver, sse_service::handshake(&state))
}

/// Configure the SSE endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse", get(stream))
}
