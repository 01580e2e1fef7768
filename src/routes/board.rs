use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::{
        board::{BoardSnapshot, CellDto},
        status::StatusResponse,
    },
    error::AppError,
    services::canvas_service,
    state::SharedState,
};

/// Read-only views of the replica and the status line.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/board", get(board))
        .route("/board/cells/{x}/{y}", get(cell))
        .route("/status", get(status))
}

/// Full replica snapshot.
#[utoipa::path(
    get,
    path = "/board",
    tag = "board",
    responses(
        (status = 200, description = "Current board", body = BoardSnapshot),
        (status = 503, description = "Board still loading or its subscription failed")
    )
)]
pub async fn board(State(state): State<SharedState>) -> Result<Json<BoardSnapshot>, AppError> {
    Ok(Json(canvas_service::board_snapshot(&state)?))
}

/// A single cell; unwritten cells report the default colour.
#[utoipa::path(
    get,
    path = "/board/cells/{x}/{y}",
    tag = "board",
    params(
        ("x" = i64, Path, description = "Column"),
        ("y" = i64, Path, description = "Row")
    ),
    responses(
        (status = 200, description = "Cell", body = CellDto),
        (status = 400, description = "Coordinates outside the board"),
        (status = 503, description = "Board still loading")
    )
)]
pub async fn cell(
    State(state): State<SharedState>,
    Path((x, y)): Path<(i64, i64)>,
) -> Result<Json<CellDto>, AppError> {
    Ok(Json(canvas_service::cell(&state, x, y)?))
}

#[utoipa::path(
    get,
    path = "/status",
    tag = "board",
    responses((status = 200, description = "Current status line", body = StatusResponse))
)]
pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(canvas_service::status(&state))
}
