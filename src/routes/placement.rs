use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::placement::{
        ColourSelection, InteractRequest, PlaceRequest, PlacementResponse, SelectColourRequest,
    },
    error::AppError,
    services::canvas_service,
    state::SharedState,
};

/// Routes through which the user acts on the board.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/colour", get(current_colour).post(select_colour))
        .route("/place", post(place))
        .route("/interact", post(interact))
}

/// Selected colour and palette.
#[utoipa::path(
    get,
    path = "/colour",
    tag = "placement",
    responses((status = 200, description = "Selected colour", body = ColourSelection))
)]
pub async fn current_colour(State(state): State<SharedState>) -> Json<ColourSelection> {
    Json(canvas_service::colour_selection(&state))
}

/// Select the colour used by subsequent placements.
#[utoipa::path(
    post,
    path = "/colour",
    tag = "placement",
    request_body = SelectColourRequest,
    responses(
        (status = 200, description = "Colour selected", body = ColourSelection),
        (status = 400, description = "Not a #RRGGBB colour")
    )
)]
pub async fn select_colour(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SelectColourRequest>>,
) -> Result<Json<ColourSelection>, AppError> {
    Ok(Json(canvas_service::select_colour(&state, &payload.colour)?))
}

/// Place the selected colour at board coordinates.
#[utoipa::path(
    post,
    path = "/place",
    tag = "placement",
    request_body = PlaceRequest,
    responses(
        (status = 202, description = "Placement committed; cooldown follows from the user record", body = PlacementResponse),
        (status = 400, description = "Coordinates outside the board"),
        (status = 409, description = "Placement refused (cooling down or already placing)"),
        (status = 503, description = "Still loading or the store failed")
    )
)]
pub async fn place(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<PlaceRequest>>,
) -> Result<(StatusCode, Json<PlacementResponse>), AppError> {
    let placed = canvas_service::place(&state, payload.x, payload.y).await?;
    Ok((StatusCode::ACCEPTED, Json(placed)))
}

/// Place through a pointer interaction; pointers off the board are ignored.
#[utoipa::path(
    post,
    path = "/interact",
    tag = "placement",
    request_body = InteractRequest,
    responses(
        (status = 202, description = "Placement committed", body = PlacementResponse),
        (status = 204, description = "Pointer outside the board; nothing happened"),
        (status = 409, description = "Placement refused (cooling down or already placing)"),
        (status = 503, description = "Still loading or the store failed")
    )
)]
pub async fn interact(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<InteractRequest>>,
) -> Result<Response, AppError> {
    let viewport = payload.viewport();
    let placed =
        canvas_service::interact(&state, payload.client_x, payload.client_y, viewport).await?;
    Ok(match placed {
        Some(placed) => (StatusCode::ACCEPTED, Json(placed)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}
