use tracing::debug;

use crate::{
    dto::{
        board::{BoardSnapshot, CellDto},
        placement::{ColourSelection, PlacementResponse},
        status::StatusResponse,
    },
    error::ServiceError,
    state::{
        SharedState,
        board::{Colour, Viewport},
    },
};

/// Snapshot of the whole replica; fails while the board has not loaded.
pub fn board_snapshot(state: &SharedState) -> Result<BoardSnapshot, ServiceError> {
    let session = state.session();
    let replica = session.replica();
    let replica = replica.borrow();
    if !replica.is_live() {
        return Err(ServiceError::Loading);
    }
    Ok(BoardSnapshot::capture(
        &replica,
        session.board(),
        state.config().default_colour().as_str(),
    ))
}

/// One cell, falling back to the default colour when nobody has written it.
pub fn cell(state: &SharedState, x: i64, y: i64) -> Result<CellDto, ServiceError> {
    let session = state.session();
    let key = session
        .board()
        .cell(x, y)
        .ok_or(ServiceError::OutOfBounds { x, y })?;
    let replica = session.replica();
    let replica = replica.borrow();
    if !replica.is_live() {
        return Err(ServiceError::Loading);
    }
    Ok(replica.get(key).map(CellDto::from).unwrap_or_else(|| {
        CellDto::unwritten(key, state.config().default_colour().as_str())
    }))
}

pub fn status(state: &SharedState) -> StatusResponse {
    let session = state.session();
    StatusResponse::new(
        session.current_status(),
        session.is_shaking(),
        session.colour().to_string(),
    )
}

pub fn colour_selection(state: &SharedState) -> ColourSelection {
    ColourSelection {
        colour: state.session().colour().to_string(),
        palette: state
            .config()
            .palette()
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}

pub fn select_colour(state: &SharedState, colour: &str) -> Result<ColourSelection, ServiceError> {
    let colour = colour
        .parse::<Colour>()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    state.session().select_colour(colour);
    Ok(colour_selection(state))
}

pub async fn place(state: &SharedState, x: i64, y: i64) -> Result<PlacementResponse, ServiceError> {
    let confirmed = state.session().place(x, y).await?;
    Ok(confirmed.into())
}

/// Placement from a pointer position; `Ok(None)` when the pointer is off the board.
pub async fn interact(
    state: &SharedState,
    client_x: f64,
    client_y: f64,
    viewport: Viewport,
) -> Result<Option<PlacementResponse>, ServiceError> {
    let placed = state
        .session()
        .interact(client_x, client_y, &viewport)
        .await?;
    if placed.is_none() {
        debug!("interaction ignored");
    }
    Ok(placed.map(Into::into))
}
