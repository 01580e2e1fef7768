//! Startup seeding of default cells.

use futures::{StreamExt, TryStreamExt, stream};
use tracing::info;

use crate::{
    dao::canvas::CanvasRepository,
    error::ServiceError,
    state::board::{Board, CellKey, Colour},
};

const CONCURRENT_WRITES: usize = 16;

/// Write `colour` into every empty cell of the `size × size` square at the origin.
///
/// Existing cells are never overwritten, so running it again is harmless. Returns the
/// number of cells written.
pub async fn seed_default_cells(
    repository: &CanvasRepository,
    board: Board,
    size: u32,
    colour: &Colour,
) -> Result<usize, ServiceError> {
    let width = size.min(board.width());
    let height = size.min(board.height());
    let keys = (0..width).flat_map(|x| (0..height).map(move |y| CellKey::new(x, y)));

    let written = stream::iter(keys)
        .map(|key| repository.seed_cell(key, colour))
        .buffer_unordered(CONCURRENT_WRITES)
        .try_fold(0usize, |written, wrote| async move { Ok(written + usize::from(wrote)) })
        .await?;

    info!(written, size, "default cells seeded");
    Ok(written)
}
