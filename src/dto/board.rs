use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dto::format_system_time,
    state::{
        board::{Board, CellKey},
        replica::{Cell, Replica, ReplicaDelta},
    },
};

/// One cell as drawn by a renderer.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct CellDto {
    pub x: u32,
    pub y: u32,
    pub colour: String,
    /// Identity that placed the colour; absent for seeded and unwritten cells.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// RFC 3339 placement time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placed_at: Option<String>,
}

impl CellDto {
    /// Placeholder for a coordinate nobody has written.
    pub fn unwritten(key: CellKey, colour: &str) -> Self {
        Self {
            x: key.x,
            y: key.y,
            colour: colour.to_owned(),
            uid: None,
            placed_at: None,
        }
    }
}

impl From<&Cell> for CellDto {
    fn from(cell: &Cell) -> Self {
        Self {
            x: cell.key.x,
            y: cell.key.y,
            colour: cell.colour.clone(),
            uid: cell.uid.clone(),
            placed_at: cell.placement_time.map(format_system_time),
        }
    }
}

/// Full snapshot of the local replica.
#[derive(Debug, Serialize, ToSchema)]
pub struct BoardSnapshot {
    /// Replica version the snapshot was taken at.
    pub version: u64,
    pub width: u32,
    pub height: u32,
    /// Colour of every cell not listed in `cells`.
    pub default_colour: String,
    pub cells: Vec<CellDto>,
}

impl BoardSnapshot {
    pub fn capture(replica: &Replica, board: Board, default_colour: &str) -> Self {
        let mut cells: Vec<CellDto> = replica.cells().map(CellDto::from).collect();
        cells.sort_by_key(|cell| (cell.y, cell.x));
        Self {
            version: replica.version(),
            width: board.width(),
            height: board.height(),
            default_colour: default_colour.to_owned(),
            cells,
        }
    }
}

/// Cells touched by one applied change batch.
///
/// Events carry consecutive versions. A gap, or a `board.resync` event, means the
/// renderer missed changes and should refetch `/board`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CellsChangedEvent {
    pub version: u64,
    /// Cells written or overwritten, each listed once in first-touched order.
    pub cells: Vec<CellDto>,
    /// Keys (`"{x}-{y}"`) of cells removed from the board.
    pub removed: Vec<String>,
}

impl From<&ReplicaDelta> for CellsChangedEvent {
    fn from(delta: &ReplicaDelta) -> Self {
        Self {
            version: delta.version,
            cells: delta.written.iter().map(CellDto::from).collect(),
            removed: delta.removed.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Board-wide notice carrying only a replica version.
#[derive(Debug, Serialize, ToSchema)]
pub struct BoardVersionEvent {
    pub version: u64,
}
