//! Board geometry, cell keys and colours.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Edge length of one cell in canvas pixels at scale 1.
pub const PIXEL_SIZE: f64 = 10.0;

/// Coordinates of one cell; its store key is `"{x}-{y}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub x: u32,
    pub y: u32,
}

impl CellKey {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cell key `{0}`: expected `<x>-<y>`")]
pub struct ParseCellKeyError(pub String);

impl FromStr for CellKey {
    type Err = ParseCellKeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (x, y) = value
            .split_once('-')
            .ok_or_else(|| ParseCellKeyError(value.to_owned()))?;
        let x = x.parse().map_err(|_| ParseCellKeyError(value.to_owned()))?;
        let y = y.parse().map_err(|_| ParseCellKeyError(value.to_owned()))?;
        let key = Self { x, y };
        // only the canonical spelling names a cell, so "03-4" cannot alias "3-4"
        if key.to_string() != value {
            return Err(ParseCellKeyError(value.to_owned()));
        }
        Ok(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid colour `{0}`: expected `#RRGGBB`")]
pub struct InvalidColour(pub String);

/// Six-digit hex colour, normalised to upper case (`#E50000`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Colour(String);

impl Colour {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Colour {
    type Err = InvalidColour;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let valid = trimmed.len() == 7
            && trimmed.starts_with('#')
            && trimmed[1..].chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(InvalidColour(value.to_owned()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for Colour {
    type Error = InvalidColour;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Colour> for String {
    fn from(value: Colour) -> Self {
        value.0
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sixteen-colour palette offered to users.
pub const DEFAULT_PALETTE: [&str; 16] = [
    "#FFFFFF", "#E4E4E4", "#888888", "#222222", "#FFA7D1", "#E50000", "#E59500", "#A06A42",
    "#E5D900", "#94E044", "#02BE01", "#00D3DD", "#0083C7", "#0000EA", "#CF6EE4", "#820080",
];

/// Palette entry selected when a session starts.
pub const DEFAULT_SELECTED_INDEX: usize = 5;

/// Colour shown for coordinates nobody has written.
pub const DEFAULT_BACKGROUND: &str = "#FFFFFF";

/// Pan/zoom state of the view the pointer coordinates are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scale: f64,
    pub translation_x: f64,
    pub translation_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            translation_x: 0.0,
            translation_y: 0.0,
        }
    }
}

/// Fixed-size grid of placeable cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    width: u32,
    height: u32,
}

impl Board {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Key of the cell at `(x, y)` when it lies on the board.
    pub fn cell(&self, x: i64, y: i64) -> Option<CellKey> {
        let key = CellKey::new(u32::try_from(x).ok()?, u32::try_from(y).ok()?);
        self.contains(key).then_some(key)
    }

    pub fn contains(&self, key: CellKey) -> bool {
        key.x < self.width && key.y < self.height
    }

    /// Map a pointer position in screen space to the cell under it, if any.
    pub fn cell_at_pointer(&self, client_x: f64, client_y: f64, viewport: &Viewport) -> Option<CellKey> {
        if !(viewport.scale.is_finite() && viewport.scale > 0.0) {
            return None;
        }
        let x = ((client_x - viewport.translation_x) / viewport.scale / PIXEL_SIZE).floor();
        let y = ((client_y - viewport.translation_y) / viewport.scale / PIXEL_SIZE).floor();
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        self.cell(x as i64, y as i64)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(1000, 1000)
    }
}
