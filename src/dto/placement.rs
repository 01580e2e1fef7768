use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{format_system_time, validation::validate_colour},
    services::placement_service::Confirmed,
    state::board::Viewport,
};

/// Placement attempt at board coordinates.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PlaceRequest {
    #[validate(range(min = 0))]
    pub x: i64,
    #[validate(range(min = 0))]
    pub y: i64,
}

/// Pointer interaction in screen space, mapped onto the board through the viewport.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct InteractRequest {
    pub client_x: f64,
    pub client_y: f64,
    /// Zoom factor of the view; defaults to 1.
    #[serde(default = "unit_scale")]
    #[validate(range(exclusive_min = 0.0))]
    pub scale: f64,
    #[serde(default)]
    pub translation_x: f64,
    #[serde(default)]
    pub translation_y: f64,
}

impl InteractRequest {
    pub fn viewport(&self) -> Viewport {
        Viewport {
            scale: self.scale,
            translation_x: self.translation_x,
            translation_y: self.translation_y,
        }
    }
}

fn unit_scale() -> f64 {
    1.0
}

/// Colour used by subsequent placements.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SelectColourRequest {
    /// `#RRGGBB`; palette entries and arbitrary colours are both accepted.
    pub colour: String,
}

impl Validate for SelectColourRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_colour(&self.colour) {
            errors.add("colour", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Currently selected colour and the palette offered to the user.
#[derive(Debug, Serialize, ToSchema)]
pub struct ColourSelection {
    pub colour: String,
    pub palette: Vec<String>,
}

/// Placement committed by the store.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlacementResponse {
    pub x: u32,
    pub y: u32,
    pub colour: String,
    /// RFC 3339 commit time assigned by the store.
    pub committed_at: String,
}

impl From<Confirmed> for PlacementResponse {
    fn from(confirmed: Confirmed) -> Self {
        Self {
            x: confirmed.key.x,
            y: confirmed.key.y,
            colour: confirmed.colour.to_string(),
            committed_at: format_system_time(confirmed.committed_at),
        }
    }
}
