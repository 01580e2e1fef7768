//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::board::Colour;

/// Validates that a colour is a `#RRGGBB` hex string (either case).
///
/// # Examples
///
/// ```ignore
/// validate_colour("#E50000") // Ok
/// validate_colour("#e50000") // Ok
/// validate_colour("red")     // Err
/// ```
pub fn validate_colour(colour: &str) -> Result<(), ValidationError> {
    if colour.parse::<Colour>().is_err() {
        let mut err = ValidationError::new("colour_format");
        err.message = Some(format!("Colour must look like #RRGGBB (got `{colour}`)").into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_colour_valid() {
        assert!(validate_colour("#E50000").is_ok());
        assert!(validate_colour("#00d3dd").is_ok());
    }

    #[test]
    fn test_validate_colour_invalid() {
        assert!(validate_colour("E50000").is_err()); // missing hash
        assert!(validate_colour("#E500").is_err()); // too short
        assert!(validate_colour("#E50000FF").is_err()); // alpha not supported
        assert!(validate_colour("white").is_err());
    }
}
