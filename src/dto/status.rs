use serde::Serialize;
use utoipa::ToSchema;

use crate::state::{cooldown::TimeLeft, status::Status};

/// Machine-readable status variant.
#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Loading,
    CanPlace,
    Placing,
    Cooldown,
}

/// Remaining cooldown split for display.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct TimeLeftDto {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub total_ms: u64,
}

impl From<TimeLeft> for TimeLeftDto {
    fn from(left: TimeLeft) -> Self {
        Self {
            days: left.days,
            hours: left.hours,
            minutes: left.minutes,
            seconds: left.seconds,
            total_ms: u64::try_from(left.total.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// What the status line shows, plus the inputs a renderer needs around it.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct StatusResponse {
    pub kind: StatusKind,
    /// Text shown to the user.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_left: Option<TimeLeftDto>,
    /// True for a short moment after a refused placement.
    pub shaking: bool,
    /// Colour the next placement will use.
    pub colour: String,
}

impl StatusResponse {
    pub fn new(status: Status, shaking: bool, colour: String) -> Self {
        let kind = match status {
            Status::Loading => StatusKind::Loading,
            Status::CanPlace => StatusKind::CanPlace,
            Status::Placing => StatusKind::Placing,
            Status::Cooldown(_) => StatusKind::Cooldown,
        };
        Self {
            kind,
            text: status.to_string(),
            time_left: status.time_left().map(Into::into),
            shaking,
            colour,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn cooldown_serialises_text_and_breakdown() {
        let status = Status::Cooldown(TimeLeft::from_duration(Duration::from_millis(65_500)));
        let body = serde_json::to_value(StatusResponse::new(status, true, "#E50000".into())).unwrap();
        assert_eq!(
            body,
            json!({
                "kind": "cooldown",
                "text": "1 minute 5 seconds until you can place a pixel.",
                "time_left": {"days": 0, "hours": 0, "minutes": 1, "seconds": 5, "total_ms": 65_500},
                "shaking": true,
                "colour": "#E50000",
            })
        );
    }

    #[test]
    fn can_place_has_no_breakdown() {
        let body =
            serde_json::to_value(StatusResponse::new(Status::CanPlace, false, "#000000".into()))
                .unwrap();
        assert_eq!(body["kind"], "can_place");
        assert!(body.get("time_left").is_none());
    }
}
