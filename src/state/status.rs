//! User-facing placement status derived from the gate.

use std::{fmt, time::SystemTime};

use crate::state::{
    cooldown::TimeLeft,
    gate::{GateState, PlacementGate, Submission, UserRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Loading,
    CanPlace,
    Placing,
    Cooldown(TimeLeft),
}

impl Status {
    /// Project the status from everything the gate decides on.
    pub fn project(
        record: UserRecord,
        submission: Submission,
        gate: &PlacementGate,
        now: SystemTime,
    ) -> Self {
        PlacementGate::derive(record, submission, gate.interval(), now).into()
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Status::Loading => "loading",
            Status::CanPlace => "can_place",
            Status::Placing => "placing",
            Status::Cooldown(_) => "cooldown",
        }
    }

    pub fn time_left(&self) -> Option<TimeLeft> {
        match self {
            Status::Cooldown(left) => Some(*left),
            _ => None,
        }
    }
}

impl From<GateState> for Status {
    fn from(state: GateState) -> Self {
        match state {
            GateState::Unloaded => Status::Loading,
            GateState::Eligible => Status::CanPlace,
            GateState::InFlight => Status::Placing,
            GateState::Cooling(left) => Status::Cooldown(left),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Loading => f.write_str("Loading..."),
            Status::CanPlace => f.write_str("Place a pixel!"),
            Status::Placing => f.write_str("Placing..."),
            Status::Cooldown(left) => left.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn texts_match_each_state() {
        assert_eq!(Status::Loading.to_string(), "Loading...");
        assert_eq!(Status::CanPlace.to_string(), "Place a pixel!");
        assert_eq!(Status::Placing.to_string(), "Placing...");
        assert_eq!(
            Status::Cooldown(TimeLeft::from_duration(Duration::from_secs(3))).to_string(),
            "3 seconds until you can place a pixel."
        );
    }

    #[test]
    fn projection_tracks_the_gate() {
        let gate = PlacementGate::new(Duration::from_secs(10), Duration::from_millis(250));
        let last = SystemTime::UNIX_EPOCH + Duration::from_secs(100);

        let status = Status::project(
            UserRecord::Present(last),
            Submission::Idle,
            &gate,
            last + Duration::from_secs(4),
        );
        assert_eq!(status.kind(), "cooldown");
        assert_eq!(status.time_left().unwrap().seconds, 6);

        let status = Status::project(UserRecord::Absent, Submission::Submitting, &gate, last);
        assert_eq!(status, Status::Placing);
        assert_eq!(
            Status::project(UserRecord::Unloaded, Submission::Idle, &gate, last),
            Status::Loading
        );
    }
}
