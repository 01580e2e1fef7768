use serde::Serialize;
use utoipa::ToSchema;

use crate::state::replica::ReplicaPhase;

/// Overall verdict of the `/healthcheck` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Degraded,
}

/// Loading phase of the local board replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BoardPhase {
    Loading,
    Live,
    Failed,
}

impl From<ReplicaPhase> for BoardPhase {
    fn from(phase: ReplicaPhase) -> Self {
        match phase {
            ReplicaPhase::Loading => BoardPhase::Loading,
            ReplicaPhase::Live => BoardPhase::Live,
            ReplicaPhase::Failed => BoardPhase::Failed,
        }
    }
}

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthState,
    /// Whether the document store answered a ping.
    pub store_reachable: bool,
    pub board: BoardPhase,
    /// Renderers currently attached to `/sse`.
    pub sse_subscribers: usize,
}

impl HealthResponse {
    /// Degraded when the store is unreachable or the board subscription died.
    pub fn evaluate(store_reachable: bool, board: ReplicaPhase, sse_subscribers: usize) -> Self {
        let status = if store_reachable && board != ReplicaPhase::Failed {
            HealthState::Ok
        } else {
            HealthState::Degraded
        };
        Self {
            status,
            store_reachable,
            board: board.into(),
            sse_subscribers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_loading_board_is_still_healthy() {
        let health = HealthResponse::evaluate(true, ReplicaPhase::Loading, 0);
        assert_eq!(health.status, HealthState::Ok);
        assert_eq!(health.board, BoardPhase::Loading);
    }

    #[test]
    fn unreachable_store_or_failed_board_degrades() {
        assert_eq!(
            HealthResponse::evaluate(false, ReplicaPhase::Live, 2).status,
            HealthState::Degraded
        );
        let failed = HealthResponse::evaluate(true, ReplicaPhase::Failed, 1);
        assert_eq!(failed.status, HealthState::Degraded);
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({
                "status": "degraded",
                "store_reachable": true,
                "board": "failed",
                "sse_subscribers": 1
            })
        );
    }
}
