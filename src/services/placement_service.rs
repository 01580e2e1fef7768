//! Atomic placement: one batch writing the cell and the placer's cooldown record.

use std::time::SystemTime;

use tracing::{info, warn};

use crate::{
    dao::canvas::CanvasRepository,
    error::ServiceError,
    services::identity::Identity,
    state::{
        board::{CellKey, Colour},
        gate::PlacementPermit,
    },
};

/// A placement the store has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed {
    pub key: CellKey,
    pub colour: Colour,
    /// Store-assigned time written into both documents.
    pub committed_at: SystemTime,
}

/// Commit a placement while holding `permit`.
///
/// The permit is released on both paths. A failed commit leaves the cooldown untouched;
/// a successful one is only reflected locally once the user record comes back.
pub async fn submit(
    repository: &CanvasRepository,
    permit: PlacementPermit,
    key: CellKey,
    colour: Colour,
    uid: &Identity,
) -> Result<Confirmed, ServiceError> {
    match repository.commit_placement(key, &colour, uid.as_str()).await {
        Ok(receipt) => {
            permit.confirm(receipt.committed_at);
            info!(key = %key, colour = %colour, uid = %uid, "pixel placed");
            Ok(Confirmed {
                key,
                colour,
                committed_at: receipt.committed_at,
            })
        }
        Err(err) => {
            drop(permit);
            warn!(key = %key, uid = %uid, error = %err, "placement failed; cooldown not consumed");
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        dao::document_store::memory::InMemoryDocumentStore,
        state::gate::{PlacementGate, Submission, UserRecord},
    };

    fn setup() -> (InMemoryDocumentStore, CanvasRepository, PlacementGate) {
        let store = InMemoryDocumentStore::new();
        let repository = CanvasRepository::new(Arc::new(store.clone()));
        let gate = PlacementGate::new(Duration::from_secs(1), Duration::from_millis(250));
        (store, repository, gate)
    }

    #[tokio::test]
    async fn committed_placement_awaits_confirmation() {
        let (_store, repository, gate) = setup();
        let permit = gate.try_begin(UserRecord::Absent, SystemTime::now()).unwrap();

        let confirmed = submit(
            &repository,
            permit,
            CellKey::new(3, 4),
            "#E50000".parse().unwrap(),
            &Identity::new("u1"),
        )
        .await
        .unwrap();

        assert!(!gate.is_locked());
        assert_eq!(
            gate.submission(),
            Submission::Confirming {
                committed_at: confirmed.committed_at
            }
        );
    }

    #[tokio::test]
    async fn failed_placement_releases_the_gate() {
        let (store, repository, gate) = setup();
        store.fail_next_commits(1);
        let permit = gate.try_begin(UserRecord::Absent, SystemTime::now()).unwrap();

        let outcome = submit(
            &repository,
            permit,
            CellKey::new(3, 4),
            "#E50000".parse().unwrap(),
            &Identity::new("u1"),
        )
        .await;

        assert!(matches!(outcome, Err(ServiceError::Unavailable(_))));
        assert!(!gate.is_locked());
        assert_eq!(gate.submission(), Submission::Idle);
        assert!(repository.find_cell(CellKey::new(3, 4)).await.unwrap().is_none());
    }
}
