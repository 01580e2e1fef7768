//! Local mirror of the shared board, built from ordered change batches.

use std::{collections::HashMap, time::SystemTime};

use indexmap::IndexSet;
use serde::Deserialize;
use serde_with::{TimestampMilliSeconds, serde_as};
use tokio::sync::watch;
use tracing::warn;

use crate::{
    dao::{
        document_store::{ChangeBatch, ChangeKind, Document},
        models::from_document,
    },
    state::board::CellKey,
};

/// Read handle on the latest replica; every batch publishes a new version.
pub type ReplicaView = watch::Receiver<Replica>;

/// Loading state of the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaPhase {
    /// No batch received yet.
    #[default]
    Loading,
    /// The baseline batch has been applied.
    Live,
    /// The subscription failed; the replica is empty and will not recover by itself.
    Failed,
}

/// One written cell as seen by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: CellKey,
    pub colour: String,
    pub uid: Option<String>,
    pub placement_time: Option<SystemTime>,
}

/// What one applied batch changed, as the cells stood right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaDelta {
    pub version: u64,
    /// The batch that loaded the board; its cells are better read as a snapshot.
    pub baseline: bool,
    /// Cells written or overwritten, each once in first-touched order.
    pub written: Vec<Cell>,
    pub removed: Vec<CellKey>,
}

/// Fields of a cell document the replica reads. The key is authoritative for coordinates.
#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellContent {
    colour: String,
    #[serde(default)]
    uid: Option<String>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    placement_time: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct Replica {
    cells: HashMap<CellKey, Cell>,
    version: u64,
    touched: Vec<CellKey>,
    phase: ReplicaPhase,
    /// Version produced by the baseline batch.
    loaded_at: u64,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one change batch in order and bump the version.
    ///
    /// Returns how many changes were applied. Changes with a malformed key or document
    /// are skipped; the rest of the batch still applies.
    pub fn apply(&mut self, batch: &ChangeBatch) -> usize {
        self.touched.clear();
        for change in &batch.changes {
            let key = match change.key.parse::<CellKey>() {
                Ok(key) => key,
                Err(err) => {
                    warn!(key = %change.key, error = %err, "skipping change for malformed cell key");
                    continue;
                }
            };
            match change.kind {
                ChangeKind::Removed => {
                    self.cells.remove(&key);
                }
                ChangeKind::Added | ChangeKind::Modified => {
                    match decode_cell(key, &change.key, &change.document) {
                        Ok(cell) => {
                            self.cells.insert(key, cell);
                        }
                        Err(err) => {
                            warn!(key = %change.key, error = %err, "skipping malformed cell document");
                            continue;
                        }
                    }
                }
            }
            self.touched.push(key);
        }
        self.version += 1;
        if self.phase == ReplicaPhase::Loading {
            self.phase = ReplicaPhase::Live;
            self.loaded_at = self.version;
        }
        self.touched.len()
    }

    /// Drop every cell and mark the replica as failed.
    pub fn fail(&mut self) {
        self.cells.clear();
        self.touched.clear();
        self.phase = ReplicaPhase::Failed;
        self.version += 1;
    }

    pub fn phase(&self) -> ReplicaPhase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase == ReplicaPhase::Live
    }

    /// Monotonic token incremented on every published change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Keys changed by the last applied batch, in application order.
    pub fn touched(&self) -> &[CellKey] {
        &self.touched
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(&key)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    /// Outcome of the last applied batch.
    pub fn delta(&self) -> ReplicaDelta {
        let mut written = Vec::new();
        let mut removed = Vec::new();
        let touched: IndexSet<CellKey> = self.touched.iter().copied().collect();
        for key in touched {
            match self.cells.get(&key) {
                Some(cell) => written.push(cell.clone()),
                None => removed.push(key),
            }
        }
        ReplicaDelta {
            version: self.version,
            baseline: self.phase == ReplicaPhase::Live && self.version == self.loaded_at,
            written,
            removed,
        }
    }
}

fn decode_cell(
    key: CellKey,
    raw_key: &str,
    document: &Document,
) -> crate::dao::storage::StorageResult<Cell> {
    let content: CellContent = from_document(crate::dao::canvas::PIXELS, raw_key, document)?;
    Ok(Cell {
        key,
        colour: content.colour,
        uid: content.uid,
        placement_time: content.placement_time,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::dao::document_store::DocumentChange;

    fn object(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn baseline_batch_makes_replica_live() {
        let mut replica = Replica::new();
        assert_eq!(replica.phase(), ReplicaPhase::Loading);

        replica.apply(&ChangeBatch::default());

        assert!(replica.is_live());
        assert!(replica.is_empty());
        assert_eq!(replica.version(), 1);
    }

    #[test]
    fn changes_apply_in_batch_order() {
        let mut replica = Replica::new();
        let batch = ChangeBatch::new(vec![
            DocumentChange::added("0-0", object(json!({"colour": "white"}))),
            DocumentChange::added("1-1", object(json!({"colour": "#E50000"}))),
            DocumentChange::modified("0-0", object(json!({"colour": "#000000"}))),
            DocumentChange::removed("0-0"),
        ]);

        let applied = replica.apply(&batch);

        assert_eq!(applied, 4);
        assert_eq!(replica.len(), 1);
        assert_eq!(replica.get(CellKey::new(1, 1)).unwrap().colour, "#E50000");
        assert!(replica.get(CellKey::new(0, 0)).is_none());
        assert_eq!(replica.touched().len(), 4);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let mut replica = Replica::new();
        let batch = ChangeBatch::new(vec![
            DocumentChange::added("not-a-key", object(json!({"colour": "#000000"}))),
            DocumentChange::added("2-2", object(json!({"colour": 12}))),
            DocumentChange::added("3-3", object(json!({"colour": "#00D3DD", "placementTime": 10}))),
        ]);

        assert_eq!(replica.apply(&batch), 1);
        let cell = replica.get(CellKey::new(3, 3)).unwrap();
        assert_eq!(
            cell.placement_time,
            Some(SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(10))
        );
    }

    #[test]
    fn removing_an_unknown_cell_is_harmless() {
        let mut replica = Replica::new();
        replica.apply(&ChangeBatch::new(vec![DocumentChange::removed("9-9")]));
        assert!(replica.is_empty());
    }

    #[test]
    fn failure_clears_cells() {
        let mut replica = Replica::new();
        replica.apply(&ChangeBatch::new(vec![DocumentChange::added(
            "1-1",
            object(json!({"colour": "#E50000"})),
        )]));

        replica.fail();

        assert_eq!(replica.phase(), ReplicaPhase::Failed);
        assert!(replica.is_empty());
        assert_eq!(replica.version(), 2);
    }

    #[test]
    fn delta_lists_each_touched_key_once() {
        let mut replica = Replica::new();
        replica.apply(&ChangeBatch::new(vec![DocumentChange::added(
            "0-0",
            object(json!({"colour": "white"})),
        )]));
        assert!(replica.delta().baseline);

        replica.apply(&ChangeBatch::new(vec![
            DocumentChange::added("1-1", object(json!({"colour": "white"}))),
            DocumentChange::modified("1-1", object(json!({"colour": "#E50000"}))),
            DocumentChange::removed("0-0"),
        ]));

        let delta = replica.delta();
        assert!(!delta.baseline);
        assert_eq!(delta.version, 2);
        assert_eq!(delta.written.len(), 1);
        assert_eq!(delta.written[0].colour, "#E50000");
        assert_eq!(delta.removed, vec![CellKey::new(0, 0)]);
    }
}
