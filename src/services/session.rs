//! One client session: the replica, the user record, the gate and the status projection,
//! plus the actions a user can take on the board.

use std::sync::Arc;

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    dao::{canvas::CanvasRepository, document_store::DocumentStore},
    error::ServiceError,
    services::{
        identity::{Identity, IdentityProvider},
        placement_service::{self, Confirmed},
        reconciler, status_service, user_records,
    },
    state::{
        board::{Board, CellKey, Colour, Viewport},
        cooldown::Clock,
        gate::{PlacementGate, Rejection, UserRecord},
        replica::{ReplicaDelta, ReplicaView},
        status::Status,
    },
};

/// Applied batches buffered for slow delta consumers before they lag.
const DELTA_CAPACITY: usize = 256;

pub struct ClientSession {
    board: Board,
    repository: CanvasRepository,
    identity: Arc<dyn IdentityProvider>,
    gate: PlacementGate,
    clock: Arc<dyn Clock>,
    colour: watch::Sender<Colour>,
    replica: ReplicaView,
    deltas: broadcast::Sender<ReplicaDelta>,
    records: watch::Receiver<UserRecord>,
    status: watch::Receiver<Status>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientSession {
    /// Start the background tasks of a session and sign in anonymously.
    ///
    /// A failed sign-in leaves the session loading; it recovers when an identity appears.
    pub async fn start(
        config: &AppConfig,
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let repository = CanvasRepository::new(store);
        let gate = PlacementGate::new(config.cooldown(), config.shake_duration());

        let (deltas, _rx) = broadcast::channel(DELTA_CAPACITY);
        let (replica, reconciler_task) = reconciler::spawn(repository.clone(), deltas.clone());
        let (records, records_task) =
            user_records::spawn(repository.clone(), identity.watch(), gate.clone());
        let (status, status_task) =
            status_service::spawn(gate.clone(), records.clone(), clock.clone());
        let (colour, _rx) = watch::channel(config.initial_colour().clone());

        match identity.sign_in_anonymously().await {
            Ok(uid) => info!(uid = %uid, "session started"),
            Err(err) => warn!(error = %err, "anonymous sign-in failed; session stays loading"),
        }

        Self {
            board: config.board(),
            repository,
            identity,
            gate,
            clock,
            colour,
            replica,
            deltas,
            records,
            status,
            tasks: vec![reconciler_task, records_task, status_task],
        }
    }

    pub fn board(&self) -> Board {
        self.board
    }

    pub fn repository(&self) -> &CanvasRepository {
        &self.repository
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.current()
    }

    /// Read view of the replica.
    pub fn replica(&self) -> ReplicaView {
        self.replica.clone()
    }

    /// Every batch applied from now on, in order.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ReplicaDelta> {
        self.deltas.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    pub fn current_status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn user_record(&self) -> UserRecord {
        *self.records.borrow()
    }

    pub fn shake(&self) -> watch::Receiver<bool> {
        self.gate.shake().subscribe()
    }

    pub fn is_shaking(&self) -> bool {
        self.gate.shake().is_shaking()
    }

    pub fn gate(&self) -> &PlacementGate {
        &self.gate
    }

    pub fn colour(&self) -> Colour {
        self.colour.borrow().clone()
    }

    pub fn subscribe_colour(&self) -> watch::Receiver<Colour> {
        self.colour.subscribe()
    }

    /// Select the colour used by subsequent placements.
    pub fn select_colour(&self, colour: Colour) {
        debug!(colour = %colour, "colour selected");
        self.colour.send_replace(colour);
    }

    /// Try to place the selected colour at `(x, y)`.
    pub async fn place(&self, x: i64, y: i64) -> Result<Confirmed, ServiceError> {
        let key = self
            .board
            .cell(x, y)
            .ok_or(ServiceError::OutOfBounds { x, y })?;
        self.place_at(key).await
    }

    /// Map a pointer position through `viewport` and place there. Pointers off the board
    /// are ignored and yield `Ok(None)`.
    pub async fn interact(
        &self,
        client_x: f64,
        client_y: f64,
        viewport: &Viewport,
    ) -> Result<Option<Confirmed>, ServiceError> {
        match self.board.cell_at_pointer(client_x, client_y, viewport) {
            Some(key) => self.place_at(key).await.map(Some),
            None => {
                debug!(client_x, client_y, "pointer outside the board; ignored");
                Ok(None)
            }
        }
    }

    async fn place_at(&self, key: CellKey) -> Result<Confirmed, ServiceError> {
        let uid = self.identity.current().ok_or(ServiceError::Loading)?;
        let record = *self.records.borrow();
        let permit = self
            .gate
            .try_begin(record, self.clock.now())
            .map_err(|rejection| {
                if rejection != Rejection::Loading {
                    info!(key = %key, reason = %rejection, "placement rejected");
                }
                ServiceError::from(rejection)
            })?;
        placement_service::submit(&self.repository, permit, key, self.colour(), &uid).await
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
