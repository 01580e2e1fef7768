use serde::Serialize;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    dto::{
        board::{BoardVersionEvent, CellsChangedEvent},
        sse::{ServerEvent, ShakeEvent},
    },
    services::canvas_service,
    state::SharedState,
};

const EVENT_STATUS_CHANGED: &str = "status.changed";
const EVENT_CELLS_CHANGED: &str = "cells.changed";
const EVENT_SHAKE: &str = "shake";
const EVENT_BOARD_LOADED: &str = "board.loaded";
const EVENT_BOARD_RESYNC: &str = "board.resync";

/// Forward session changes (status, colour, cells, shake) to the public SSE stream.
pub fn spawn_forwarders(state: SharedState) -> JoinHandle<()> {
    let session = state.session();
    let mut status = session.status();
    let mut colour = session.subscribe_colour();
    let mut changes = session.subscribe_changes();
    let mut shake = session.shake();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() { break; }
                    broadcast_status(&state);
                }
                changed = colour.changed() => {
                    if changed.is_err() { break; }
                    broadcast_status(&state);
                }
                received = changes.recv() => match received {
                    Ok(delta) if delta.baseline => {
                        let payload = BoardVersionEvent { version: delta.version };
                        send_public_event(&state, EVENT_BOARD_LOADED, &payload);
                    }
                    Ok(delta) => {
                        send_public_event(&state, EVENT_CELLS_CHANGED, &CellsChangedEvent::from(&delta));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "cell changes dropped; asking renderers to refetch the board");
                        let version = state.session().replica().borrow().version();
                        send_public_event(&state, EVENT_BOARD_RESYNC, &BoardVersionEvent { version });
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = shake.changed() => {
                    if changed.is_err() { break; }
                    let shaking = *shake.borrow_and_update();
                    send_public_event(&state, EVENT_SHAKE, &ShakeEvent { shaking });
                }
            }
        }
        debug!("session closed; SSE forwarders stopped");
    })
}

/// Broadcast the current status line.
pub fn broadcast_status(state: &SharedState) {
    let payload = canvas_service::status(state);
    send_public_event(state, EVENT_STATUS_CHANGED, &payload);
}

fn send_public_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.public_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize public SSE payload"),
    }
}
