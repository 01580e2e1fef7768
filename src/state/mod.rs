pub mod board;
pub mod cooldown;
pub mod gate;
pub mod replica;
mod sse;
pub mod status;

use std::sync::Arc;

use crate::{config::AppConfig, dao::document_store::DocumentStore, services::session::ClientSession};

pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

const SSE_CAPACITY: usize = 64;

/// Central application state: configuration, the store handle and the local session.
pub struct AppState {
    config: AppConfig,
    store: Arc<dyn DocumentStore>,
    session: ClientSession,
    sse: SseHub,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig, store: Arc<dyn DocumentStore>, session: ClientSession) -> SharedState {
        Arc::new(Self {
            config,
            store,
            session,
            sse: SseHub::new(SSE_CAPACITY),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        &self.sse
    }
}
