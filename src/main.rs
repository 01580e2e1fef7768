//! Pixel canvas binary entrypoint wiring the document store, the local session and the
//! HTTP/SSE surface a renderer talks to.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixel_canvas::{
    config::AppConfig,
    dao::{
        canvas::CanvasRepository,
        document_store::{DocumentStore, memory::InMemoryDocumentStore},
    },
    routes,
    services::{
        history_mirror,
        identity::{AnonymousIdentity, Identity, IdentityProvider},
        seed_service,
        session::ClientSession,
        sse_events,
    },
    state::{AppState, SharedState, cooldown::SystemClock},
};

/// Environment variable pinning the device identity across restarts.
const DEVICE_ID_ENV: &str = "PIXEL_CANVAS_DEVICE_ID";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = connect_store().await?;
    let repository = CanvasRepository::new(store.clone());

    seed_service::seed_default_cells(
        &repository,
        config.board(),
        config.seed_size(),
        config.default_colour(),
    )
    .await
    .context("seeding default cells")?;

    let mirror = config
        .mirror_history()
        .then(|| history_mirror::spawn(repository.clone()));

    let identity: Arc<dyn IdentityProvider> = Arc::new(match env::var(DEVICE_ID_ENV) {
        Ok(id) if !id.is_empty() => AnonymousIdentity::with_identity(Identity::new(id)),
        _ => AnonymousIdentity::new(),
    });
    let session = ClientSession::start(&config, store.clone(), identity, Arc::new(SystemClock)).await;

    let app_state = AppState::new(config, store, session);
    let forwarders = sse_events::spawn_forwarders(app_state.clone());
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    forwarders.abort();
    if let Some(mirror) = mirror {
        mirror.abort();
    }
    Ok(())
}

/// Use MongoDB when `MONGO_URI` is set, the in-memory store otherwise.
async fn connect_store() -> anyhow::Result<Arc<dyn DocumentStore>> {
    if let Some(store) = connect_mongo().await? {
        return Ok(store);
    }
    info!("MONGO_URI not set; using the in-memory document store");
    Ok(Arc::new(InMemoryDocumentStore::new()))
}

#[cfg(feature = "mongo-store")]
async fn connect_mongo() -> anyhow::Result<Option<Arc<dyn DocumentStore>>> {
    use pixel_canvas::dao::document_store::mongodb::{MongoConfig, MongoDocumentStore};

    if env::var_os("MONGO_URI").is_none() {
        return Ok(None);
    }
    let config = MongoConfig::from_env()
        .await
        .context("reading MongoDB settings")?;
    let store = MongoDocumentStore::connect(config)
        .await
        .context("connecting to MongoDB")?;
    Ok(Some(Arc::new(store)))
}

#[cfg(not(feature = "mongo-store"))]
async fn connect_mongo() -> anyhow::Result<Option<Arc<dyn DocumentStore>>> {
    if env::var_os("MONGO_URI").is_some() {
        warn!("MONGO_URI is set but this build has no MongoDB support");
    }
    Ok(None)
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
