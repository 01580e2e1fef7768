/// Board, status and placement operations behind the HTTP routes.
pub mod canvas_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// History mirroring of live-cell writes.
pub mod history_mirror;
/// Anonymous per-device identity.
pub mod identity;
/// Atomic placement transaction.
pub mod placement_service;
/// Replica reconciliation task.
pub mod reconciler;
/// Startup seeding of default cells.
pub mod seed_service;
/// Per-client session wiring the replica, gate and status together.
pub mod session;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Status projection task.
pub mod status_service;
/// User cooldown record subscription.
pub mod user_records;
