use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the pixel canvas.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::stream,
        crate::routes::board::board,
        crate::routes::board::cell,
        crate::routes::board::status,
        crate::routes::placement::current_colour,
        crate::routes::placement::select_colour,
        crate::routes::placement::place,
        crate::routes::placement::interact,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthState,
            crate::dto::health::BoardPhase,
            crate::dto::board::BoardSnapshot,
            crate::dto::board::CellDto,
            crate::dto::board::CellsChangedEvent,
            crate::dto::board::BoardVersionEvent,
            crate::dto::status::StatusResponse,
            crate::dto::status::StatusKind,
            crate::dto::status::TimeLeftDto,
            crate::dto::placement::PlaceRequest,
            crate::dto::placement::InteractRequest,
            crate::dto::placement::SelectColourRequest,
            crate::dto::placement::ColourSelection,
            crate::dto::placement::PlacementResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::ShakeEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events stream"),
        (name = "board", description = "Replica and status views"),
        (name = "placement", description = "Colour selection and pixel placement"),
    )
)]
pub struct ApiDoc;
