use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the lapgate host.
#[openapi(
    paths(
        crate::routes::health::session_health,
        crate::routes::sse::race_stream,
        crate::routes::race::get_race,
        crate::routes::race::arm_race,
        crate::routes::race::cancel_race,
        crate::routes::race::reset_race,
        crate::routes::peers::list_peers,
        crate::routes::peers::assign_role,
        crate::routes::peer_link::peer_link,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::race::RaceView,
            crate::dto::race::RaceOverview,
            crate::dto::race::RaceActionResponse,
            crate::dto::peers::PeerSummary,
            crate::dto::peers::RoleRequest,
            crate::dto::sse::Handshake,
            crate::dto::sse::RaceStatusEvent,
            crate::dto::sse::RaceResultEvent,
            crate::dto::sse::PeerConnectedEvent,
            crate::dto::sse::PeerJoinedEvent,
            crate::dto::sse::PeerLeftEvent,
            crate::dto::sse::PeerRoleEvent,
            crate::dto::sse::ConnectionEvent,
            crate::dto::ws::GateCommand,
            crate::state::race::MotionTrigger,
            crate::services::session::ConnectionStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "race", description = "Race control"),
        (name = "peers", description = "Gate registry, role assignment and peer links"),
        (name = "sse", description = "Server-sent events stream"),
    )
)]
pub struct ApiDoc;
