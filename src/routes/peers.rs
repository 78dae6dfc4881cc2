use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, put},
};
use axum_valid::Valid;

use crate::{
    dto::peers::{PeerPath, PeerSummary, RoleRequest},
    error::AppError,
    services::race_service,
    state::{SharedState, peer::PeerId},
};

/// Routes listing gates and assigning their roles.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/peers", get(list_peers))
        .route("/peers/{id}/role", put(assign_role))
}

/// List connected gates in connection order.
#[utoipa::path(
    get,
    path = "/peers",
    tag = "peers",
    responses((status = 200, description = "Connected gates", body = [PeerSummary]))
)]
pub async fn list_peers(State(state): State<SharedState>) -> Json<Vec<PeerSummary>> {
    Json(race_service::list_peers(&state).await)
}

/// Give a role to a gate. Any other holder of the role is cleared first.
#[utoipa::path(
    put,
    path = "/peers/{id}/role",
    tag = "peers",
    params(PeerPath),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role assigned; updated gate list", body = [PeerSummary]),
        (status = 400, description = "Malformed peer id"),
        (status = 404, description = "Unknown peer")
    )
)]
pub async fn assign_role(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<PeerPath>>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<Vec<PeerSummary>>, AppError> {
    let id = PeerId::from(path.id);
    Ok(Json(
        race_service::assign_role(&state, &id, request.role).await?,
    ))
}
