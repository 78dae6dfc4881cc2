use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_valid::Valid;
use tracing::info;

use crate::{
    dto::peers::PeerLinkQuery,
    state::{SharedState, peer::PeerId},
};

#[utoipa::path(
    get,
    path = "/peer",
    tag = "peers",
    params(PeerLinkQuery),
    responses(
        (status = 101, description = "Switching protocols to the peer link"),
        (status = 404, description = "`to` is not this host's identity")
    )
)]
/// Upgrade the HTTP connection into a gate link addressed to this host.
pub async fn peer_link(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<PeerLinkQuery>>,
    ws: WebSocketUpgrade,
) -> Response {
    let target = PeerId::from(query.to);
    let Some(listener) = state
        .listener()
        .filter(|listener| listener.accepts(&target))
        .cloned()
    else {
        return (StatusCode::NOT_FOUND, format!("peer `{target}` is not here")).into_response();
    };

    let from = PeerId::from(query.from);
    info!(peer = %from, "gate dialling in");
    ws.on_upgrade(move |socket| async move { listener.accept(from, socket).await })
}

/// Configure the peer link endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/peer", get(peer_link))
}
