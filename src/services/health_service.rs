use tracing::warn;

use crate::{dto::health::HealthResponse, services::session::ConnectionStatus, state::SharedState};

/// Summarise session health, logging when the host is not reachable by gates.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let connection = state.session().status();
    if connection != ConnectionStatus::Online {
        warn!(?connection, "session not online (degraded mode)");
    }
    let host_id = state.session().identity().await;
    let peers = state.session().peers().await.len();
    HealthResponse::new(connection, host_id, peers)
}
