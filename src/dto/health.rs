use serde::Serialize;
use utoipa::ToSchema;

use crate::{services::session::ConnectionStatus, state::peer::PeerId};

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Session connection status behind the verdict.
    pub connection: ConnectionStatus,
    /// Host identity, once registered.
    pub host_id: Option<PeerId>,
    /// Number of connected gates.
    pub peers: usize,
}

impl HealthResponse {
    /// Build the response; anything but an online session is degraded.
    pub fn new(connection: ConnectionStatus, host_id: Option<PeerId>, peers: usize) -> Self {
        let status = if connection == ConnectionStatus::Online {
            "ok"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            connection,
            host_id,
            peers,
        }
    }
}
