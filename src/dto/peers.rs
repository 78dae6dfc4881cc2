use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dto::{format_system_time, validation::validate_peer_id},
    state::peer::{PeerId, PeerInfo, Role},
};

/// Connected gate as listed by `GET /peers`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    /// Gate identity.
    pub id: PeerId,
    /// Role currently held.
    pub role: Role,
    /// Announced or placeholder name.
    pub display_name: String,
    /// Whether JOIN has been received.
    pub joined: bool,
    /// RFC 3339 timestamp of the link opening.
    pub connected_at: String,
}

impl From<PeerInfo> for PeerSummary {
    fn from(info: PeerInfo) -> Self {
        Self {
            id: info.id,
            role: info.role,
            display_name: info.display_name,
            joined: info.joined,
            connected_at: format_system_time(info.connected_at),
        }
    }
}

/// Path parameters addressing a gate.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Path)]
pub struct PeerPath {
    /// Gate identity.
    #[validate(custom(function = "validate_peer_id"))]
    pub id: String,
}

/// Body of `PUT /peers/{id}/role`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RoleRequest {
    /// Role to give the gate.
    pub role: Role,
}

/// Query string of the `/peer` WebSocket upgrade.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PeerLinkQuery {
    /// Identity of the dialling gate.
    #[validate(custom(function = "validate_peer_id"))]
    pub from: String,
    /// Identity the gate is trying to reach.
    #[validate(custom(function = "validate_peer_id"))]
    pub to: String,
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn summary_uses_rfc3339_and_camel_case() {
        let info = PeerInfo {
            id: PeerId::from("ab12"),
            role: Role::Finish,
            display_name: "Finish line".into(),
            joined: true,
            connected_at: UNIX_EPOCH + Duration::from_secs(60),
        };
        let json = serde_json::to_value(PeerSummary::from(info)).unwrap();
        assert_eq!(json["displayName"], "Finish line");
        assert_eq!(json["role"], "FINISH");
        assert_eq!(json["connectedAt"], "1970-01-01T00:01:00Z");
    }

    #[test]
    fn link_query_rejects_bad_ids() {
        let ok = PeerLinkQuery {
            from: "3f2a9c".into(),
            to: "4821".into(),
        };
        assert!(ok.validate().is_ok());
        let bad = PeerLinkQuery {
            from: "../etc".into(),
            to: "4821".into(),
        };
        assert!(bad.validate().is_err());
    }
}
