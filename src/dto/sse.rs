use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{peers::PeerSummary, race::RaceView},
    services::session::ConnectionStatus,
    state::peer::{PeerId, Role},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name.
    pub event: Option<String>,
    /// Serialized JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Host identity gates should dial.
    pub host_id: Option<PeerId>,
    /// Session connection status at subscription time.
    pub connection: ConnectionStatus,
    /// Race state at subscription time.
    pub race: RaceView,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast whenever the race state machine moves.
pub struct RaceStatusEvent(pub RaceView);

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast once a race finishes.
pub struct RaceResultEvent {
    /// Race the result belongs to.
    pub race_id: Option<Uuid>,
    /// Exact duration in milliseconds.
    pub elapsed_ms: u64,
    /// Duration rendered as `seconds.centiseconds`.
    pub elapsed: String,
    /// When the host recorded the finish (RFC 3339).
    pub finished_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Event emitted when a gate link opens.
pub struct PeerConnectedEvent {
    /// The gate as listed by `GET /peers`.
    pub peer: PeerSummary,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Event emitted when a gate completes its handshake.
pub struct PeerJoinedEvent {
    /// Gate identity.
    pub id: PeerId,
    /// Name announced in JOIN.
    pub display_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Event emitted when a gate link closes.
pub struct PeerLeftEvent {
    /// Gate identity.
    pub id: PeerId,
}

#[derive(Debug, Serialize, ToSchema)]
/// Event emitted when the operator assigns a role.
pub struct PeerRoleEvent {
    /// Gate identity.
    pub id: PeerId,
    /// Role now held.
    pub role: Role,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the session connection status changes.
pub struct ConnectionEvent {
    /// New status.
    pub connection: ConnectionStatus,
}
