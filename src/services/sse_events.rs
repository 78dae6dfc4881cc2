use serde::Serialize;
use tracing::warn;

use crate::{
    dto::{
        peers::PeerSummary,
        race::RaceView,
        sse::{
            ConnectionEvent, PeerConnectedEvent, PeerJoinedEvent, PeerLeftEvent, PeerRoleEvent,
            RaceResultEvent, RaceStatusEvent, ServerEvent,
        },
    },
    services::session::ConnectionStatus,
    state::{
        SharedState,
        peer::{PeerId, Role},
    },
};

const EVENT_RACE_STATUS: &str = "race.status";
const EVENT_RACE_RESULT: &str = "race.result";
const EVENT_PEER_CONNECTED: &str = "peer.connected";
const EVENT_PEER_JOINED: &str = "peer.joined";
const EVENT_PEER_LEFT: &str = "peer.left";
const EVENT_PEER_ROLE: &str = "peer.role";
const EVENT_SESSION_STATUS: &str = "session.status";

/// Broadcast the race state after a transition.
pub fn broadcast_race_status(state: &SharedState, view: RaceView) {
    send_event(state, EVENT_RACE_STATUS, &RaceStatusEvent(view));
}

/// Broadcast the final time of a finished race.
pub fn broadcast_race_result(state: &SharedState, result: &RaceResultEvent) {
    send_event(state, EVENT_RACE_RESULT, result);
}

/// Broadcast that a gate link opened.
pub fn broadcast_peer_connected(state: &SharedState, peer: PeerSummary) {
    send_event(state, EVENT_PEER_CONNECTED, &PeerConnectedEvent { peer });
}

/// Broadcast that a gate completed its handshake.
pub fn broadcast_peer_joined(state: &SharedState, id: PeerId, display_name: String) {
    send_event(state, EVENT_PEER_JOINED, &PeerJoinedEvent { id, display_name });
}

/// Broadcast that a gate went away.
pub fn broadcast_peer_left(state: &SharedState, id: PeerId) {
    send_event(state, EVENT_PEER_LEFT, &PeerLeftEvent { id });
}

/// Broadcast a role assignment.
pub fn broadcast_peer_role(state: &SharedState, id: PeerId, role: Role) {
    send_event(state, EVENT_PEER_ROLE, &PeerRoleEvent { id, role });
}

/// Broadcast a session connection status change.
pub fn broadcast_session_status(state: &SharedState, connection: ConnectionStatus) {
    send_event(state, EVENT_SESSION_STATUS, &ConnectionEvent { connection });
}

fn send_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}
