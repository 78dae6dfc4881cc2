use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    services::session::ConnectionStatus,
    state::{
        peer::PeerId,
        race::{MotionTrigger, RaceStatus, Snapshot, format_elapsed},
    },
};

/// Public view of the race state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceView {
    /// Current phase.
    pub status: RaceStatus,
    /// Correlation id of the current race.
    pub race_id: Option<Uuid>,
    /// Host time of the start trigger, in milliseconds.
    pub start_timestamp: Option<u64>,
    /// Live while running, final once finished.
    pub elapsed_ms: u64,
    /// `elapsed_ms` rendered as `seconds.centiseconds`.
    pub elapsed: String,
    /// Number of transitions applied so far.
    pub version: usize,
}

impl RaceView {
    /// Build the view from a snapshot, overriding the elapsed time with a live reading.
    pub fn from_snapshot(snapshot: &Snapshot, elapsed_ms: u64) -> Self {
        Self {
            status: snapshot.status,
            race_id: snapshot.race_id,
            start_timestamp: snapshot.start_timestamp,
            elapsed_ms,
            elapsed: format_elapsed(elapsed_ms),
            version: snapshot.version,
        }
    }
}

/// Response of `GET /race`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceOverview {
    /// Race state, flattened into the response.
    #[serde(flatten)]
    pub race: RaceView,
    /// Session connection status.
    pub connection: ConnectionStatus,
    /// Host identity gates should dial.
    pub host_id: Option<PeerId>,
    /// Triggers received most recently, oldest first.
    pub recent_triggers: Vec<MotionTrigger>,
}

/// Response returned by race control endpoints.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceActionResponse {
    /// Race state after the command.
    pub race: RaceView,
    /// Number of gates the resulting broadcast was queued for.
    pub notified: usize,
}
