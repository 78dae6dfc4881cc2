//! Wire protocol exchanged between host and gates over the peer transport.

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use utoipa::ToSchema;

use crate::state::peer::Role;

/// Messages exchanged over a peer connection, encoded as `{type, payload?}` JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMessage {
    /// Gate → host handshake announcing the display name.
    Join(JoinPayload),
    /// Host → gate role assignment.
    RoleAssign(RoleAssignPayload),
    /// Host → gates arm/lobby command.
    StateChange(StateChangePayload),
    /// Gate → host timing trigger.
    Trigger(TriggerPayload),
    /// Host → gates unconditional return to lobby.
    Reset,
}

/// Payload of a JOIN message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPayload {
    /// Display name chosen on the gate.
    pub name: String,
}

/// Payload of a ROLE_ASSIGN message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignPayload {
    /// Role the gate now holds.
    pub role: Role,
}

/// Payload of a STATE_CHANGE message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangePayload {
    /// Requested gate mode.
    pub state: GateCommand,
    /// Race being armed; absent on LOBBY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race_id: Option<String>,
}

/// Payload of a TRIGGER message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    /// Role the gate believes it holds.
    pub role: Role,
    /// Gate-local clock in milliseconds; 0 when absent. Fractional values are truncated.
    #[serde(default, deserialize_with = "millis_from_number")]
    pub timestamp: u64,
    /// Race the gate was armed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race_id: Option<String>,
}

/// Accept any non-negative JSON number as whole milliseconds.
fn millis_from_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 {
        return Err(D::Error::custom(format!("invalid timestamp {value}")));
    }
    Ok(value.trunc() as u64)
}

/// Mode the host asks every gate to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateCommand {
    /// Arm the motion detector.
    Armed,
    /// Disarm and wait.
    Lobby,
}

impl SessionMessage {
    /// Build a JOIN message.
    pub fn join(name: impl Into<String>) -> Self {
        Self::Join(JoinPayload { name: name.into() })
    }

    /// Build a ROLE_ASSIGN message.
    pub fn role_assign(role: Role) -> Self {
        Self::RoleAssign(RoleAssignPayload { role })
    }

    /// Build a STATE_CHANGE message.
    pub fn state_change(state: GateCommand, race_id: Option<String>) -> Self {
        Self::StateChange(StateChangePayload { state, race_id })
    }

    /// Build a TRIGGER message.
    pub fn trigger(role: Role, timestamp: u64, race_id: Option<String>) -> Self {
        Self::Trigger(TriggerPayload {
            role,
            timestamp,
            race_id,
        })
    }

    /// Parse a message received as a text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encode the message as a text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Wire name of the message type, for logs.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Join(_) => "JOIN",
            Self::RoleAssign(_) => "ROLE_ASSIGN",
            Self::StateChange(_) => "STATE_CHANGE",
            Self::Trigger(_) => "TRIGGER",
            Self::Reset => "RESET",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn as_value(message: &SessionMessage) -> Value {
        serde_json::from_str(&message.to_json().unwrap()).unwrap()
    }

    #[test]
    fn join_matches_wire_shape() {
        assert_eq!(
            as_value(&SessionMessage::join("Start Gate")),
            json!({"type": "JOIN", "payload": {"name": "Start Gate"}})
        );
    }

    #[test]
    fn role_assign_and_state_change_shapes() {
        assert_eq!(
            as_value(&SessionMessage::role_assign(Role::Start)),
            json!({"type": "ROLE_ASSIGN", "payload": {"role": "START"}})
        );
        assert_eq!(
            as_value(&SessionMessage::state_change(GateCommand::Armed, None)),
            json!({"type": "STATE_CHANGE", "payload": {"state": "ARMED"}})
        );
        assert_eq!(
            as_value(&SessionMessage::state_change(
                GateCommand::Lobby,
                Some("r-1".into())
            )),
            json!({"type": "STATE_CHANGE", "payload": {"state": "LOBBY", "raceId": "r-1"}})
        );
    }

    #[test]
    fn reset_has_no_payload() {
        assert_eq!(as_value(&SessionMessage::Reset), json!({"type": "RESET"}));
        assert_eq!(
            SessionMessage::from_json_str(r#"{"type":"RESET"}"#).unwrap(),
            SessionMessage::Reset
        );
    }

    #[test]
    fn trigger_parses_from_gate_json() {
        let message =
            SessionMessage::from_json_str(r#"{"type":"TRIGGER","payload":{"role":"START","timestamp":1000}}"#)
                .unwrap();
        assert_eq!(message, SessionMessage::trigger(Role::Start, 1000, None));
        assert_eq!(message.message_type(), "TRIGGER");
    }

    #[test]
    fn fractional_trigger_timestamp_is_truncated() {
        let message = SessionMessage::from_json_str(
            r#"{"type":"TRIGGER","payload":{"role":"START","timestamp":1000.5,"raceId":"r1"}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            SessionMessage::trigger(Role::Start, 1000, Some("r1".into()))
        );
        assert!(
            SessionMessage::from_json_str(
                r#"{"type":"TRIGGER","payload":{"role":"START","timestamp":-3}}"#
            )
            .is_err()
        );
        let untimed =
            SessionMessage::from_json_str(r#"{"type":"TRIGGER","payload":{"role":"FINISH"}}"#)
                .unwrap();
        assert_eq!(untimed, SessionMessage::trigger(Role::Finish, 0, None));
    }

    #[test]
    fn unknown_type_and_bad_role_are_rejected() {
        assert!(SessionMessage::from_json_str(r#"{"type":"PING"}"#).is_err());
        assert!(
            SessionMessage::from_json_str(
                r#"{"type":"ROLE_ASSIGN","payload":{"role":"SPLIT"}}"#
            )
            .is_err()
        );
    }
}
