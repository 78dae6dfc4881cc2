use serde::Serialize;
use utoipa::ToSchema;

use crate::{dto::ws::GateCommand, state::peer::Role, state::race::MotionTrigger};

/// Phases of a gate device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    /// Waiting for the host to arm.
    #[default]
    Lobby,
    /// Detector armed; the next motion fires a trigger.
    Armed,
    /// Trigger sent; nothing fires until the host arms again.
    Triggered,
}

/// Inputs to the gate state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// Host assigned a role.
    RoleAssigned(Role),
    /// Host broadcast an arm/lobby command.
    StateChanged {
        /// Requested mode.
        state: GateCommand,
        /// Race correlation id sent with the command.
        race_id: Option<String>,
    },
    /// Host broadcast RESET.
    Reset,
    /// Local detector fired at gate time `at`.
    MotionDetected {
        /// Gate clock in milliseconds.
        at: u64,
    },
    /// The detector could not be armed.
    ArmFailed,
}

/// Side effects requested by the state machine, executed by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    /// Enable the motion detector.
    ArmDetector,
    /// Disable the motion detector.
    DisarmDetector,
    /// Send a TRIGGER upstream.
    SendTrigger(MotionTrigger),
    /// Vibrate where supported.
    Pulse,
}

/// Gate-side state machine: `Lobby → Armed → Triggered`, back to `Lobby` on reset or lobby.
#[derive(Debug, Clone, Default)]
pub struct GateStateMachine {
    status: GateStatus,
    role: Role,
    race_id: Option<String>,
}

impl GateStateMachine {
    /// Start in the lobby without a role.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status.
    pub fn status(&self) -> GateStatus {
        self.status
    }

    /// Role assigned by the host.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Race the gate is armed for, if the host sent one.
    pub fn race_id(&self) -> Option<&str> {
        self.race_id.as_deref()
    }

    /// Feed an event and collect the side effects to perform, in order.
    pub fn handle(&mut self, event: GateEvent) -> Vec<GateAction> {
        match event {
            GateEvent::RoleAssigned(role) => {
                self.role = role;
                Vec::new()
            }
            GateEvent::StateChanged {
                state: GateCommand::Armed,
                race_id,
            } => {
                self.status = GateStatus::Armed;
                self.race_id = race_id;
                vec![GateAction::ArmDetector]
            }
            GateEvent::StateChanged {
                state: GateCommand::Lobby,
                ..
            }
            | GateEvent::Reset => {
                self.status = GateStatus::Lobby;
                vec![GateAction::DisarmDetector]
            }
            GateEvent::MotionDetected { at } => {
                if self.status != GateStatus::Armed {
                    return Vec::new();
                }
                self.status = GateStatus::Triggered;
                vec![
                    GateAction::SendTrigger(MotionTrigger {
                        role: self.role,
                        timestamp: at,
                        race_id: self.race_id.clone(),
                    }),
                    GateAction::Pulse,
                ]
            }
            GateEvent::ArmFailed => {
                self.status = GateStatus::Lobby;
                Vec::new()
            }
        }
    }
}
