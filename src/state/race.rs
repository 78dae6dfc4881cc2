use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dto::ws::TriggerPayload, state::peer::Role};

/// High-level phases of a race as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceStatus {
    /// Nothing armed; gates sit in the lobby.
    Idle,
    /// Gates are armed and the start trigger is awaited.
    Armed,
    /// Start fired; the finish trigger is awaited.
    Running,
    /// Finish fired; the result stays on display until the next arm.
    Finished,
}

/// Events that can be applied to the race state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceEvent {
    /// Operator arms the gates for a new race.
    Arm {
        /// Correlation id minted for the race.
        race_id: Uuid,
    },
    /// The START gate fired; `at` is the host receipt time.
    StartTriggered {
        /// Host clock in milliseconds.
        at: u64,
    },
    /// The FINISH gate fired; `at` is the host receipt time.
    FinishTriggered {
        /// Host clock in milliseconds.
        at: u64,
    },
    /// Operator aborts an armed or running race.
    Cancel,
    /// Operator returns everything to idle, whatever the current phase.
    Reset,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The status the machine was in when the event was received.
    pub from: RaceStatus,
    /// The event that cannot be applied from this status.
    pub event: RaceEvent,
}

/// Timing signal produced by a gate, consumed once by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MotionTrigger {
    /// Role of the gate that fired.
    pub role: Role,
    /// Gate-local timestamp in milliseconds.
    pub timestamp: u64,
    /// Race the gate believed it was armed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub race_id: Option<String>,
}

impl From<&TriggerPayload> for MotionTrigger {
    fn from(value: &TriggerPayload) -> Self {
        Self {
            role: value.role,
            timestamp: value.timestamp,
            race_id: value.race_id.clone(),
        }
    }
}

/// Snapshot of the current race state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current status.
    pub status: RaceStatus,
    /// Race correlation id while armed, running or finished.
    pub race_id: Option<Uuid>,
    /// Host time at which the start trigger was received.
    pub start_timestamp: Option<u64>,
    /// Final duration once finished, zero otherwise.
    pub elapsed_ms: u64,
    /// Number of transitions applied so far.
    pub version: usize,
}

/// Host-side race state machine: `Idle → Armed → Running → Finished`, with cancel and reset
/// paths back to `Idle`.
#[derive(Debug, Clone)]
pub struct RaceStateMachine {
    status: RaceStatus,
    race_id: Option<Uuid>,
    start_timestamp: Option<u64>,
    elapsed_ms: u64,
    version: usize,
}

impl Default for RaceStateMachine {
    fn default() -> Self {
        Self {
            status: RaceStatus::Idle,
            race_id: None,
            start_timestamp: None,
            elapsed_ms: 0,
            version: 0,
        }
    }
}

impl RaceStateMachine {
    /// Create a new state machine initialised in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current status.
    pub fn status(&self) -> RaceStatus {
        self.status
    }

    /// Correlation id of the current race, if any.
    pub fn race_id(&self) -> Option<Uuid> {
        self.race_id
    }

    /// Create a snapshot of the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            race_id: self.race_id,
            start_timestamp: self.start_timestamp,
            elapsed_ms: self.elapsed_ms,
            version: self.version,
        }
    }

    /// Elapsed time as of `now`: live while running, frozen once finished.
    pub fn elapsed_at(&self, now: u64) -> u64 {
        match (self.status, self.start_timestamp) {
            (RaceStatus::Running, Some(start)) => now.saturating_sub(start),
            _ => self.elapsed_ms,
        }
    }

    /// Role whose trigger would advance the race from the current status.
    pub fn expected_role(&self) -> Option<Role> {
        match self.status {
            RaceStatus::Armed => Some(Role::Start),
            RaceStatus::Running => Some(Role::Finish),
            RaceStatus::Idle | RaceStatus::Finished => None,
        }
    }

    /// Translate a gate trigger received at host time `now` into an event, or `None` when the
    /// trigger is out of sequence or belongs to another race.
    pub fn event_for(&self, trigger: &MotionTrigger, now: u64) -> Option<RaceEvent> {
        if self.expected_role()? != trigger.role {
            return None;
        }
        if let (Some(current), Some(claimed)) = (self.race_id, trigger.race_id.as_deref()) {
            if current.to_string() != claimed {
                return None;
            }
        }
        match trigger.role {
            Role::Start => Some(RaceEvent::StartTriggered { at: now }),
            Role::Finish => Some(RaceEvent::FinishTriggered { at: now }),
            Role::None => None,
        }
    }

    /// Apply an event, returning the new status.
    pub fn apply(&mut self, event: RaceEvent) -> Result<RaceStatus, InvalidTransition> {
        match (self.status, &event) {
            (RaceStatus::Idle | RaceStatus::Finished, RaceEvent::Arm { race_id }) => {
                self.status = RaceStatus::Armed;
                self.race_id = Some(*race_id);
                self.start_timestamp = None;
                self.elapsed_ms = 0;
            }
            (RaceStatus::Armed, RaceEvent::StartTriggered { at }) => {
                self.status = RaceStatus::Running;
                self.start_timestamp = Some(*at);
            }
            (RaceStatus::Running, RaceEvent::FinishTriggered { at }) => {
                let start = self.start_timestamp.unwrap_or(*at);
                self.status = RaceStatus::Finished;
                self.elapsed_ms = at.saturating_sub(start);
            }
            (RaceStatus::Armed | RaceStatus::Running, RaceEvent::Cancel) | (_, RaceEvent::Reset) => {
                self.status = RaceStatus::Idle;
                self.race_id = None;
                self.start_timestamp = None;
                self.elapsed_ms = 0;
            }
            (from, _) => {
                return Err(InvalidTransition {
                    from,
                    event: event.clone(),
                });
            }
        }

        self.version += 1;
        Ok(self.status)
    }
}

/// Render milliseconds as `seconds.centiseconds`, e.g. `12.34`.
pub fn format_elapsed(ms: u64) -> String {
    format!("{}.{:02}", ms / 1000, (ms % 1000) / 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(role: Role) -> MotionTrigger {
        MotionTrigger {
            role,
            timestamp: 0,
            race_id: None,
        }
    }

    fn armed() -> (RaceStateMachine, Uuid) {
        let mut sm = RaceStateMachine::new();
        let race_id = Uuid::new_v4();
        sm.apply(RaceEvent::Arm { race_id }).unwrap();
        (sm, race_id)
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = RaceStateMachine::new();
        assert_eq!(sm.status(), RaceStatus::Idle);
        assert_eq!(sm.expected_role(), None);
    }

    #[test]
    fn full_happy_path_through_race() {
        let (mut sm, race_id) = armed();
        assert_eq!(sm.snapshot().race_id, Some(race_id));

        assert_eq!(
            sm.apply(RaceEvent::StartTriggered { at: 2_000 }),
            Ok(RaceStatus::Running)
        );
        assert_eq!(sm.elapsed_at(2_500), 500);
        assert_eq!(
            sm.apply(RaceEvent::FinishTriggered { at: 9_437 }),
            Ok(RaceStatus::Finished)
        );
        assert_eq!(sm.snapshot().elapsed_ms, 7_437);
        assert_eq!(sm.elapsed_at(20_000), 7_437);
        assert_eq!(sm.snapshot().version, 3);
    }

    #[test]
    fn elapsed_is_exact_integer_difference() {
        for (t0, t1) in [(0u64, 1u64), (1_000, 5_000), (123_456, 987_654)] {
            let (mut sm, _) = armed();
            sm.apply(RaceEvent::StartTriggered { at: t0 }).unwrap();
            sm.apply(RaceEvent::FinishTriggered { at: t1 }).unwrap();
            assert_eq!(sm.snapshot().elapsed_ms, t1 - t0);
        }
    }

    #[test]
    fn finish_before_start_is_ignored() {
        let (sm, _) = armed();
        assert_eq!(sm.event_for(&trigger(Role::Finish), 100), None);
        assert_eq!(sm.status(), RaceStatus::Armed);
        assert_eq!(sm.snapshot().start_timestamp, None);
    }

    #[test]
    fn duplicate_start_while_running_is_ignored() {
        let (mut sm, _) = armed();
        let event = sm.event_for(&trigger(Role::Start), 10).unwrap();
        sm.apply(event).unwrap();
        assert_eq!(sm.event_for(&trigger(Role::Start), 20), None);
        assert_eq!(sm.snapshot().start_timestamp, Some(10));
    }

    #[test]
    fn trigger_from_other_race_is_ignored() {
        let (sm, race_id) = armed();
        let stale = MotionTrigger {
            role: Role::Start,
            timestamp: 1,
            race_id: Some(Uuid::new_v4().to_string()),
        };
        assert_eq!(sm.event_for(&stale, 5), None);

        let current = MotionTrigger {
            race_id: Some(race_id.to_string()),
            ..stale
        };
        assert_eq!(
            sm.event_for(&current, 5),
            Some(RaceEvent::StartTriggered { at: 5 })
        );
    }

    #[test]
    fn triggers_without_role_never_advance() {
        let (sm, _) = armed();
        assert_eq!(sm.event_for(&trigger(Role::None), 5), None);
    }

    #[test]
    fn rearm_allowed_from_finished_only() {
        let (mut sm, _) = armed();
        let err = sm
            .apply(RaceEvent::Arm {
                race_id: Uuid::new_v4(),
            })
            .unwrap_err();
        assert_eq!(err.from, RaceStatus::Armed);

        sm.apply(RaceEvent::StartTriggered { at: 1 }).unwrap();
        sm.apply(RaceEvent::FinishTriggered { at: 2 }).unwrap();
        assert_eq!(
            sm.apply(RaceEvent::Arm {
                race_id: Uuid::new_v4()
            }),
            Ok(RaceStatus::Armed)
        );
        assert_eq!(sm.snapshot().elapsed_ms, 0);
    }

    #[test]
    fn cancel_only_from_armed_or_running() {
        let mut sm = RaceStateMachine::new();
        assert!(sm.apply(RaceEvent::Cancel).is_err());

        let (mut sm, _) = armed();
        sm.apply(RaceEvent::StartTriggered { at: 1 }).unwrap();
        assert_eq!(sm.apply(RaceEvent::Cancel), Ok(RaceStatus::Idle));
        assert_eq!(sm.snapshot().race_id, None);
    }

    #[test]
    fn reset_is_always_accepted() {
        let mut sm = RaceStateMachine::new();
        assert_eq!(sm.apply(RaceEvent::Reset), Ok(RaceStatus::Idle));
        assert_eq!(sm.apply(RaceEvent::Reset), Ok(RaceStatus::Idle));
    }

    #[test]
    fn formats_seconds_and_centiseconds() {
        assert_eq!(format_elapsed(0), "0.00");
        assert_eq!(format_elapsed(4_009), "4.00");
        assert_eq!(format_elapsed(12_345), "12.34");
        assert_eq!(format_elapsed(61_999), "61.99");
    }
}
