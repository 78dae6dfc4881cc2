//! Gate-side controller tying the session link, the motion detector and the gate state machine.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::{
    dto::ws::{RoleAssignPayload, SessionMessage, StateChangePayload},
    services::{
        motion::{MotionDetected, MotionDetector},
        session::{SessionEngine, SessionEvent},
    },
    state::{
        clock::Clock,
        gate::{GateAction, GateEvent, GateStateMachine, GateStatus},
        peer::Role,
    },
};

/// Vibration output, where the device has one.
pub trait Haptics: Send + Sync {
    /// Pulse for `duration`.
    fn pulse(&self, duration: Duration);
}

/// Haptics stand-in that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn pulse(&self, duration: Duration) {
        info!(ms = duration.as_millis() as u64, "haptic pulse");
    }
}

/// What the gate currently shows to its operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GateView {
    /// Gate phase.
    pub status: GateStatus,
    /// Role assigned by the host.
    pub role: Role,
    /// Race the gate is armed for.
    pub race_id: Option<String>,
    /// Operator alert raised by the last failure, cleared on the next successful arm.
    pub alert: Option<String>,
    /// Detector activity score at the last update, for calibration.
    pub activity_score: f32,
}

/// Drives a gate from host messages and local motion.
pub struct GateController {
    session: Arc<SessionEngine>,
    detector: Arc<dyn MotionDetector>,
    haptics: Arc<dyn Haptics>,
    clock: Arc<dyn Clock>,
    pulse: Duration,
    machine: Mutex<GateStateMachine>,
    view: watch::Sender<GateView>,
}

impl GateController {
    /// Wire a controller; `pulse` is the haptic duration on trigger.
    pub fn new(
        session: Arc<SessionEngine>,
        detector: Arc<dyn MotionDetector>,
        haptics: Arc<dyn Haptics>,
        clock: Arc<dyn Clock>,
        pulse: Duration,
    ) -> Arc<Self> {
        let (view, _) = watch::channel(GateView::default());
        Arc::new(Self {
            session,
            detector,
            haptics,
            clock,
            pulse,
            machine: Mutex::new(GateStateMachine::new()),
            view,
        })
    }

    /// Current gate phase.
    pub async fn status(&self) -> GateStatus {
        self.machine.lock().await.status()
    }

    /// Subscribe to view updates.
    pub fn subscribe(&self) -> watch::Receiver<GateView> {
        self.view.subscribe()
    }

    /// Apply a message from the host.
    pub async fn handle_message(&self, message: SessionMessage) {
        let event = match message {
            SessionMessage::RoleAssign(RoleAssignPayload { role }) => {
                info!(?role, "role assigned by host");
                GateEvent::RoleAssigned(role)
            }
            SessionMessage::StateChange(StateChangePayload { state, race_id }) => {
                GateEvent::StateChanged { state, race_id }
            }
            SessionMessage::Reset => GateEvent::Reset,
            other => {
                warn!(kind = other.message_type(), "gate ignores unexpected message");
                return;
            }
        };
        self.dispatch(event).await;
    }

    /// Apply a local motion event, stamped with the gate clock.
    ///
    /// Events that fired under an earlier arm are dropped, so a firing still queued across a
    /// LOBBY/ARMED pair cannot trigger the new race.
    pub async fn handle_motion(&self, motion: MotionDetected) {
        let mut machine = self.machine.lock().await;
        let current = self.detector.arm_generation();
        if motion.generation != current {
            debug!(
                generation = motion.generation,
                current, "dropping motion from an earlier arm"
            );
            return;
        }
        let at = self.clock.now_ms();
        info!(score = motion.score, at, "motion observed");
        self.apply(&mut machine, GateEvent::MotionDetected { at }).await;
    }

    async fn dispatch(&self, event: GateEvent) {
        let mut machine = self.machine.lock().await;
        self.apply(&mut machine, event).await;
    }

    async fn apply(&self, machine: &mut GateStateMachine, event: GateEvent) {
        let mut actions = machine.handle(event);
        let mut alert = None;
        while !actions.is_empty() {
            let mut follow_up = Vec::new();
            for action in actions {
                if let Some(event) = self.perform(action, &mut alert).await {
                    follow_up.extend(machine.handle(event));
                }
            }
            actions = follow_up;
        }
        self.publish(machine, alert);
    }

    /// Run one side effect; a failed arm feeds back into the machine.
    async fn perform(&self, action: GateAction, alert: &mut Option<String>) -> Option<GateEvent> {
        match action {
            GateAction::ArmDetector => match self.detector.arm(true) {
                Ok(()) => {
                    info!("detector armed");
                    self.view.send_modify(|view| view.alert = None);
                    None
                }
                Err(err) => {
                    error!(error = %err, "failed to arm detector; staying in lobby");
                    *alert = Some(err.to_string());
                    Some(GateEvent::ArmFailed)
                }
            },
            GateAction::DisarmDetector => {
                if let Err(err) = self.detector.arm(false) {
                    warn!(error = %err, "failed to disarm detector");
                }
                None
            }
            GateAction::SendTrigger(trigger) => {
                if let Err(err) = self
                    .session
                    .send_trigger(trigger.role, trigger.timestamp, trigger.race_id.clone())
                    .await
                {
                    warn!(error = %err, role = ?trigger.role, "trigger could not be sent");
                    *alert = Some(err.to_string());
                } else {
                    info!(role = ?trigger.role, timestamp = trigger.timestamp, "trigger sent");
                }
                None
            }
            GateAction::Pulse => {
                self.haptics.pulse(self.pulse);
                None
            }
        }
    }

    fn publish(&self, machine: &GateStateMachine, alert: Option<String>) {
        self.view.send_modify(|view| {
            view.status = machine.status();
            view.role = machine.role();
            view.race_id = machine.race_id().map(str::to_string);
            view.activity_score = self.detector.activity_score();
            if alert.is_some() {
                view.alert = alert;
            }
        });
    }

    /// Consume session and motion events until both sources end.
    pub async fn run(
        self: Arc<Self>,
        mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
        mut motion: broadcast::Receiver<MotionDetected>,
    ) {
        let mut motion_open = true;
        loop {
            tokio::select! {
                event = session_events.recv() => match event {
                    Some(SessionEvent::Message { message, .. }) => self.handle_message(message).await,
                    Some(SessionEvent::HostConnected { id }) => info!(host = %id, "gate linked to host"),
                    Some(SessionEvent::HostLost { id }) => {
                        // The host registers a returning gate with no role.
                        warn!(host = %id, "host link lost; dropping role until reassigned");
                        self.dispatch(GateEvent::RoleAssigned(Role::None)).await;
                    }
                    Some(_) => {}
                    None => break,
                },
                detected = motion.recv(), if motion_open => match detected {
                    Ok(detected) => self.handle_motion(detected).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "motion events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => motion_open = false,
                },
            }
        }
        info!("gate controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        dto::ws::GateCommand,
        services::{
            motion::ScoreDetector,
            session::SessionOptions,
        },
        state::clock::MonotonicClock,
        transport::memory::MemoryNetwork,
    };

    #[derive(Default)]
    struct CountingHaptics(AtomicUsize);

    impl Haptics for CountingHaptics {
        fn pulse(&self, _duration: Duration) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(detector: Arc<ScoreDetector>, haptics: Arc<CountingHaptics>) -> Arc<GateController> {
        let (session, _rx) =
            SessionEngine::new(Arc::new(MemoryNetwork::new()), SessionOptions::default());
        GateController::new(
            session,
            detector,
            haptics,
            Arc::new(MonotonicClock::new()),
            Duration::from_millis(200),
        )
    }

    fn arm_message(race_id: &str) -> SessionMessage {
        SessionMessage::state_change(GateCommand::Armed, Some(race_id.into()))
    }

    #[tokio::test]
    async fn arm_then_motion_pulses_once() {
        let detector = Arc::new(ScoreDetector::default());
        let haptics = Arc::new(CountingHaptics::default());
        let gate = controller(detector.clone(), haptics.clone());

        gate.handle_message(SessionMessage::role_assign(Role::Start)).await;
        gate.handle_message(arm_message("r1")).await;
        assert!(detector.is_armed());
        assert_eq!(gate.status().await, GateStatus::Armed);

        let motion = detector.observe(1.0).unwrap();
        gate.handle_motion(motion).await;
        gate.handle_motion(motion).await;
        assert_eq!(gate.status().await, GateStatus::Triggered);
        assert_eq!(haptics.0.load(Ordering::SeqCst), 1);

        let view = gate.subscribe().borrow().clone();
        assert_eq!(view.role, Role::Start);
        assert_eq!(view.race_id.as_deref(), Some("r1"));
        assert_eq!(view.activity_score, 1.0);
        // Not linked to a host, so the send failure is surfaced.
        assert!(view.alert.is_some());
    }

    #[tokio::test]
    async fn camera_failure_keeps_gate_in_lobby() {
        let detector = Arc::new(ScoreDetector::default());
        detector.set_camera_available(false);
        let gate = controller(detector.clone(), Arc::new(CountingHaptics::default()));

        gate.handle_message(arm_message("r1")).await;
        assert_eq!(gate.status().await, GateStatus::Lobby);
        let view = gate.subscribe().borrow().clone();
        assert!(view.alert.unwrap().contains("camera"));

        detector.set_camera_available(true);
        gate.handle_message(arm_message("r2")).await;
        assert_eq!(gate.status().await, GateStatus::Armed);
        assert_eq!(gate.subscribe().borrow().alert, None);
    }

    #[tokio::test]
    async fn reset_disarms_detector() {
        let detector = Arc::new(ScoreDetector::default());
        let gate = controller(detector.clone(), Arc::new(CountingHaptics::default()));
        gate.handle_message(arm_message("r1")).await;
        gate.handle_message(SessionMessage::Reset).await;
        assert!(!detector.is_armed());
        assert_eq!(gate.status().await, GateStatus::Lobby);
    }

    #[tokio::test]
    async fn motion_from_an_earlier_arm_is_dropped() {
        let detector = Arc::new(ScoreDetector::default());
        let haptics = Arc::new(CountingHaptics::default());
        let gate = controller(detector.clone(), haptics.clone());
        gate.handle_message(SessionMessage::role_assign(Role::Start)).await;

        gate.handle_message(arm_message("r1")).await;
        let queued = detector.observe(1.0).unwrap();
        gate.handle_message(SessionMessage::state_change(GateCommand::Lobby, None))
            .await;
        gate.handle_message(arm_message("r2")).await;

        gate.handle_motion(queued).await;
        assert_eq!(gate.status().await, GateStatus::Armed);
        assert_eq!(haptics.0.load(Ordering::SeqCst), 0);

        let fresh = detector.observe(1.0).unwrap();
        gate.handle_motion(fresh).await;
        assert_eq!(gate.status().await, GateStatus::Triggered);
        assert_eq!(haptics.0.load(Ordering::SeqCst), 1);
    }
}
