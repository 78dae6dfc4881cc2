#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use lapgate::{
    config::AppConfig,
    services::{
        gate_service::{GateController, LogHaptics},
        motion::{MotionDetector, ScoreDetector},
        race_service,
        session::{SessionEngine, SessionOptions},
    },
    state::{
        AppState, SharedState,
        clock::MonotonicClock,
        peer::{PeerId, Role},
    },
    transport::memory::MemoryNetwork,
};

pub const HOST_ID: &str = "4821";

/// Poll `check` on the virtual clock until it holds, panicking after a minute of virtual time.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..12_000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Host registered as [`HOST_ID`] with its event loop running.
pub async fn spawn_host(network: &MemoryNetwork) -> SharedState {
    let (session, events) =
        SessionEngine::new(Arc::new(network.clone()), SessionOptions::default());
    session
        .init(true, Some(PeerId::from(HOST_ID)))
        .await
        .expect("host init");
    let state = AppState::new(
        Arc::new(AppConfig::default()),
        session,
        Arc::new(MonotonicClock::new()),
        None,
    );
    tokio::spawn(race_service::run_host_events(state.clone(), events));
    state
}

pub struct Gate {
    pub id: PeerId,
    pub session: Arc<SessionEngine>,
    pub detector: Arc<ScoreDetector>,
    pub controller: Arc<GateController>,
}

impl Gate {
    pub fn role(&self) -> Role {
        self.controller.subscribe().borrow().role
    }
}

/// Gate linked to [`HOST_ID`] with its controller running.
pub async fn spawn_gate(network: &MemoryNetwork, name: &str) -> Gate {
    let (session, events) =
        SessionEngine::new(Arc::new(network.clone()), SessionOptions::default());
    let id = session.init(false, None).await.expect("gate init");
    session
        .connect_to_host(PeerId::from(HOST_ID), name)
        .await
        .expect("connect to host");

    let detector = Arc::new(ScoreDetector::default());
    let controller = GateController::new(
        session.clone(),
        detector.clone(),
        Arc::new(LogHaptics),
        Arc::new(MonotonicClock::new()),
        Duration::from_millis(200),
    );
    tokio::spawn(controller.clone().run(events, detector.subscribe()));
    Gate {
        id,
        session,
        detector,
        controller,
    }
}

/// Wait until `count` gates completed their JOIN on the host.
pub async fn wait_joined(host: &SharedState, count: usize) {
    eventually("gates to join", || async move {
        let peers = host.session().peers().await;
        peers.iter().filter(|peer| peer.joined).count() == count
    })
    .await;
}

/// Assign `role` to `gate` and wait for the gate to learn it.
pub async fn assign(host: &SharedState, gate: &Gate, role: Role) {
    race_service::assign_role(host, &gate.id, role)
        .await
        .expect("assign role");
    eventually("role assignment", || async move { gate.role() == role }).await;
}
