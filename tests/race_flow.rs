mod common;

use std::time::Duration;

use common::{assign, eventually, spawn_gate, spawn_host, wait_joined};
use lapgate::{
    error::ServiceError,
    services::{motion::MotionDetector, race_service},
    state::{gate::GateStatus, peer::Role, race::RaceStatus},
    transport::memory::MemoryNetwork,
};

#[tokio::test(start_paused = true)]
async fn timed_race_between_start_and_finish_gates() {
    let network = MemoryNetwork::new();
    let host = &spawn_host(&network).await;
    let mut sse = host.sse().subscribe();
    let start = spawn_gate(&network, "Start line").await;
    let finish = spawn_gate(&network, "Finish line").await;
    wait_joined(host, 2).await;

    assign(host, &start, Role::Start).await;
    assign(host, &finish, Role::Finish).await;

    let armed = race_service::arm_system(host).await.unwrap();
    assert_eq!(armed.notified, 2);
    assert_eq!(armed.race.status, RaceStatus::Armed);
    for gate in [&start, &finish] {
        eventually("gates to arm", || async move {
            gate.controller.status().await == GateStatus::Armed
        })
        .await;
    }

    assert!(start.detector.observe(1.0).is_some());
    eventually("race to start", || async move {
        host.race().lock().await.status() == RaceStatus::Running
    })
    .await;

    tokio::time::sleep(Duration::from_millis(4_821)).await;
    assert!(finish.detector.observe(1.0).is_some());
    eventually("race to finish", || async move {
        host.race().lock().await.status() == RaceStatus::Finished
    })
    .await;

    let snapshot = host.race().lock().await.snapshot();
    assert!(
        (4_821..=4_830).contains(&snapshot.elapsed_ms),
        "elapsed {} out of range",
        snapshot.elapsed_ms
    );
    let result = host.last_result().read().await.clone().unwrap();
    assert_eq!(result.elapsed_ms, snapshot.elapsed_ms);
    assert_eq!(result.race_id, snapshot.race_id);
    assert!(!host.is_sampling().await);

    for gate in [&start, &finish] {
        eventually("gates back in the lobby", || async move {
            gate.controller.status().await == GateStatus::Lobby
        })
        .await;
    }

    let mut names = Vec::new();
    while let Ok(event) = sse.try_recv() {
        names.extend(event.event);
    }
    assert!(names.iter().any(|name| name == "peer.joined"));
    assert!(names.iter().any(|name| name == "peer.role"));
    assert!(names.iter().any(|name| name == "race.result"));
}

#[tokio::test(start_paused = true)]
async fn trigger_for_another_race_is_ignored() {
    let network = MemoryNetwork::new();
    let host = &spawn_host(&network).await;
    let start = spawn_gate(&network, "Start line").await;
    wait_joined(host, 1).await;
    assign(host, &start, Role::Start).await;
    race_service::arm_system(host).await.unwrap();

    start
        .session
        .send_trigger(Role::Start, 10, Some("stale-race".into()))
        .await
        .unwrap();
    eventually("trigger to reach host", || async move {
        host.session().triggers().await.len() == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(host.race().lock().await.status(), RaceStatus::Armed);
    assert!(!host.is_sampling().await);
}

#[tokio::test(start_paused = true)]
async fn arming_needs_a_start_gate() {
    let network = MemoryNetwork::new();
    let host = &spawn_host(&network).await;
    let gate = spawn_gate(&network, "Only gate").await;
    wait_joined(host, 1).await;
    assign(host, &gate, Role::Finish).await;

    let err = race_service::arm_system(host).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gate.controller.status().await, GateStatus::Lobby);
    assert_eq!(host.race().lock().await.status(), RaceStatus::Idle);

    assign(host, &gate, Role::Start).await;
    let armed = race_service::arm_system(host).await.unwrap();
    assert_eq!(armed.notified, 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_reset_settles_in_idle() {
    let network = MemoryNetwork::new();
    let host = &spawn_host(&network).await;
    let start = spawn_gate(&network, "Start line").await;
    let finish = spawn_gate(&network, "Finish line").await;
    wait_joined(host, 2).await;
    assign(host, &start, Role::Start).await;
    assign(host, &finish, Role::Finish).await;

    race_service::arm_system(host).await.unwrap();
    assert!(start.detector.observe(1.0).is_some());
    eventually("race to start", || async move {
        host.race().lock().await.status() == RaceStatus::Running
    })
    .await;

    let first = race_service::reset(host).await.unwrap();
    let second = race_service::reset(host).await.unwrap();
    assert_eq!(first.race.status, RaceStatus::Idle);
    assert_eq!(second.race.status, RaceStatus::Idle);
    assert_eq!(second.notified, 2);
    assert!(!host.is_sampling().await);
    assert!(host.session().triggers().await.is_empty());

    for gate in [&start, &finish] {
        eventually("gates reset", || async move {
            gate.controller.status().await == GateStatus::Lobby && !gate.detector.is_armed()
        })
        .await;
    }
}
