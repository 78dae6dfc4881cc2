//! Host-side race orchestration: operator commands, gate triggers and the elapsed sampler.
//!
//! Every transition happens while holding the race lock, and the matching broadcast goes out
//! before the lock is released, so gates observe state changes in transition order.

use std::time::SystemTime;

use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        format_system_time,
        peers::PeerSummary,
        race::{RaceActionResponse, RaceOverview, RaceView},
        sse::RaceResultEvent,
        ws::{GateCommand, SessionMessage},
    },
    error::ServiceError,
    services::{session::SessionEvent, sse_events},
    state::{
        SharedState,
        peer::{PeerId, Role},
        race::{MotionTrigger, RaceEvent, RaceStateMachine, format_elapsed},
    },
};

fn view_of(state: &SharedState, race: &RaceStateMachine) -> RaceView {
    RaceView::from_snapshot(&race.snapshot(), race.elapsed_at(state.clock().now_ms()))
}

/// Current race view with a live elapsed reading.
pub async fn race_view(state: &SharedState) -> RaceView {
    let race = state.race().lock().await;
    view_of(state, &race)
}

/// Everything `GET /race` reports.
pub async fn race_overview(state: &SharedState) -> RaceOverview {
    RaceOverview {
        race: race_view(state).await,
        connection: state.session().status(),
        host_id: state.session().identity().await,
        recent_triggers: state.session().triggers().await,
    }
}

/// Arm every gate for a new race.
///
/// Requires a gate holding START and a race that is idle or finished; otherwise nothing
/// changes and [`ServiceError::InvalidState`] is returned.
pub async fn arm_system(state: &SharedState) -> Result<RaceActionResponse, ServiceError> {
    let mut race = state.race().lock().await;
    if !state.session().can_start().await {
        return Err(ServiceError::InvalidState(
            "cannot arm: no gate holds the START role".into(),
        ));
    }

    let race_id = Uuid::new_v4();
    let mut next = race.clone();
    next.apply(RaceEvent::Arm { race_id })?;
    let notified = state
        .session()
        .broadcast_state(GateCommand::Armed, Some(race_id.to_string()))
        .await?;
    *race = next;

    stop_sampler(state).await;
    state.elapsed_sender().send_replace(0);
    state.last_result().write().await.take();
    info!(%race_id, notified, "race armed");

    let view = view_of(state, &race);
    sse_events::broadcast_race_status(state, view.clone());
    Ok(RaceActionResponse {
        race: view,
        notified,
    })
}

/// Abort an armed or running race and send every gate back to the lobby.
pub async fn cancel_race(state: &SharedState) -> Result<RaceActionResponse, ServiceError> {
    let mut race = state.race().lock().await;
    race.apply(RaceEvent::Cancel)?;
    stop_sampler(state).await;
    state.elapsed_sender().send_replace(0);
    let notified = broadcast_lobby(state).await;
    info!(notified, "race cancelled");

    let view = view_of(state, &race);
    sse_events::broadcast_race_status(state, view.clone());
    Ok(RaceActionResponse {
        race: view,
        notified,
    })
}

/// Return to idle from any state, broadcasting RESET. Repeating it changes nothing further.
pub async fn reset(state: &SharedState) -> Result<RaceActionResponse, ServiceError> {
    let mut race = state.race().lock().await;
    race.apply(RaceEvent::Reset)?;
    stop_sampler(state).await;
    state.elapsed_sender().send_replace(0);
    state.last_result().write().await.take();
    let notified = state.session().broadcast_reset().await.unwrap_or_else(|err| {
        warn!(error = %err, "failed to broadcast reset");
        0
    });
    info!(notified, "race reset");

    let view = view_of(state, &race);
    sse_events::broadcast_race_status(state, view.clone());
    Ok(RaceActionResponse {
        race: view,
        notified,
    })
}

/// Feed a gate trigger into the race, timestamped with the host clock on receipt.
///
/// The sender must hold the claimed role in the registry. Out-of-sequence triggers and
/// triggers for another race are ignored as well. Returns whether the trigger moved the race.
pub async fn handle_trigger(state: &SharedState, from: &PeerId, trigger: MotionTrigger) -> bool {
    let registered = state.session().role_of(from).await;
    if registered != Some(trigger.role) {
        warn!(
            peer = %from,
            claimed = ?trigger.role,
            registered = ?registered,
            "ignoring trigger from a gate not holding that role"
        );
        return false;
    }
    apply_trigger(state, from, trigger).await
}

async fn apply_trigger(state: &SharedState, from: &PeerId, trigger: MotionTrigger) -> bool {
    let now = state.clock().now_ms();
    let mut race = state.race().lock().await;
    let Some(event) = race.event_for(&trigger, now) else {
        debug!(
            peer = %from,
            role = ?trigger.role,
            status = ?race.status(),
            "ignoring trigger out of sequence"
        );
        return false;
    };

    if let Err(err) = race.apply(event.clone()) {
        warn!(peer = %from, error = %err, "trigger rejected by race state machine");
        return false;
    }

    match event {
        RaceEvent::StartTriggered { at } => {
            info!(peer = %from, gate_timestamp = trigger.timestamp, at, "race started");
            start_sampler(state, at).await;
        }
        RaceEvent::FinishTriggered { .. } => {
            stop_sampler(state).await;
            let snapshot = race.snapshot();
            state.elapsed_sender().send_replace(snapshot.elapsed_ms);
            info!(
                peer = %from,
                elapsed_ms = snapshot.elapsed_ms,
                elapsed = %format_elapsed(snapshot.elapsed_ms),
                "race finished"
            );
            broadcast_lobby(state).await;

            let result = RaceResultEvent {
                race_id: snapshot.race_id,
                elapsed_ms: snapshot.elapsed_ms,
                elapsed: format_elapsed(snapshot.elapsed_ms),
                finished_at: format_system_time(SystemTime::now()),
            };
            sse_events::broadcast_race_result(state, &result);
            state.last_result().write().await.replace(result);
        }
        _ => {}
    }

    sse_events::broadcast_race_status(state, view_of(state, &race));
    true
}

async fn broadcast_lobby(state: &SharedState) -> usize {
    state
        .session()
        .broadcast_state(GateCommand::Lobby, None)
        .await
        .unwrap_or_else(|err| {
            warn!(error = %err, "failed to send gates back to the lobby");
            0
        })
}

/// Spawn the sampler publishing the live elapsed time, replacing any previous one.
async fn start_sampler(state: &SharedState, start: u64) {
    let elapsed = state.elapsed_sender();
    let clock = state.clock().clone();
    let period = state.config().sampler_interval();
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            elapsed.send_replace(clock.now_ms().saturating_sub(start));
        }
    });
    if let Some(previous) = state.sampler().lock().await.replace(task) {
        previous.abort();
    }
}

async fn stop_sampler(state: &SharedState) {
    if let Some(task) = state.sampler().lock().await.take() {
        task.abort();
    }
}

/// Connected gates in connection order.
pub async fn list_peers(state: &SharedState) -> Vec<PeerSummary> {
    state
        .session()
        .peers()
        .await
        .into_iter()
        .map(PeerSummary::from)
        .collect()
}

/// Assign `role` to a gate and announce it on the SSE stream.
pub async fn assign_role(
    state: &SharedState,
    id: &PeerId,
    role: Role,
) -> Result<Vec<PeerSummary>, ServiceError> {
    state.session().assign_role(id, role).await?;
    sse_events::broadcast_peer_role(state, id.clone(), role);
    Ok(list_peers(state).await)
}

/// Consume session events on the host until the engine goes away.
pub async fn run_host_events(state: SharedState, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    let mut status = state.session().subscribe_status();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_session_event(&state, event).await;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                sse_events::broadcast_session_status(&state, current);
            }
        }
    }
    info!("host event loop stopped");
}

async fn handle_session_event(state: &SharedState, event: SessionEvent) {
    match event {
        SessionEvent::PeerConnected { id } => {
            if let Some(peer) = list_peers(state).await.into_iter().find(|peer| peer.id == id) {
                sse_events::broadcast_peer_connected(state, peer);
            }
        }
        SessionEvent::PeerJoined { id, name } => {
            sse_events::broadcast_peer_joined(state, id, name);
        }
        SessionEvent::PeerLeft { id } => {
            sse_events::broadcast_peer_left(state, id);
        }
        SessionEvent::Message {
            from,
            message: SessionMessage::Trigger(payload),
        } => {
            handle_trigger(state, &from, MotionTrigger::from(&payload)).await;
        }
        SessionEvent::Message { from, message } => {
            debug!(peer = %from, kind = message.message_type(), "host ignores message");
        }
        SessionEvent::HostConnected { .. } | SessionEvent::HostLost { .. } => {}
    }
}
