pub mod clock;
pub mod gate;
pub mod peer;
pub mod race;
mod sse;

use std::sync::Arc;

use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
};

use crate::{
    config::AppConfig,
    dto::sse::RaceResultEvent,
    services::session::SessionEngine,
    state::{clock::Clock, race::RaceStateMachine},
    transport::websocket::WsListener,
};

pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

/// Capacity of the SSE broadcast channel.
const SSE_CAPACITY: usize = 64;

/// Host-side application state: the race machine, its sampler and the session engine.
pub struct AppState {
    config: Arc<AppConfig>,
    session: Arc<SessionEngine>,
    clock: Arc<dyn Clock>,
    race: Mutex<RaceStateMachine>,
    sampler: Mutex<Option<JoinHandle<()>>>,
    elapsed: Arc<watch::Sender<u64>>,
    last_result: RwLock<Option<RaceResultEvent>>,
    sse: SseHub,
    listener: Option<Arc<WsListener>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// `listener` is the WebSocket transport feeding the `/peer` route, when the session runs
    /// over WebSockets.
    pub fn new(
        config: Arc<AppConfig>,
        session: Arc<SessionEngine>,
        clock: Arc<dyn Clock>,
        listener: Option<Arc<WsListener>>,
    ) -> SharedState {
        let (elapsed, _rx) = watch::channel(0);
        Arc::new(Self {
            config,
            session,
            clock,
            race: Mutex::new(RaceStateMachine::new()),
            sampler: Mutex::new(None),
            elapsed: Arc::new(elapsed),
            last_result: RwLock::new(None),
            sse: SseHub::new(SSE_CAPACITY),
            listener,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Session engine running in host mode.
    pub fn session(&self) -> &Arc<SessionEngine> {
        &self.session
    }

    /// Host clock used to timestamp triggers on receipt.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Race state machine; holding the lock serialises every race transition.
    pub fn race(&self) -> &Mutex<RaceStateMachine> {
        &self.race
    }

    /// Slot of the elapsed sampler task while a race runs.
    pub(crate) fn sampler(&self) -> &Mutex<Option<JoinHandle<()>>> {
        &self.sampler
    }

    /// Writer side of the live elapsed counter.
    pub(crate) fn elapsed_sender(&self) -> Arc<watch::Sender<u64>> {
        self.elapsed.clone()
    }

    /// Subscribe to the live elapsed counter, in milliseconds.
    pub fn subscribe_elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed.subscribe()
    }

    /// Result of the last finished race, cleared on reset.
    pub fn last_result(&self) -> &RwLock<Option<RaceResultEvent>> {
        &self.last_result
    }

    /// Broadcast hub used for the SSE stream.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// WebSocket listener backing `/peer`, if any.
    pub fn listener(&self) -> Option<&Arc<WsListener>> {
        self.listener.as_ref()
    }

    /// Whether the elapsed sampler is currently running.
    pub async fn is_sampling(&self) -> bool {
        self.sampler
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}
