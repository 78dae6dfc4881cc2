//! Peer session protocol engine.
//!
//! One engine runs per process. On the host it owns the star's registry of gates: it accepts
//! incoming links, tracks the JOIN handshake, hands out exclusive roles and broadcasts state
//! changes. On a gate it keeps a single supervised link to the host alive and forwards what the
//! host says. Everything the application needs to react to comes out of the
//! [`SessionEvent`] channel returned by [`SessionEngine::new`].

use std::{collections::VecDeque, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{Mutex, RwLock, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::ws::{GateCommand, JoinPayload, SessionMessage},
    error::SessionError,
    services::retry::RetryPolicy,
    state::{
        peer::{ConnectedPeer, PeerId, PeerInfo, PeerRegistry, Role},
        race::MotionTrigger,
    },
    transport::{
        Connection, ConnectionEvent, ConnectionHandle, Endpoint, EndpointEvent, Transport,
        TransportError,
    },
};

/// Default number of received triggers kept for inspection.
pub const DEFAULT_TRIGGER_CAPACITY: usize = 32;

/// Connection state published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, ToSchema)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No identity on the network.
    #[default]
    Offline,
    /// `init` is opening the endpoint.
    Initializing,
    /// Registered (host) or linked to the host (gate).
    Online,
    /// Lost the signalling link or the host; retrying.
    Reconnecting,
    /// The last attempt failed with the given reason.
    Error(String),
}

/// Which side of the star this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Coordinating device.
    Host,
    /// Gate device.
    Client,
}

impl SessionMode {
    fn as_str(self) -> &'static str {
        match self {
            SessionMode::Host => "host",
            SessionMode::Client => "client",
        }
    }
}

/// Notifications emitted by the engine, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A gate link opened; the peer is registered but has not joined yet.
    PeerConnected {
        /// Gate identity.
        id: PeerId,
    },
    /// A gate completed its JOIN handshake.
    PeerJoined {
        /// Gate identity.
        id: PeerId,
        /// Announced display name.
        name: String,
    },
    /// A gate link closed and the peer was dropped from the registry.
    PeerLeft {
        /// Gate identity.
        id: PeerId,
    },
    /// The gate's link to the host opened and JOIN went out.
    HostConnected {
        /// Host identity.
        id: PeerId,
    },
    /// The gate's link to the host went away; a retry is scheduled.
    HostLost {
        /// Host identity.
        id: PeerId,
    },
    /// A protocol message arrived from `from`.
    Message {
        /// Sender identity.
        from: PeerId,
        /// Decoded message.
        message: SessionMessage,
    },
}

/// Tunables for retries and buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Backoff applied to transport failures.
    pub retry: RetryPolicy,
    /// Bound on host id regenerations after collisions; `None` retries forever.
    pub max_id_attempts: Option<u32>,
    /// Number of received triggers kept by [`SessionEngine::triggers`].
    pub trigger_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_id_attempts: None,
            trigger_capacity: DEFAULT_TRIGGER_CAPACITY,
        }
    }
}

#[derive(Default)]
struct EngineState {
    mode: Option<SessionMode>,
    identity: Option<PeerId>,
    host_link: Option<ConnectionHandle>,
    destroyed: bool,
}

/// Session protocol engine shared through an [`Arc`].
pub struct SessionEngine {
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    state: RwLock<EngineState>,
    registry: RwLock<PeerRegistry>,
    triggers: Mutex<VecDeque<MotionTrigger>>,
    status: watch::Sender<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    events: mpsc::UnboundedSender<SessionEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    host_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionEngine {
    /// Build an engine over `transport`. The receiver yields every [`SessionEvent`].
    pub fn new(
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Offline);
        let (shutdown, _) = watch::channel(false);
        let engine = Arc::new(Self {
            transport,
            options,
            state: RwLock::new(EngineState::default()),
            registry: RwLock::new(PeerRegistry::new()),
            triggers: Mutex::new(VecDeque::new()),
            status,
            shutdown,
            events,
            tasks: Mutex::new(Vec::new()),
            host_task: Mutex::new(None),
        });
        (engine, rx)
    }

    /// Register on the network as host or gate and start watching the endpoint.
    ///
    /// A host uses `preferred` when given, otherwise a generated 4-digit id, and regenerates on
    /// collision. Retryable transport failures are retried with the configured backoff; only a
    /// non-retryable failure or an exhausted bound is returned.
    pub async fn init(
        self: &Arc<Self>,
        as_host: bool,
        preferred: Option<PeerId>,
    ) -> Result<PeerId, SessionError> {
        let mode = if as_host {
            SessionMode::Host
        } else {
            SessionMode::Client
        };
        {
            let mut state = self.state.write().await;
            state.destroyed = false;
            state.mode = Some(mode);
        }
        self.shutdown.send_replace(false);
        self.status.send_replace(ConnectionStatus::Initializing);

        let candidate = match mode {
            SessionMode::Host => Some(preferred.unwrap_or_else(PeerId::generate)),
            SessionMode::Client => preferred,
        };
        let endpoint = self.open_endpoint(mode, candidate).await?;
        let id = endpoint.id.clone();
        self.state.write().await.identity = Some(id.clone());
        self.status.send_replace(ConnectionStatus::Online);
        info!(peer = %id, mode = mode.as_str(), "session initialized");

        let task = tokio::spawn(Arc::clone(self).watch_endpoint(endpoint));
        self.track(task).await;
        Ok(id)
    }

    async fn open_endpoint(
        &self,
        mode: SessionMode,
        mut candidate: Option<PeerId>,
    ) -> Result<Endpoint, SessionError> {
        let mut collisions = 0u32;
        let mut failures = 0u32;
        loop {
            match self.transport.open(candidate.clone()).await {
                Ok(endpoint) => return Ok(endpoint),
                Err(TransportError::UnavailableId(taken)) => {
                    collisions += 1;
                    if self
                        .options
                        .max_id_attempts
                        .is_some_and(|max| collisions >= max)
                    {
                        let err = SessionError::IdExhausted {
                            attempts: collisions,
                        };
                        self.status
                            .send_replace(ConnectionStatus::Error(err.to_string()));
                        return Err(err);
                    }
                    warn!(peer = %taken, "peer id already taken; generating a new one");
                    candidate = Some(match mode {
                        SessionMode::Host => PeerId::generate(),
                        SessionMode::Client => PeerId::anonymous(),
                    });
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    self.status
                        .send_replace(ConnectionStatus::Error(err.to_string()));
                    let Some(delay) = self.options.retry.delay_for(failures) else {
                        error!(error = %err, attempts = failures, "giving up opening endpoint");
                        return Err(SessionError::Connection(err));
                    };
                    warn!(error = %err, attempt = failures, "failed to open endpoint; retrying");
                    if !self.pause(delay).await {
                        return Err(SessionError::Destroyed);
                    }
                }
                Err(err) => {
                    self.status
                        .send_replace(ConnectionStatus::Error(err.to_string()));
                    return Err(SessionError::Connection(err));
                }
            }
        }
    }

    /// Serve incoming links and reopen the endpoint under the same id if the signalling link drops.
    async fn watch_endpoint(self: Arc<Self>, mut endpoint: Endpoint) {
        loop {
            let reason = match endpoint.events.recv().await {
                Some(EndpointEvent::Incoming(connection)) => {
                    self.accept(connection).await;
                    continue;
                }
                Some(EndpointEvent::Disconnected(err)) => err,
                None => TransportError::Network("endpoint closed".into()),
            };

            warn!(peer = %endpoint.id, error = %reason, "signalling link lost; reconnecting");
            self.status.send_replace(ConnectionStatus::Reconnecting);
            if !self.pause(self.options.retry.delay()).await {
                return;
            }
            let Some(mode) = self.state.read().await.mode else {
                return;
            };
            match self.open_endpoint(mode, Some(endpoint.id.clone())).await {
                Ok(reopened) => {
                    if reopened.id != endpoint.id {
                        warn!(old = %endpoint.id, new = %reopened.id, "reopened under a new id");
                    }
                    self.state.write().await.identity = Some(reopened.id.clone());
                    self.status.send_replace(ConnectionStatus::Online);
                    info!(peer = %reopened.id, "signalling link restored");
                    endpoint = reopened;
                }
                Err(err) => {
                    error!(error = %err, "failed to reopen endpoint");
                    return;
                }
            }
        }
    }

    async fn accept(self: &Arc<Self>, connection: Connection) {
        if self.state.read().await.mode != Some(SessionMode::Host) {
            debug!(peer = %connection.peer(), "gate refuses incoming link");
            connection.handle.close();
            return;
        }
        let task = tokio::spawn(Arc::clone(self).serve_peer(connection));
        self.track(task).await;
    }

    /// Reader loop for one gate link on the host.
    async fn serve_peer(self: Arc<Self>, connection: Connection) {
        let (handle, mut events) = connection.into_parts();
        let peer = handle.peer().clone();
        let connection_id = Uuid::new_v4();
        let mut registered = false;

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Open if !registered => {
                    registered = true;
                    let previous = self
                        .registry
                        .write()
                        .await
                        .insert(ConnectedPeer::new(connection_id, handle.clone()));
                    if let Some(previous) = previous {
                        debug!(peer = %peer, "replacing stale connection");
                        previous.handle.close();
                    }
                    info!(peer = %peer, "peer connected");
                    self.emit(SessionEvent::PeerConnected { id: peer.clone() });
                }
                ConnectionEvent::Open => {}
                ConnectionEvent::Data(text) => {
                    self.handle_peer_data(&peer, connection_id, &text).await;
                }
                ConnectionEvent::Error(err) => {
                    warn!(peer = %peer, error = %err, "peer link failed");
                    break;
                }
                ConnectionEvent::Close => break,
            }
        }

        if self
            .registry
            .write()
            .await
            .remove(&peer, connection_id)
            .is_some()
        {
            info!(peer = %peer, "peer left");
            self.emit(SessionEvent::PeerLeft { id: peer });
        }
    }

    async fn handle_peer_data(&self, peer: &PeerId, connection_id: Uuid, text: &str) {
        let message = match SessionMessage::from_json_str(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %peer, error = %err, "dropping malformed message");
                return;
            }
        };

        match &message {
            SessionMessage::Join(JoinPayload { name }) => {
                let outcome = self
                    .registry
                    .write()
                    .await
                    .mark_joined(peer, connection_id, name);
                match outcome {
                    Some(true) => {
                        info!(peer = %peer, name = %name, "peer joined");
                        self.emit(SessionEvent::PeerJoined {
                            id: peer.clone(),
                            name: name.clone(),
                        });
                    }
                    Some(false) => debug!(peer = %peer, name = %name, "peer renamed"),
                    None => debug!(peer = %peer, "join from stale connection ignored"),
                }
                return;
            }
            SessionMessage::Trigger(payload) => {
                self.buffer_trigger(MotionTrigger::from(payload)).await;
            }
            _ => {}
        }

        self.emit(SessionEvent::Message {
            from: peer.clone(),
            message,
        });
    }

    async fn buffer_trigger(&self, trigger: MotionTrigger) {
        let capacity = self.options.trigger_capacity;
        if capacity == 0 {
            return;
        }
        let mut buffer = self.triggers.lock().await;
        buffer.push_back(trigger);
        while buffer.len() > capacity {
            buffer.pop_front();
        }
    }

    /// Start the supervised link from this gate to `host_id`, replacing any previous one.
    pub async fn connect_to_host(
        self: &Arc<Self>,
        host_id: PeerId,
        display_name: impl Into<String>,
    ) -> Result<(), SessionError> {
        let local = {
            let state = self.state.read().await;
            ensure_mode(&state, SessionMode::Client)?;
            state.identity.clone().ok_or(SessionError::NotInitialized)?
        };
        let task = tokio::spawn(Arc::clone(self).run_host_link(
            local,
            host_id,
            display_name.into(),
        ));
        if let Some(previous) = self.host_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn run_host_link(self: Arc<Self>, local: PeerId, host: PeerId, name: String) {
        let mut failures = 0u32;
        loop {
            if *self.shutdown.borrow() {
                return;
            }
            match self.transport.connect(local.clone(), host.clone()).await {
                Ok(connection) => {
                    if self.drive_host_link(connection, &name).await {
                        failures = 0;
                    }
                    failures += 1;
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    warn!(host = %host, error = %err, attempt = failures, "failed to reach host");
                }
                Err(err) => {
                    error!(host = %host, error = %err, "host link failed permanently");
                    self.status
                        .send_replace(ConnectionStatus::Error(err.to_string()));
                    return;
                }
            }

            let Some(delay) = self.options.retry.delay_for(failures) else {
                error!(host = %host, attempts = failures, "giving up on host");
                self.status
                    .send_replace(ConnectionStatus::Error(format!("host `{host}` unreachable")));
                return;
            };
            self.status.send_replace(ConnectionStatus::Reconnecting);
            if !self.pause(delay).await {
                return;
            }
        }
    }

    /// Pump one host link until it closes. Returns whether the link ever opened.
    async fn drive_host_link(&self, connection: Connection, name: &str) -> bool {
        let (handle, mut events) = connection.into_parts();
        let host = handle.peer().clone();
        let mut opened = false;

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Open if !opened => {
                    opened = true;
                    if !self.send_to(&handle, &SessionMessage::join(name)) {
                        break;
                    }
                    self.state.write().await.host_link = Some(handle.clone());
                    self.status.send_replace(ConnectionStatus::Online);
                    info!(host = %host, "connected to host");
                    self.emit(SessionEvent::HostConnected { id: host.clone() });
                }
                ConnectionEvent::Open => {}
                ConnectionEvent::Data(text) => match SessionMessage::from_json_str(&text) {
                    Ok(message) => self.emit(SessionEvent::Message {
                        from: host.clone(),
                        message,
                    }),
                    Err(err) => warn!(host = %host, error = %err, "dropping malformed message"),
                },
                ConnectionEvent::Error(err) => {
                    warn!(host = %host, error = %err, "host link failed");
                    break;
                }
                ConnectionEvent::Close => break,
            }
        }

        self.state.write().await.host_link = None;
        if opened {
            warn!(host = %host, "lost connection to host");
            self.emit(SessionEvent::HostLost { id: host });
        }
        opened
    }

    /// Give `role` to `peer`, clearing any other holder first.
    pub async fn assign_role(&self, peer: &PeerId, role: Role) -> Result<(), SessionError> {
        self.ensure(SessionMode::Host).await?;
        let change = self
            .registry
            .write()
            .await
            .assign(peer, role)
            .ok_or_else(|| SessionError::UnknownPeer(peer.clone()))?;

        if !change.target_joined {
            info!(peer = %peer, ?role, "assigning role to a peer that has not joined yet");
        }
        if let Some(displaced) = &change.displaced {
            info!(peer = %displaced.peer(), ?role, "role moved away from previous holder");
            self.send_to(displaced, &SessionMessage::role_assign(Role::None));
        }
        self.send_to(&change.target, &SessionMessage::role_assign(role));
        Ok(())
    }

    /// Send STATE_CHANGE to every registered gate. Returns how many links accepted it.
    pub async fn broadcast_state(
        &self,
        state: GateCommand,
        race_id: Option<String>,
    ) -> Result<usize, SessionError> {
        self.ensure(SessionMode::Host).await?;
        let text = SessionMessage::state_change(state, race_id).to_json()?;
        Ok(self.broadcast_text(text).await)
    }

    /// Send RESET to every registered gate and forget received triggers.
    pub async fn broadcast_reset(&self) -> Result<usize, SessionError> {
        self.ensure(SessionMode::Host).await?;
        let text = SessionMessage::Reset.to_json()?;
        self.triggers.lock().await.clear();
        Ok(self.broadcast_text(text).await)
    }

    async fn broadcast_text(&self, text: String) -> usize {
        let handles = self.registry.read().await.handles();
        let mut delivered = 0;
        for handle in handles {
            match handle.send_text(text.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => warn!(peer = %handle.peer(), error = %err, "broadcast skipped peer"),
            }
        }
        delivered
    }

    /// Send TRIGGER to the host over the current link.
    pub async fn send_trigger(
        &self,
        role: Role,
        timestamp: u64,
        race_id: Option<String>,
    ) -> Result<(), SessionError> {
        let link = {
            let state = self.state.read().await;
            ensure_mode(&state, SessionMode::Client)?;
            state.host_link.clone().ok_or(SessionError::NotConnected)?
        };
        let text = SessionMessage::trigger(role, timestamp, race_id).to_json()?;
        link.send_text(text)
            .map_err(|_| SessionError::NotConnected)
    }

    /// Stop every task, close every link and release the identity. Safe to call repeatedly.
    pub async fn destroy(&self) {
        let identity = {
            let mut state = self.state.write().await;
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.mode = None;
            if let Some(link) = state.host_link.take() {
                link.close();
            }
            state.identity.take()
        };

        self.shutdown.send_replace(true);
        if let Some(task) = self.host_task.lock().await.take() {
            task.abort();
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        for peer in self.registry.write().await.drain() {
            peer.handle.close();
        }
        self.triggers.lock().await.clear();
        if let Some(id) = identity {
            self.transport.release(&id);
            info!(peer = %id, "session destroyed");
        }
        self.status.send_replace(ConnectionStatus::Offline);
    }

    /// Registered gates in connection order.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.registry.read().await.infos()
    }

    /// Whether some connected gate currently holds START.
    pub async fn can_start(&self) -> bool {
        self.registry.read().await.holder_of(Role::Start).is_some()
    }

    /// Role the registry holds for `peer`, if it is connected.
    pub async fn role_of(&self, peer: &PeerId) -> Option<Role> {
        self.registry.read().await.get(peer).map(|entry| entry.role)
    }

    /// Most recent triggers received from gates, oldest first.
    pub async fn triggers(&self) -> Vec<MotionTrigger> {
        self.triggers.lock().await.iter().cloned().collect()
    }

    /// Identity granted by the transport, once initialized.
    pub async fn identity(&self) -> Option<PeerId> {
        self.state.read().await.identity.clone()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to connection status updates.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    async fn ensure(&self, expected: SessionMode) -> Result<(), SessionError> {
        ensure_mode(&*self.state.read().await, expected)
    }

    fn send_to(&self, handle: &ConnectionHandle, message: &SessionMessage) -> bool {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(err) => {
                error!(error = %err, "failed to encode message");
                return false;
            }
        };
        match handle.send_text(text) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    peer = %handle.peer(),
                    kind = message.message_type(),
                    error = %err,
                    "failed to send message"
                );
                false
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Sleep for `delay`, returning `false` if the engine is destroyed in the meantime.
    async fn pause(&self, delay: Duration) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => !*self.shutdown.borrow(),
            _ = shutdown.wait_for(|stop| *stop) => false,
        }
    }
}

fn ensure_mode(state: &EngineState, expected: SessionMode) -> Result<(), SessionError> {
    if state.destroyed {
        return Err(SessionError::Destroyed);
    }
    match state.mode {
        None => Err(SessionError::NotInitialized),
        Some(mode) if mode == expected => Ok(()),
        Some(_) => Err(SessionError::WrongMode {
            expected: expected.as_str(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::memory::MemoryNetwork;

    fn engine(network: &MemoryNetwork) -> (Arc<SessionEngine>, mpsc::UnboundedReceiver<SessionEvent>) {
        SessionEngine::new(Arc::new(network.clone()), SessionOptions::default())
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn host_uses_preferred_id() {
        let network = MemoryNetwork::new();
        let (host, _rx) = engine(&network);
        let id = host.init(true, Some(PeerId::from("4821"))).await.unwrap();
        assert_eq!(id, PeerId::from("4821"));
        assert_eq!(host.status(), ConnectionStatus::Online);
        assert!(network.is_registered(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn host_regenerates_id_on_collision() {
        let network = MemoryNetwork::new();
        let _squatter = network.open(Some(PeerId::from("4821"))).await.unwrap();
        let (host, _rx) = engine(&network);
        let id = host.init(true, Some(PeerId::from("4821"))).await.unwrap();
        assert_ne!(id, PeerId::from("4821"));
        assert_eq!(id.as_str().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_id_attempts_fail_with_exhaustion() {
        let network = MemoryNetwork::new();
        let _squatter = network.open(Some(PeerId::from("4821"))).await.unwrap();
        let options = SessionOptions {
            max_id_attempts: Some(1),
            ..SessionOptions::default()
        };
        let (host, _rx) = SessionEngine::new(Arc::new(network.clone()), options);
        let err = host
            .init(true, Some(PeerId::from("4821")))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::IdExhausted { attempts: 1 }));
        assert!(matches!(host.status(), ConnectionStatus::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn init_retries_through_server_outage() {
        let network = MemoryNetwork::new();
        network.set_online(false);
        let (host, _rx) = engine(&network);

        let init = tokio::spawn({
            let host = host.clone();
            async move { host.init(true, Some(PeerId::from("4821"))).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(host.status(), ConnectionStatus::Error(_)));

        network.set_online(true);
        let id = init.await.unwrap().unwrap();
        assert_eq!(id, PeerId::from("4821"));
        assert_eq!(host.status(), ConnectionStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retry_surfaces_connection_error() {
        let network = MemoryNetwork::new();
        network.set_online(false);
        let options = SessionOptions {
            retry: RetryPolicy::fixed(Duration::from_millis(10)).with_max_attempts(2),
            ..SessionOptions::default()
        };
        let (host, _rx) = SessionEngine::new(Arc::new(network.clone()), options);
        let err = host.init(true, None).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Connection(TransportError::ServerError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn host_only_operations_reject_clients() {
        let network = MemoryNetwork::new();
        let (gate, _rx) = engine(&network);
        assert!(matches!(
            gate.broadcast_reset().await,
            Err(SessionError::NotInitialized)
        ));
        gate.init(false, None).await.unwrap();
        assert!(matches!(
            gate.broadcast_state(GateCommand::Armed, None).await,
            Err(SessionError::WrongMode { expected: "host" })
        ));
        assert!(matches!(
            gate.send_trigger(Role::Start, 1, None).await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn join_and_role_assignment_flow() {
        let network = MemoryNetwork::new();
        let (host, mut host_rx) = engine(&network);
        let host_id = host.init(true, Some(PeerId::from("4821"))).await.unwrap();
        let (gate, mut gate_rx) = engine(&network);
        let gate_id = gate.init(false, None).await.unwrap();
        gate.connect_to_host(host_id.clone(), "Start Gate").await.unwrap();

        assert_eq!(
            next_event(&mut gate_rx).await,
            SessionEvent::HostConnected { id: host_id.clone() }
        );
        assert_eq!(
            next_event(&mut host_rx).await,
            SessionEvent::PeerConnected { id: gate_id.clone() }
        );
        assert_eq!(
            next_event(&mut host_rx).await,
            SessionEvent::PeerJoined {
                id: gate_id.clone(),
                name: "Start Gate".into()
            }
        );

        host.assign_role(&gate_id, Role::Start).await.unwrap();
        assert!(host.can_start().await);
        assert_eq!(
            next_event(&mut gate_rx).await,
            SessionEvent::Message {
                from: host_id.clone(),
                message: SessionMessage::role_assign(Role::Start)
            }
        );

        let err = host
            .assign_role(&PeerId::from("ghost"), Role::Finish)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownPeer(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_are_buffered_and_cleared_by_reset() {
        let network = MemoryNetwork::new();
        let (host, mut host_rx) = engine(&network);
        let host_id = host.init(true, Some(PeerId::from("4821"))).await.unwrap();
        let (gate, mut gate_rx) = engine(&network);
        gate.init(false, None).await.unwrap();
        gate.connect_to_host(host_id, "Finish").await.unwrap();
        next_event(&mut gate_rx).await;
        next_event(&mut host_rx).await;
        next_event(&mut host_rx).await;

        gate.send_trigger(Role::Finish, 77, Some("r1".into()))
            .await
            .unwrap();
        assert!(matches!(
            next_event(&mut host_rx).await,
            SessionEvent::Message {
                message: SessionMessage::Trigger(_),
                ..
            }
        ));
        assert_eq!(host.triggers().await.len(), 1);

        assert_eq!(host.broadcast_reset().await.unwrap(), 1);
        assert!(host.triggers().await.is_empty());
        assert_eq!(host.broadcast_reset().await.unwrap(), 1);
        assert!(host.triggers().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent_and_releases_identity() {
        let network = MemoryNetwork::new();
        let (host, _rx) = engine(&network);
        let id = host.init(true, Some(PeerId::from("4821"))).await.unwrap();
        host.destroy().await;
        host.destroy().await;
        assert_eq!(host.status(), ConnectionStatus::Offline);
        assert_eq!(host.identity().await, None);
        assert!(!network.is_registered(&id));
        assert!(matches!(
            host.broadcast_reset().await,
            Err(SessionError::Destroyed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_reopens_with_same_id_after_signalling_loss() {
        let network = MemoryNetwork::new();
        let (host, _rx) = engine(&network);
        let mut status = host.subscribe_status();
        let id = host.init(true, Some(PeerId::from("4821"))).await.unwrap();

        network.disconnect_signalling(&id);
        status
            .wait_for(|s| *s == ConnectionStatus::Reconnecting)
            .await
            .unwrap();
        status
            .wait_for(|s| *s == ConnectionStatus::Online)
            .await
            .unwrap();
        assert!(network.is_registered(&id));
        assert_eq!(host.identity().await, Some(id));
    }
}
