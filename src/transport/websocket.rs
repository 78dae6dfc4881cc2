//! WebSocket adapters: the host accepts `/peer` upgrades, gates dial them.
//!
//! A link is a single WebSocket carrying one JSON message per text frame. The dialler names
//! itself and its target in the query string (`/peer?from=<id>&to=<host id>`); the host answers
//! 404 when the target is not its own identity, which gates see as `peer-unavailable`.

use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{FutureExt, SinkExt, StreamExt, future::BoxFuture};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

use super::{
    Connection, ConnectionEvent, Endpoint, EndpointEvent, Frame, Transport, TransportError,
    connection_parts,
};
use crate::state::peer::PeerId;

struct Registration {
    id: PeerId,
    events: mpsc::UnboundedSender<EndpointEvent>,
}

/// Host-side transport fed by the `/peer` WebSocket route.
#[derive(Default)]
pub struct WsListener {
    slot: Mutex<Option<Registration>>,
}

impl WsListener {
    /// Create a listener with no identity yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity currently registered, if the session has opened one.
    pub fn local_id(&self) -> Option<PeerId> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|registration| registration.id.clone()))
    }

    /// Whether a dial aimed at `target` should be accepted.
    pub fn accepts(&self, target: &PeerId) -> bool {
        self.local_id().as_ref() == Some(target)
    }

    fn endpoint_sender(&self) -> Option<mpsc::UnboundedSender<EndpointEvent>> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|registration| registration.events.clone()))
    }

    /// Drive an upgraded socket dialled by `from` until either side closes it.
    pub async fn accept(&self, from: PeerId, socket: WebSocket) {
        let Some(endpoint) = self.endpoint_sender() else {
            warn!(%from, "peer link rejected: no endpoint open");
            return;
        };

        let parts = connection_parts(from.clone());
        let events = parts.events;
        let mut frames = parts.frames;
        let (mut sink, mut stream) = socket.split();

        // Dedicated writer task keeps outbound frames flowing while we await inbound ones.
        let writer = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match frame {
                    Frame::Text(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Frame::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let _ = events.send(ConnectionEvent::Open);
        if endpoint
            .send(EndpointEvent::Incoming(parts.connection))
            .is_err()
        {
            writer.abort();
            return;
        }
        info!(%from, "peer link accepted");

        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if events
                        .send(ConnectionEvent::Data(text.as_str().to_owned()))
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    let _ = events.send(ConnectionEvent::Error(TransportError::Network(
                        err.to_string(),
                    )));
                    break;
                }
            }
        }

        writer.abort();
        let _ = events.send(ConnectionEvent::Close);
        debug!(%from, "peer link finished");
    }
}

impl Transport for WsListener {
    fn open(&self, id: Option<PeerId>) -> BoxFuture<'static, Result<Endpoint, TransportError>> {
        let id = id.unwrap_or_else(PeerId::generate);
        let result = match self.slot.lock() {
            Ok(mut slot) => {
                let (events, rx) = mpsc::unbounded_channel();
                *slot = Some(Registration {
                    id: id.clone(),
                    events,
                });
                Ok(Endpoint { id, events: rx })
            }
            Err(_) => Err(TransportError::Other("listener registry poisoned".into())),
        };
        futures::future::ready(result).boxed()
    }

    fn connect(
        &self,
        _local: PeerId,
        target: PeerId,
    ) -> BoxFuture<'static, Result<Connection, TransportError>> {
        futures::future::ready(Err(TransportError::Other(format!(
            "listener cannot dial `{target}`"
        ))))
        .boxed()
    }

    fn release(&self, id: &PeerId) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.as_ref().is_some_and(|registration| &registration.id == id) {
                slot.take();
            }
        }
    }
}

/// Gate-side transport dialling a host's `/peer` route.
pub struct WsConnector {
    base_url: String,
    endpoints: Arc<DashMap<PeerId, mpsc::UnboundedSender<EndpointEvent>>>,
}

impl WsConnector {
    /// Dial hosts reachable under `base_url` (e.g. `ws://192.168.1.20:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoints: Arc::new(DashMap::new()),
        }
    }

    fn link_url(&self, local: &PeerId, target: &PeerId) -> String {
        format!("{}/peer?from={}&to={}", self.base_url, local, target)
    }
}

fn map_dial_error(target: &PeerId, err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) if response.status().as_u16() == 404 => {
            TransportError::PeerUnavailable(target.clone())
        }
        tungstenite::Error::Http(response) => {
            TransportError::ServerError(format!("host answered {}", response.status()))
        }
        other => TransportError::Network(other.to_string()),
    }
}

impl Transport for WsConnector {
    fn open(&self, id: Option<PeerId>) -> BoxFuture<'static, Result<Endpoint, TransportError>> {
        let id = id.unwrap_or_else(PeerId::anonymous);
        let (tx, events) = mpsc::unbounded_channel();
        self.endpoints.insert(id.clone(), tx);
        futures::future::ready(Ok(Endpoint { id, events })).boxed()
    }

    fn connect(
        &self,
        local: PeerId,
        target: PeerId,
    ) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let url = self.link_url(&local, &target);
        async move {
            let (socket, _) = connect_async(url.as_str())
                .await
                .map_err(|err| map_dial_error(&target, err))?;
            let parts = connection_parts(target.clone());
            let events = parts.events;
            let mut frames = parts.frames;
            let (mut sink, mut stream) = socket.split();

            let writer = tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    match frame {
                        Frame::Text(text) => {
                            if sink.send(tungstenite::Message::text(text)).await.is_err() {
                                break;
                            }
                        }
                        Frame::Close => {
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
            });

            let _ = events.send(ConnectionEvent::Open);
            tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(tungstenite::Message::Text(text)) => {
                            if events
                                .send(ConnectionEvent::Data(text.as_str().to_owned()))
                                .is_err()
                            {
                                break;
                            }
                        }
                        Ok(tungstenite::Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            let _ = events.send(ConnectionEvent::Error(TransportError::Network(
                                err.to_string(),
                            )));
                            break;
                        }
                    }
                }
                writer.abort();
                let _ = events.send(ConnectionEvent::Close);
            });

            debug!(%target, "dialled host");
            Ok(parts.connection)
        }
        .boxed()
    }

    fn release(&self, id: &PeerId) {
        self.endpoints.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_accepts_only_its_identity() {
        let listener = WsListener::new();
        assert!(!listener.accepts(&PeerId::from("4821")));

        let endpoint = listener.open(Some(PeerId::from("4821"))).await.unwrap();
        assert_eq!(endpoint.id, PeerId::from("4821"));
        assert!(listener.accepts(&PeerId::from("4821")));
        assert!(!listener.accepts(&PeerId::from("1111")));

        listener.release(&PeerId::from("4821"));
        assert_eq!(listener.local_id(), None);
    }

    #[tokio::test]
    async fn listener_cannot_dial() {
        let listener = WsListener::new();
        let err = listener
            .connect(PeerId::from("4821"), PeerId::from("1000"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn connector_builds_link_url() {
        let connector = WsConnector::new("ws://10.0.0.2:8080/");
        assert_eq!(
            connector.link_url(&PeerId::from("abc"), &PeerId::from("4821")),
            "ws://10.0.0.2:8080/peer?from=abc&to=4821"
        );
    }
}
