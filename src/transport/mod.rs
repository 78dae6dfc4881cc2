//! Point-to-point message channels addressed by [`PeerId`].
//!
//! The session engine only sees the [`Transport`] trait: it opens an identity on the network,
//! dials peers, and consumes per-connection [`ConnectionEvent`]s. Outbound traffic goes through
//! a [`ConnectionHandle`] that queues [`Frame`]s for a dedicated writer task, so sending never
//! blocks the caller.

pub mod memory;
pub mod websocket;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::state::peer::PeerId;

/// Error raised by transport adapters, discriminated by [`TransportError::kind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The requested identity is already registered on the network.
    #[error("peer id `{0}` is already taken")]
    UnavailableId(PeerId),
    /// The target peer is not reachable (unknown id or gone).
    #[error("peer `{0}` is unavailable")]
    PeerUnavailable(PeerId),
    /// Link-level failure (socket closed, unreachable host).
    #[error("network error: {0}")]
    Network(String),
    /// The signalling side rejected or failed the request.
    #[error("server error: {0}")]
    ServerError(String),
    /// Anything else; never retried.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Stable discriminator matching the collaborator error `type` strings.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::UnavailableId(_) => "unavailable-id",
            TransportError::PeerUnavailable(_) => "peer-unavailable",
            TransportError::Network(_) => "network",
            TransportError::ServerError(_) => "server-error",
            TransportError::Other(_) => "other",
        }
    }

    /// Whether the failure is expected to clear up on its own after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::PeerUnavailable(_)
                | TransportError::Network(_)
                | TransportError::ServerError(_)
        )
    }
}

/// Frame queued for the writer side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 payload, one serialized message per frame.
    Text(String),
    /// Ask the writer to close the link.
    Close,
}

/// Event observed on a single connection, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The link is usable.
    Open,
    /// A text frame arrived from the remote peer.
    Data(String),
    /// The link is gone; no further events follow.
    Close,
    /// The link failed; usually followed by [`ConnectionEvent::Close`].
    Error(TransportError),
}

/// Event observed on an opened endpoint.
#[derive(Debug)]
pub enum EndpointEvent {
    /// A remote peer dialled this endpoint.
    Incoming(Connection),
    /// The endpoint lost its registration and must be reopened.
    Disconnected(TransportError),
}

/// Cloneable sender half of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    peer: PeerId,
    tx: mpsc::UnboundedSender<Frame>,
}

impl ConnectionHandle {
    /// Wrap the writer queue of a connection to `peer`.
    pub fn new(peer: PeerId, tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { peer, tx }
    }

    /// Identity of the remote side.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Queue a text frame; fails once the writer side has shut down.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.tx.send(Frame::Text(text)).map_err(|_| {
            TransportError::Network(format!("connection to `{}` is closed", self.peer))
        })
    }

    /// Ask the writer to close the link. Closing twice is harmless.
    pub fn close(&self) {
        let _ = self.tx.send(Frame::Close);
    }

    /// Non-owning reference to the writer queue.
    pub(crate) fn downgrade(&self) -> mpsc::WeakUnboundedSender<Frame> {
        self.tx.downgrade()
    }

    /// True once the writer task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A connection: the handle to write with and the stream of events to read.
#[derive(Debug)]
pub struct Connection {
    /// Writer half.
    pub handle: ConnectionHandle,
    /// Reader half.
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Connection {
    /// Identity of the remote side.
    pub fn peer(&self) -> &PeerId {
        self.handle.peer()
    }

    /// Split into writer and reader halves.
    pub fn into_parts(self) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        (self.handle, self.events)
    }
}

/// An identity registered on the network plus its incoming event stream.
#[derive(Debug)]
pub struct Endpoint {
    /// Identity granted by the transport.
    pub id: PeerId,
    /// Incoming connections and registration loss.
    pub events: mpsc::UnboundedReceiver<EndpointEvent>,
}

/// Abstraction over the peer transport (WebRTC-style data channels, WebSockets, in-memory).
pub trait Transport: Send + Sync {
    /// Register on the network, using `id` when provided or an anonymous identity otherwise.
    fn open(&self, id: Option<PeerId>) -> BoxFuture<'static, Result<Endpoint, TransportError>>;
    /// Dial `target` from `local`. The returned connection reports `Open` once usable.
    fn connect(
        &self,
        local: PeerId,
        target: PeerId,
    ) -> BoxFuture<'static, Result<Connection, TransportError>>;
    /// Drop the registration of `id` and every link it owns.
    fn release(&self, id: &PeerId);
}

/// Channels backing one side of a freshly created connection.
pub(crate) struct ConnectionParts {
    pub connection: Connection,
    pub frames: mpsc::UnboundedReceiver<Frame>,
    pub events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Allocate the writer queue and event stream for a connection to `peer`.
pub(crate) fn connection_parts(peer: PeerId) -> ConnectionParts {
    let (frame_tx, frames) = mpsc::unbounded_channel();
    let (events, event_rx) = mpsc::unbounded_channel();
    ConnectionParts {
        connection: Connection {
            handle: ConnectionHandle::new(peer, frame_tx),
            events: event_rx,
        },
        frames,
        events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(TransportError::Network("down".into()).is_retryable());
        assert!(TransportError::ServerError("500".into()).is_retryable());
        assert!(TransportError::PeerUnavailable(PeerId::from("4821")).is_retryable());
        assert!(!TransportError::UnavailableId(PeerId::from("4821")).is_retryable());
        assert!(!TransportError::Other("bad".into()).is_retryable());
    }

    #[test]
    fn kind_strings() {
        assert_eq!(
            TransportError::UnavailableId(PeerId::from("1234")).kind(),
            "unavailable-id"
        );
        assert_eq!(
            TransportError::PeerUnavailable(PeerId::from("1234")).kind(),
            "peer-unavailable"
        );
        assert_eq!(TransportError::ServerError(String::new()).kind(), "server-error");
    }

    #[test]
    fn send_after_writer_drop_fails() {
        let parts = connection_parts(PeerId::from("4821"));
        let handle = parts.connection.handle.clone();
        drop(parts);
        assert!(handle.is_closed());
        let err = handle.send_text("{}".into()).unwrap_err();
        assert_eq!(err.kind(), "network");
    }
}
