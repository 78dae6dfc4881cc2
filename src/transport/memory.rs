//! In-process network used by tests and single-binary demos.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{FutureExt, future::BoxFuture};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    Connection, ConnectionEvent, Endpoint, EndpointEvent, Frame, Transport, TransportError,
    connection_parts,
};
use crate::state::peer::PeerId;

#[derive(Default)]
struct Inner {
    endpoints: DashMap<PeerId, mpsc::UnboundedSender<EndpointEvent>>,
    links: DashMap<PeerId, Vec<mpsc::WeakUnboundedSender<Frame>>>,
    offline: AtomicBool,
}

/// Shared switchboard: every clone sees the same registrations and links.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Inner>,
}

impl MemoryNetwork {
    /// Create an empty, online network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the signalling service going down or coming back.
    ///
    /// While offline, `open` fails with `server-error` and `connect` with `network`. Existing
    /// links are left alone.
    pub fn set_online(&self, online: bool) {
        self.inner.offline.store(!online, Ordering::SeqCst);
    }

    /// Whether the signalling service is reachable.
    pub fn is_online(&self) -> bool {
        !self.inner.offline.load(Ordering::SeqCst)
    }

    /// Drop the registration of `id` as if the signalling link broke; its data links survive.
    pub fn disconnect_signalling(&self, id: &PeerId) {
        if let Some((_, tx)) = self.inner.endpoints.remove(id) {
            let _ = tx.send(EndpointEvent::Disconnected(TransportError::Network(
                "signalling connection lost".into(),
            )));
        }
    }

    /// Close every data link owned by `id` without touching its registration.
    pub fn drop_links(&self, id: &PeerId) {
        if let Some((_, links)) = self.inner.links.remove(id) {
            for link in links.iter().filter_map(mpsc::WeakUnboundedSender::upgrade) {
                let _ = link.send(Frame::Close);
            }
        }
    }

    /// Whether `id` is currently registered.
    pub fn is_registered(&self, id: &PeerId) -> bool {
        self.inner.endpoints.contains_key(id)
    }

    fn track(&self, owner: &PeerId, link: mpsc::WeakUnboundedSender<Frame>) {
        let mut entry = self.inner.links.entry(owner.clone()).or_default();
        entry.retain(|weak| weak.strong_count() > 0);
        entry.push(link);
    }
}

/// Forward frames written on one side to the event stream of the other side.
async fn pump(
    mut frames: mpsc::UnboundedReceiver<Frame>,
    remote: mpsc::UnboundedSender<ConnectionEvent>,
    local: mpsc::UnboundedSender<ConnectionEvent>,
) {
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::Text(text) => {
                if remote.send(ConnectionEvent::Data(text)).is_err() {
                    break;
                }
            }
            Frame::Close => break,
        }
    }
    let _ = remote.send(ConnectionEvent::Close);
    let _ = local.send(ConnectionEvent::Close);
}

impl Transport for MemoryNetwork {
    fn open(&self, id: Option<PeerId>) -> BoxFuture<'static, Result<Endpoint, TransportError>> {
        let network = self.clone();
        async move {
            if !network.is_online() {
                return Err(TransportError::ServerError(
                    "signalling service unreachable".into(),
                ));
            }
            let id = id.unwrap_or_else(PeerId::anonymous);
            let (tx, events) = mpsc::unbounded_channel();
            match network.inner.endpoints.entry(id.clone()) {
                Entry::Occupied(_) => return Err(TransportError::UnavailableId(id)),
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
            }
            debug!(%id, "endpoint registered");
            Ok(Endpoint { id, events })
        }
        .boxed()
    }

    fn connect(
        &self,
        local: PeerId,
        target: PeerId,
    ) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let network = self.clone();
        async move {
            if !network.is_online() {
                return Err(TransportError::Network("signalling service unreachable".into()));
            }
            let listener = network
                .inner
                .endpoints
                .get(&target)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| TransportError::PeerUnavailable(target.clone()))?;

            let dialer_side = connection_parts(target.clone());
            let listener_side = connection_parts(local.clone());

            network.track(&local, dialer_side.connection.handle.downgrade());
            network.track(&target, listener_side.connection.handle.downgrade());

            tokio::spawn(pump(
                dialer_side.frames,
                listener_side.events.clone(),
                dialer_side.events.clone(),
            ));
            tokio::spawn(pump(
                listener_side.frames,
                dialer_side.events.clone(),
                listener_side.events.clone(),
            ));

            let _ = dialer_side.events.send(ConnectionEvent::Open);
            let _ = listener_side.events.send(ConnectionEvent::Open);

            if listener
                .send(EndpointEvent::Incoming(listener_side.connection))
                .is_err()
            {
                dialer_side.connection.handle.close();
                return Err(TransportError::PeerUnavailable(target));
            }
            debug!(from = %local, to = %target, "link established");
            Ok(dialer_side.connection)
        }
        .boxed()
    }

    fn release(&self, id: &PeerId) {
        self.inner.endpoints.remove(id);
        self.drop_links(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let network = MemoryNetwork::new();
        let _first = network.open(Some(PeerId::from("4821"))).await.unwrap();
        let err = network.open(Some(PeerId::from("4821"))).await.unwrap_err();
        assert_eq!(err, TransportError::UnavailableId(PeerId::from("4821")));
    }

    #[tokio::test]
    async fn offline_network_reports_retryable_errors() {
        let network = MemoryNetwork::new();
        network.set_online(false);
        let err = network.open(None).await.unwrap_err();
        assert_eq!(err.kind(), "server-error");
        let err = network
            .connect(PeerId::from("a"), PeerId::from("4821"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_target_is_unavailable() {
        let network = MemoryNetwork::new();
        let err = network
            .connect(PeerId::from("a"), PeerId::from("9999"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "peer-unavailable");
    }

    #[tokio::test]
    async fn frames_flow_both_ways_and_close_propagates() {
        let network = MemoryNetwork::new();
        let mut host = network.open(Some(PeerId::from("4821"))).await.unwrap();
        let mut dialer = network
            .connect(PeerId::from("gate"), PeerId::from("4821"))
            .await
            .unwrap();

        let Some(EndpointEvent::Incoming(mut accepted)) = host.events.recv().await else {
            panic!("expected incoming connection");
        };
        assert_eq!(accepted.peer(), &PeerId::from("gate"));
        assert_eq!(dialer.events.recv().await, Some(ConnectionEvent::Open));
        assert_eq!(accepted.events.recv().await, Some(ConnectionEvent::Open));

        dialer.handle.send_text("hello".into()).unwrap();
        assert_eq!(
            accepted.events.recv().await,
            Some(ConnectionEvent::Data("hello".into()))
        );
        accepted.handle.send_text("back".into()).unwrap();
        assert_eq!(
            dialer.events.recv().await,
            Some(ConnectionEvent::Data("back".into()))
        );

        network.drop_links(&PeerId::from("gate"));
        assert_eq!(accepted.events.recv().await, Some(ConnectionEvent::Close));
        assert_eq!(dialer.events.recv().await, Some(ConnectionEvent::Close));
    }

    #[tokio::test]
    async fn signalling_loss_notifies_endpoint() {
        let network = MemoryNetwork::new();
        let mut host = network.open(Some(PeerId::from("4821"))).await.unwrap();
        network.disconnect_signalling(&PeerId::from("4821"));
        assert!(matches!(
            host.events.recv().await,
            Some(EndpointEvent::Disconnected(TransportError::Network(_)))
        ));
        assert!(!network.is_registered(&PeerId::from("4821")));
    }
}
