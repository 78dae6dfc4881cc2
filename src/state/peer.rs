use std::{fmt, time::SystemTime};

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::transport::ConnectionHandle;

/// Lowest and highest host identities handed out by [`PeerId::generate`].
const HOST_ID_RANGE: std::ops::RangeInclusive<u16> = 1000..=9999;
/// Display name used until a gate completes its JOIN handshake.
pub const PLACEHOLDER_NAME: &str = "Unnamed gate";

/// Identity of a device on the transport network for the lifetime of one process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "4821")]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Draw a fresh 4-digit host identity (1000–9999).
    pub fn generate() -> Self {
        let value = rand::rng().random_range(HOST_ID_RANGE);
        Self(value.to_string())
    }

    /// Anonymous identity handed to gates by the transport.
    pub fn anonymous() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Timing role a gate can hold. At most one connected peer holds each non-`None` role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// No timing duty.
    #[default]
    None,
    /// Fires the start of a race.
    Start,
    /// Fires the end of a race.
    Finish,
}

impl Role {
    /// Whether the role is subject to the single-holder rule.
    pub fn is_exclusive(self) -> bool {
        !matches!(self, Role::None)
    }
}

/// Host-side record of one gate connection.
#[derive(Debug, Clone)]
pub struct ConnectedPeer {
    /// Transport identity of the gate.
    pub id: PeerId,
    /// Distinguishes successive connections from the same identity.
    pub connection_id: Uuid,
    /// Writer half of the link.
    pub handle: ConnectionHandle,
    /// Role currently held.
    pub role: Role,
    /// Name announced in JOIN, or [`PLACEHOLDER_NAME`].
    pub display_name: String,
    /// Whether the JOIN handshake has completed.
    pub joined: bool,
    /// When the transport reported the link open.
    pub connected_at: SystemTime,
}

impl ConnectedPeer {
    /// Register a link that has opened but not yet joined.
    pub fn new(connection_id: Uuid, handle: ConnectionHandle) -> Self {
        Self {
            id: handle.peer().clone(),
            connection_id,
            handle,
            role: Role::None,
            display_name: PLACEHOLDER_NAME.to_string(),
            joined: false,
            connected_at: SystemTime::now(),
        }
    }

    /// Read-only view without the connection handle.
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            role: self.role,
            display_name: self.display_name.clone(),
            joined: self.joined,
            connected_at: self.connected_at,
        }
    }
}

/// Detached copy of a registry entry, safe to hand out of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Transport identity.
    pub id: PeerId,
    /// Role currently held.
    pub role: Role,
    /// Announced or placeholder name.
    pub display_name: String,
    /// Whether JOIN has been received.
    pub joined: bool,
    /// When the link opened.
    pub connected_at: SystemTime,
}

/// Outcome of [`PeerRegistry::assign`].
#[derive(Debug, Clone)]
pub struct RoleChange {
    /// Link to the peer that received the role.
    pub target: ConnectionHandle,
    /// Whether the target has completed its JOIN handshake.
    pub target_joined: bool,
    /// Peer that held the role before and was cleared to [`Role::None`].
    pub displaced: Option<ConnectionHandle>,
}

/// Connected gates in connection order, keyed by identity.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: IndexMap<PeerId, ConnectedPeer>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer, replacing any previous connection under the same identity.
    pub fn insert(&mut self, peer: ConnectedPeer) -> Option<ConnectedPeer> {
        self.peers.insert(peer.id.clone(), peer)
    }

    /// Record the JOIN handshake for the given connection.
    ///
    /// Returns `Some(true)` on the first JOIN, `Some(false)` when an already joined peer renames
    /// itself, and `None` when the connection is no longer the registered one.
    pub fn mark_joined(&mut self, id: &PeerId, connection_id: Uuid, name: &str) -> Option<bool> {
        let peer = self
            .peers
            .get_mut(id)
            .filter(|peer| peer.connection_id == connection_id)?;
        let first = !peer.joined;
        peer.joined = true;
        peer.display_name = name.to_string();
        Some(first)
    }

    /// Remove the peer if `connection_id` still identifies its registered connection.
    pub fn remove(&mut self, id: &PeerId, connection_id: Uuid) -> Option<ConnectedPeer> {
        if self
            .peers
            .get(id)
            .is_some_and(|peer| peer.connection_id == connection_id)
        {
            self.peers.shift_remove(id)
        } else {
            None
        }
    }

    /// Look up a peer by identity.
    pub fn get(&self, id: &PeerId) -> Option<&ConnectedPeer> {
        self.peers.get(id)
    }

    /// Identity of the peer currently holding `role`, if any.
    pub fn holder_of(&self, role: Role) -> Option<&PeerId> {
        if !role.is_exclusive() {
            return None;
        }
        self.peers
            .values()
            .find(|peer| peer.role == role)
            .map(|peer| &peer.id)
    }

    /// Give `role` to `id`, clearing it from any other holder first.
    ///
    /// Returns `None` when `id` is not registered; the registry is left untouched in that case.
    pub fn assign(&mut self, id: &PeerId, role: Role) -> Option<RoleChange> {
        if !self.peers.contains_key(id) {
            return None;
        }

        let mut displaced = None;
        if role.is_exclusive() {
            for peer in self.peers.values_mut() {
                if peer.id != *id && peer.role == role {
                    peer.role = Role::None;
                    displaced = Some(peer.handle.clone());
                }
            }
        }

        let peer = self.peers.get_mut(id)?;
        peer.role = role;
        Some(RoleChange {
            target: peer.handle.clone(),
            target_joined: peer.joined,
            displaced,
        })
    }

    /// Writer handles of every registered peer.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.peers.values().map(|peer| peer.handle.clone()).collect()
    }

    /// Detached views of every registered peer, in connection order.
    pub fn infos(&self) -> Vec<PeerInfo> {
        self.peers.values().map(ConnectedPeer::info).collect()
    }

    /// Number of registered peers, joined or not.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Remove and return every peer.
    pub fn drain(&mut self) -> Vec<ConnectedPeer> {
        self.peers.drain(..).map(|(_, peer)| peer).collect()
    }
}
