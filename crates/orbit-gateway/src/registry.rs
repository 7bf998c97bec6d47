use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use orbit_types::events::ServerEvent;

use crate::auth::{AuthError, Authenticator, Credentials, Identity};
use crate::presence::PresenceStore;

pub type ConnectionId = Uuid;

/// Per-connection outbound queue. Events are shared between every
/// connection a fan-out reaches.
pub type EventSender = mpsc::UnboundedSender<Arc<ServerEvent>>;
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// A named set of connections. Every authenticated connection is in its
/// user group; post and conversation rooms are joined on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    User(Uuid),
    Post(Uuid),
    Conversation(Uuid),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user-{}", id),
            Self::Post(id) => write!(f, "post-{}", id),
            Self::Conversation(id) => write!(f, "conversation-{}", id),
        }
    }
}

/// `Connecting -> Authenticated -> Disconnected`. A failed handshake goes
/// straight to `Disconnected`, and nothing leaves `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Disconnected,
}

struct Session {
    user_id: Option<Uuid>,
    state: ConnectionState,
    groups: HashSet<GroupKey>,
    tx: EventSender,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<ConnectionId, Session>,
    groups: HashMap<GroupKey, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn join(&mut self, id: ConnectionId, key: GroupKey) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if session.state != ConnectionState::Authenticated {
            return false;
        }
        session.groups.insert(key);
        self.groups.entry(key).or_default().insert(id)
    }

    fn leave(&mut self, id: ConnectionId, key: &GroupKey) -> bool {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.groups.remove(key);
        }
        let Some(members) = self.groups.get_mut(key) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            self.groups.remove(key);
        }
        removed
    }

    fn user_connections(&self, user_id: Uuid) -> usize {
        self.groups.get(&GroupKey::User(user_id)).map_or(0, HashSet::len)
    }
}

/// An authenticated connection handed back to the socket loop.
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
    pub renewed_access: Option<String>,
    pub events: EventReceiver,
}

/// Tracks every live connection and the groups it belongs to, and keeps
/// presence in step with them.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    state: RwLock<RegistryState>,
    presence: PresenceStore,
    auth: Arc<dyn Authenticator>,
}

impl ConnectionRegistry {
    pub fn new(presence: PresenceStore, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: RwLock::new(RegistryState::default()),
                presence,
                auth,
            }),
        }
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.inner.presence
    }

    /// Verifies the credential and, on success, registers the connection in
    /// its user group, marks the user online and seeds the friend cache.
    pub async fn on_connect(&self, credentials: &Credentials) -> Result<Connection, AuthError> {
        let id = Uuid::new_v4();
        let (tx, events) = mpsc::unbounded_channel();
        self.inner.state.write().await.sessions.insert(
            id,
            Session {
                user_id: None,
                state: ConnectionState::Connecting,
                groups: HashSet::new(),
                tx,
            },
        );

        let verified = match self.inner.auth.verify(credentials).await {
            Ok(verified) => verified,
            Err(e) => {
                self.inner.state.write().await.sessions.remove(&id);
                debug!("Connection {} rejected: {}", id, e);
                return Err(e);
            }
        };

        let user_id = verified.identity.user_id;
        {
            let mut state = self.inner.state.write().await;
            let Some(session) = state.sessions.get_mut(&id) else {
                return Err(AuthError::InvalidCredential);
            };
            session.user_id = Some(user_id);
            session.state = ConnectionState::Authenticated;
            state.join(id, GroupKey::User(user_id));
        }

        let presence = &self.inner.presence;
        presence.mark_online(user_id).await;
        if !presence.has_cached_friends(user_id).await {
            presence.refresh_friends(user_id).await;
        }

        info!("Connection {} authenticated as {}", id, user_id);
        Ok(Connection {
            id,
            identity: verified.identity,
            renewed_access: verified.renewed_access,
            events,
        })
    }

    /// Removes the connection from every group. The user goes offline only
    /// when this was their last connection. Safe to call more than once.
    pub async fn on_disconnect(&self, id: ConnectionId) {
        let (user_id, remaining) = {
            let mut state = self.inner.state.write().await;
            let Some(session) = state.sessions.remove(&id) else {
                return;
            };
            for key in &session.groups {
                if let Some(members) = state.groups.get_mut(key) {
                    members.remove(&id);
                    if members.is_empty() {
                        state.groups.remove(key);
                    }
                }
            }
            match session.user_id {
                Some(user_id) => (user_id, state.user_connections(user_id)),
                None => return,
            }
        };

        if remaining == 0 {
            self.inner.presence.mark_offline(user_id).await;
        }
        info!("Connection {} for {} closed ({} remaining)", id, user_id, remaining);
    }

    /// Only authenticated connections can join rooms.
    pub async fn join_group(&self, id: ConnectionId, key: GroupKey) -> bool {
        let joined = self.inner.state.write().await.join(id, key);
        if joined {
            debug!("Connection {} joined {}", id, key);
        } else {
            warn!("Connection {} could not join {}", id, key);
        }
        joined
    }

    pub async fn leave_group(&self, id: ConnectionId, key: GroupKey) -> bool {
        let left = self.inner.state.write().await.leave(id, &key);
        if left {
            debug!("Connection {} left {}", id, key);
        }
        left
    }

    /// Re-issues the online flag so a healthy connection's TTL never lapses.
    pub async fn refresh_presence(&self, user_id: Uuid) {
        self.inner.presence.mark_online(user_id).await;
    }

    pub async fn state(&self, id: ConnectionId) -> ConnectionState {
        self.inner
            .state
            .read()
            .await
            .sessions
            .get(&id)
            .map_or(ConnectionState::Disconnected, |s| s.state)
    }

    pub async fn members(&self, key: &GroupKey) -> HashSet<ConnectionId> {
        self.inner.state.read().await.groups.get(key).cloned().unwrap_or_default()
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner.state.read().await.user_connections(user_id)
    }

    /// Outbound queues for a set of connections. Unknown IDs are skipped.
    pub(crate) async fn senders(&self, ids: &HashSet<ConnectionId>) -> Vec<(ConnectionId, EventSender)> {
        let state = self.inner.state.read().await;
        ids.iter()
            .filter_map(|id| {
                state
                    .sessions
                    .get(id)
                    .filter(|s| s.state == ConnectionState::Authenticated)
                    .map(|s| (*id, s.tx.clone()))
            })
            .collect()
    }
}
