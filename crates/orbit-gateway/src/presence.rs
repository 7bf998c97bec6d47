//! Ephemeral presence: who is online, and a cached copy of each user's
//! friend list so fan-out does not hit the store on every post.
//!
//! The cache is advisory. Backend failures never reach callers: reads
//! degrade to "offline" / "no friends" and writes are dropped, with a
//! warning in the log.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::friends::FriendGraph;

pub const DEFAULT_ONLINE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_FRIENDS_TTL: Duration = Duration::from_secs(86_400);

/// Storage for presence flags and friend sets, each with an expiry.
#[async_trait]
pub trait PresenceBackend: Send + Sync {
    async fn set_online(&self, user_id: Uuid, ttl: Duration) -> anyhow::Result<()>;
    async fn clear_online(&self, user_id: Uuid) -> anyhow::Result<()>;
    async fn is_online(&self, user_id: Uuid) -> anyhow::Result<bool>;

    /// The subset of `user_ids` that is currently online.
    async fn online_among(&self, user_ids: &[Uuid]) -> anyhow::Result<HashSet<Uuid>> {
        let mut online = HashSet::new();
        for &id in user_ids {
            if self.is_online(id).await? {
                online.insert(id);
            }
        }
        Ok(online)
    }

    async fn set_friends(&self, user_id: Uuid, friend_ids: &[Uuid], ttl: Duration) -> anyhow::Result<()>;
    /// None when nothing is cached (or the entry expired).
    async fn friends(&self, user_id: Uuid) -> anyhow::Result<Option<HashSet<Uuid>>>;
    async fn clear_friends(&self, user_id: Uuid) -> anyhow::Result<()>;
}

// -- In-process backend --

/// Process-local presence. Entries expire lazily on read.
#[derive(Default)]
pub struct MemoryPresence {
    online: RwLock<HashMap<Uuid, Instant>>,
    friends: RwLock<HashMap<Uuid, (HashSet<Uuid>, Instant)>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceBackend for MemoryPresence {
    async fn set_online(&self, user_id: Uuid, ttl: Duration) -> anyhow::Result<()> {
        self.online.write().await.insert(user_id, Instant::now() + ttl);
        Ok(())
    }

    async fn clear_online(&self, user_id: Uuid) -> anyhow::Result<()> {
        self.online.write().await.remove(&user_id);
        Ok(())
    }

    async fn is_online(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let now = Instant::now();
        let expired = match self.online.read().await.get(&user_id) {
            Some(expires) if *expires > now => return Ok(true),
            Some(_) => true,
            None => false,
        };
        if expired {
            let mut online = self.online.write().await;
            if online.get(&user_id).is_some_and(|e| *e <= now) {
                online.remove(&user_id);
            }
        }
        Ok(false)
    }

    async fn online_among(&self, user_ids: &[Uuid]) -> anyhow::Result<HashSet<Uuid>> {
        let now = Instant::now();
        let online = self.online.read().await;
        Ok(user_ids
            .iter()
            .filter(|id| online.get(id).is_some_and(|e| *e > now))
            .copied()
            .collect())
    }

    async fn set_friends(&self, user_id: Uuid, friend_ids: &[Uuid], ttl: Duration) -> anyhow::Result<()> {
        let set = friend_ids.iter().copied().collect();
        self.friends.write().await.insert(user_id, (set, Instant::now() + ttl));
        Ok(())
    }

    async fn friends(&self, user_id: Uuid) -> anyhow::Result<Option<HashSet<Uuid>>> {
        let now = Instant::now();
        Ok(self
            .friends
            .read()
            .await
            .get(&user_id)
            .filter(|(_, expires)| *expires > now)
            .map(|(set, _)| set.clone()))
    }

    async fn clear_friends(&self, user_id: Uuid) -> anyhow::Result<()> {
        self.friends.write().await.remove(&user_id);
        Ok(())
    }
}

// -- Redis backend --

fn online_key(user_id: Uuid) -> String {
    format!("user_online:{}", user_id)
}

fn friends_key(user_id: Uuid) -> String {
    format!("friends:{}", user_id)
}

/// Presence shared between server instances through Redis.
#[derive(Clone)]
pub struct RedisPresence {
    conn: ConnectionManager,
}

impl RedisPresence {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl PresenceBackend for RedisPresence {
    async fn set_online(&self, user_id: Uuid, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SETEX")
            .arg(online_key(user_id))
            .arg(ttl.as_secs())
            .arg("true")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear_online(&self, user_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(online_key(user_id)).query_async(&mut conn).await?;
        Ok(())
    }

    async fn is_online(&self, user_id: Uuid) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(online_key(user_id))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn online_among(&self, user_ids: &[Uuid]) -> anyhow::Result<HashSet<Uuid>> {
        if user_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = user_ids.iter().map(|id| online_key(*id)).collect();
        let flags: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        Ok(user_ids
            .iter()
            .zip(flags)
            .filter_map(|(id, flag)| flag.map(|_| *id))
            .collect())
    }

    async fn set_friends(&self, user_id: Uuid, friend_ids: &[Uuid], ttl: Duration) -> anyhow::Result<()> {
        let key = friends_key(user_id);
        let members: Vec<String> = friend_ids.iter().map(Uuid::to_string).collect();
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .cmd("SADD")
            .arg(&key)
            .arg(&members)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl.as_secs())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn friends(&self, user_id: Uuid) -> anyhow::Result<Option<HashSet<Uuid>>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(friends_key(user_id))
            .query_async(&mut conn)
            .await?;
        // Empty sets are never stored, so an empty reply means a miss.
        if members.is_empty() {
            return Ok(None);
        }
        let set = members
            .iter()
            .map(|m| m.parse::<Uuid>())
            .collect::<Result<HashSet<_>, _>>()
            .context("malformed friend id in cache")?;
        Ok(Some(set))
    }

    async fn clear_friends(&self, user_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(friends_key(user_id)).query_async(&mut conn).await?;
        Ok(())
    }
}

// -- Store --

/// Presence operations with degrade-on-error semantics, plus the friend
/// cache rebuild on miss.
#[derive(Clone)]
pub struct PresenceStore {
    backend: Arc<dyn PresenceBackend>,
    graph: Arc<dyn FriendGraph>,
    online_ttl: Duration,
    friends_ttl: Duration,
}

impl PresenceStore {
    pub fn new(backend: Arc<dyn PresenceBackend>, graph: Arc<dyn FriendGraph>) -> Self {
        Self {
            backend,
            graph,
            online_ttl: DEFAULT_ONLINE_TTL,
            friends_ttl: DEFAULT_FRIENDS_TTL,
        }
    }

    pub fn with_ttls(mut self, online_ttl: Duration, friends_ttl: Duration) -> Self {
        self.online_ttl = online_ttl;
        self.friends_ttl = friends_ttl;
        self
    }

    /// Sets or refreshes the online flag.
    pub async fn mark_online(&self, user_id: Uuid) {
        if let Err(e) = self.backend.set_online(user_id, self.online_ttl).await {
            warn!("Presence: failed to mark {} online: {:#}", user_id, e);
        }
    }

    pub async fn mark_offline(&self, user_id: Uuid) {
        if let Err(e) = self.backend.clear_online(user_id).await {
            warn!("Presence: failed to mark {} offline: {:#}", user_id, e);
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.backend.is_online(user_id).await.unwrap_or_else(|e| {
            warn!("Presence: online check for {} failed: {:#}", user_id, e);
            false
        })
    }

    /// Caches the friend set. An empty list is not cached.
    pub async fn cache_friends(&self, user_id: Uuid, friend_ids: &[Uuid]) {
        if friend_ids.is_empty() {
            return;
        }
        if let Err(e) = self.backend.set_friends(user_id, friend_ids, self.friends_ttl).await {
            warn!("Presence: failed to cache friends of {}: {:#}", user_id, e);
        }
    }

    pub async fn has_cached_friends(&self, user_id: Uuid) -> bool {
        match self.backend.friends(user_id).await {
            Ok(cached) => cached.is_some(),
            Err(e) => {
                warn!("Presence: friend cache lookup for {} failed: {:#}", user_id, e);
                false
            }
        }
    }

    /// Drops the cached friend set so the next lookup rebuilds it.
    pub async fn invalidate_friends(&self, user_id: Uuid) {
        if let Err(e) = self.backend.clear_friends(user_id).await {
            warn!("Presence: failed to invalidate friends of {}: {:#}", user_id, e);
        }
    }

    /// Loads the friend list from the graph and caches it.
    pub async fn refresh_friends(&self, user_id: Uuid) -> Vec<Uuid> {
        match self.graph.friends_of(user_id).await {
            Ok(friends) => {
                self.cache_friends(user_id, &friends).await;
                friends
            }
            Err(e) => {
                warn!("Presence: friend graph lookup for {} failed: {:#}", user_id, e);
                Vec::new()
            }
        }
    }

    /// Friends of `user_id` that are online right now. On a cache miss the
    /// friend set is rebuilt from the graph first.
    pub async fn online_friends_of(&self, user_id: Uuid) -> HashSet<Uuid> {
        let cached = match self.backend.friends(user_id).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Presence: friend cache lookup for {} failed: {:#}", user_id, e);
                None
            }
        };

        let friends: Vec<Uuid> = match cached {
            Some(set) => set.into_iter().collect(),
            None => {
                debug!("Presence: friend cache miss for {}", user_id);
                self.refresh_friends(user_id).await
            }
        };

        if friends.is_empty() {
            return HashSet::new();
        }

        self.backend.online_among(&friends).await.unwrap_or_else(|e| {
            warn!("Presence: online lookup for friends of {} failed: {:#}", user_id, e);
            HashSet::new()
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed friend lists, counting how often it is asked.
    #[derive(Default)]
    pub(crate) struct StaticGraph {
        pub edges: Mutex<HashMap<Uuid, Vec<Uuid>>>,
        pub lookups: AtomicUsize,
    }

    impl StaticGraph {
        pub fn befriend(&self, a: Uuid, b: Uuid) {
            let mut edges = self.edges.lock().unwrap();
            edges.entry(a).or_default().push(b);
            edges.entry(b).or_default().push(a);
        }
    }

    #[async_trait]
    impl FriendGraph for StaticGraph {
        async fn friends_of(&self, user_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.edges.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
        }
    }

    /// Backend that fails every call.
    struct BrokenBackend;

    #[async_trait]
    impl PresenceBackend for BrokenBackend {
        async fn set_online(&self, _: Uuid, _: Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn clear_online(&self, _: Uuid) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn is_online(&self, _: Uuid) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }
        async fn set_friends(&self, _: Uuid, _: &[Uuid], _: Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn friends(&self, _: Uuid) -> anyhow::Result<Option<HashSet<Uuid>>> {
            anyhow::bail!("connection refused")
        }
        async fn clear_friends(&self, _: Uuid) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    fn store(graph: Arc<StaticGraph>) -> PresenceStore {
        PresenceStore::new(Arc::new(MemoryPresence::new()), graph)
    }

    #[tokio::test(start_paused = true)]
    async fn online_flag_expires_without_refresh() {
        let presence = store(Arc::default());
        let ana = Uuid::new_v4();

        presence.mark_online(ana).await;
        assert!(presence.is_online(ana).await);

        tokio::time::advance(Duration::from_secs(200)).await;
        presence.mark_online(ana).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(presence.is_online(ana).await, "refresh extends the ttl");

        tokio::time::advance(Duration::from_secs(101)).await;
        assert!(!presence.is_online(ana).await);
    }

    #[tokio::test]
    async fn mark_offline_is_immediate() {
        let presence = store(Arc::default());
        let ana = Uuid::new_v4();
        presence.mark_online(ana).await;
        presence.mark_offline(ana).await;
        assert!(!presence.is_online(ana).await);
    }

    #[tokio::test]
    async fn online_friends_are_the_intersection() {
        let graph = Arc::new(StaticGraph::default());
        let (ana, ben, cid) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        graph.befriend(ana, ben);
        graph.befriend(ana, cid);
        let presence = store(graph.clone());

        presence.mark_online(ben).await;
        let online = presence.online_friends_of(ana).await;
        assert_eq!(online, HashSet::from([ben]));
    }

    #[tokio::test]
    async fn cache_miss_rebuilds_once() {
        let graph = Arc::new(StaticGraph::default());
        let (ana, ben) = (Uuid::new_v4(), Uuid::new_v4());
        graph.befriend(ana, ben);
        let presence = store(graph.clone());

        assert!(!presence.has_cached_friends(ana).await);
        presence.online_friends_of(ana).await;
        assert!(presence.has_cached_friends(ana).await);
        presence.online_friends_of(ana).await;
        assert_eq!(graph.lookups.load(Ordering::SeqCst), 1);

        presence.invalidate_friends(ana).await;
        presence.online_friends_of(ana).await;
        assert_eq!(graph.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_friend_list_is_not_cached() {
        let presence = store(Arc::default());
        let ana = Uuid::new_v4();
        presence.cache_friends(ana, &[]).await;
        assert!(!presence.has_cached_friends(ana).await);
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_offline_and_empty() {
        let graph = Arc::new(StaticGraph::default());
        let (ana, ben) = (Uuid::new_v4(), Uuid::new_v4());
        graph.befriend(ana, ben);
        let presence = PresenceStore::new(Arc::new(BrokenBackend), graph);

        presence.mark_online(ben).await;
        assert!(!presence.is_online(ben).await);
        assert!(presence.online_friends_of(ana).await.is_empty());
    }
}
