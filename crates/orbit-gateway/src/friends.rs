use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use orbit_db::Database;

/// Source of truth for who is friends with whom.
#[async_trait]
pub trait FriendGraph: Send + Sync {
    async fn friends_of(&self, user_id: Uuid) -> anyhow::Result<Vec<Uuid>>;
}

/// Friend graph backed by the relationships table.
#[derive(Clone)]
pub struct DbFriendGraph {
    db: Arc<Database>,
}

impl DbFriendGraph {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FriendGraph for DbFriendGraph {
    async fn friends_of(&self, user_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        let db = self.db.clone();
        let friends = tokio::task::spawn_blocking(move || db.friends_of(user_id)).await??;
        Ok(friends)
    }
}
