pub mod admin;
pub mod auth;
pub mod conversations;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod reactions;
pub mod relationships;
pub mod routes;
pub mod users;

use std::sync::Arc;

use uuid::Uuid;

use orbit_db::Database;
use orbit_gateway::{EventRouter, JwtAuthenticator, PresenceStore};

pub use error::{ApiError, ApiResult};
pub use routes::router;

/// Shared handles for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub auth: Arc<JwtAuthenticator>,
    pub events: EventRouter,
}

impl AppState {
    pub fn new(db: Arc<Database>, auth: Arc<JwtAuthenticator>, events: EventRouter) -> Self {
        Self { db, auth, events }
    }

    pub fn presence(&self) -> &PresenceStore {
        self.events.registry().presence()
    }

    /// Drops the cached friend sets of `user_id` and of each friend, so the
    /// next fan-out reads the friend graph again.
    pub async fn invalidate_friend_sets(&self, user_id: Uuid, friends: &[Uuid]) {
        let presence = self.presence();
        presence.invalidate_friends(user_id).await;
        for friend in friends {
            presence.invalidate_friends(*friend).await;
        }
    }

    /// Runs a store call on the blocking pool.
    pub async fn store<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> orbit_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }
}
