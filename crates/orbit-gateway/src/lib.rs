pub mod auth;
pub mod connection;
pub mod friends;
pub mod presence;
pub mod registry;
pub mod router;

pub use auth::{AuthError, Authenticator, Credentials, Identity, JwtAuthenticator, Verified};
pub use friends::{DbFriendGraph, FriendGraph};
pub use presence::{MemoryPresence, PresenceBackend, PresenceStore, RedisPresence};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, ConnectionState, GroupKey};
pub use router::{DeliveryReport, EventRouter, Recipients};
