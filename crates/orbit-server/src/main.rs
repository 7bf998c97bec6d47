mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use orbit_api::AppState;
use orbit_api::middleware::credentials_from_headers;
use orbit_db::Database;
use orbit_gateway::connection;
use orbit_gateway::{
    ConnectionRegistry, DbFriendGraph, EventRouter, JwtAuthenticator, MemoryPresence, PresenceBackend, PresenceStore,
    RedisPresence,
};
use orbit_types::models::UserRole;

use crate::config::ServerConfig;

#[derive(Clone)]
struct GatewayState {
    events: EventRouter,
    db: Arc<Database>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orbit=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    if let Some(username) = &config.admin_username {
        promote_admin(&db, username)?;
    }

    // Presence: Redis when configured, otherwise process-local
    let backend: Arc<dyn PresenceBackend> = match &config.redis_url {
        Some(url) => {
            info!("Using Redis presence at {}", url);
            Arc::new(RedisPresence::connect(url).await?)
        }
        None => {
            warn!("ORBIT_REDIS_URL not set, presence is process-local");
            Arc::new(MemoryPresence::new())
        }
    };
    let presence = PresenceStore::new(backend, Arc::new(DbFriendGraph::new(db.clone())))
        .with_ttls(config.presence_ttl, config.friend_cache_ttl);

    let auth = Arc::new(JwtAuthenticator::new(
        db.clone(),
        config.jwt_secret.clone(),
        config.jwt_refresh_secret.clone(),
    ));
    let registry = ConnectionRegistry::new(presence, auth.clone());
    let events = EventRouter::new(registry, db.clone());

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(GatewayState {
        events: events.clone(),
        db: db.clone(),
    });

    let app = Router::new()
        .merge(orbit_api::router(AppState::new(db, auth, events)))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Orbit server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// The credential is read at upgrade time; the socket loop verifies it.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let credentials = credentials_from_headers(&headers);
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.events, state.db, credentials))
}

fn promote_admin(db: &Database, username: &str) -> anyhow::Result<()> {
    match db.get_user_by_username(username)? {
        Some(found) if found.user.role == UserRole::Admin => {}
        Some(found) => {
            db.set_user_role(found.user.id, UserRole::Admin)?;
            info!("Promoted {} to admin", username);
        }
        None => warn!("ORBIT_ADMIN_USERNAME '{}' does not exist yet", username),
    }
    Ok(())
}
