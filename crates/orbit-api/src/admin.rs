use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use orbit_gateway::Identity;
use orbit_types::api::SetActiveRequest;

use crate::middleware::require_admin;
use crate::{ApiResult, AppState};

const LOCKED_MESSAGE: &str = "Your account has been locked by an administrator";

/// Locks or unlocks an account. A locked user's live connections are told
/// immediately; their next request or reconnect is rejected.
pub async fn set_active(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SetActiveRequest>,
) -> ApiResult<StatusCode> {
    require_admin(&me)?;

    let is_active = req.is_active;
    state.store(move |db| db.set_user_active(user_id, is_active)).await?;
    info!("{} set account {} active={}", me.user_id, user_id, is_active);

    if !is_active {
        state.events.account_locked(user_id, LOCKED_MESSAGE);
    }
    Ok(StatusCode::NO_CONTENT)
}
