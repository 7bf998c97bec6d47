use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use orbit_db::StoreError;
use orbit_gateway::Identity;
use orbit_types::models::{User, UserSummary};

use crate::{ApiResult, AppState};

pub async fn me(State(state): State<AppState>, Extension(me): Extension<Identity>) -> ApiResult<Json<User>> {
    let user = state
        .store(move |db| {
            db.get_user(me.user_id)?
                .ok_or_else(|| StoreError::NotFound(format!("user {}", me.user_id)))
        })
        .await?;
    Ok(Json(user))
}

pub async fn profile(State(state): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<UserSummary>> {
    Ok(Json(state.store(move |db| db.user_summary(user_id)).await?))
}

/// Soft-deletes the caller's account and everything it owns. Friends' cached
/// friend lists are dropped so they stop routing to the deleted user.
pub async fn delete_me(State(state): State<AppState>, Extension(me): Extension<Identity>) -> ApiResult<StatusCode> {
    let (friends, report) = state
        .store(move |db| {
            let friends = db.friends_of(me.user_id)?;
            Ok((friends, db.soft_delete_account(me.user_id)?))
        })
        .await?;
    info!("Deleted account {} ({} rows)", report.user_id, report.rows);

    state.invalidate_friend_sets(me.user_id, &friends).await;
    Ok(StatusCode::NO_CONTENT)
}
