use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use orbit_gateway::Identity;
use orbit_types::models::Notification;

use crate::{ApiResult, AppState};

pub async fn list(State(state): State<AppState>, Extension(me): Extension<Identity>) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.store(move |db| db.get_notifications(me.user_id)).await?))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store(move |db| db.mark_notification_read(id, me.user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_menu_opened(
    State(state): State<AppState>,
    Extension(me): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .store(move |db| db.mark_notification_menu_opened(id, me.user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
